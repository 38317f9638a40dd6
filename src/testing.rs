//! Mock collaborators shared by the unit tests

use crate::config::SensorConfig;
use crate::link::{LinkCredentials, LinkStateCell, NetworkLink};
use crate::mqtt::MessagingClient;
use crate::sensor::{MotionReading, SampleSource, SensorError};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tremor_shared::{wire, ConnectionEvent, ConnectionState};

/// Sensor returning a fixed reading, optionally failing every n-th read
pub struct ScriptedSource {
    present: bool,
    reading: MotionReading,
    fail_every: Option<usize>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            present: true,
            reading: MotionReading {
                accel: [0.0, 0.0, 9.81],
                gyro: [0.0; 3],
                temp_c: 30.0,
            },
            fail_every: None,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::new()
        }
    }

    pub fn failing_every(n: usize) -> Self {
        Self {
            fail_every: Some(n),
            ..Self::new()
        }
    }

    /// Counter of read calls, readable after the source moved into a task
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

impl SampleSource for ScriptedSource {
    fn init(&mut self, _config: &SensorConfig) -> Result<(), SensorError> {
        if self.present {
            Ok(())
        } else {
            Err(SensorError::NotFound)
        }
    }

    fn read(&mut self) -> Result<MotionReading, SensorError> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fail_every {
            Some(every) if n % every == 0 => Err(SensorError::Read("bus timeout".into())),
            _ => Ok(self.reading),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// How a `MockLink` answers reconnect requests
#[derive(Debug, Clone, Copy)]
pub enum LinkScript {
    /// Connected after this many status reads following a request
    UpAfter(u32),
    /// Every attempt fails immediately
    Never,
}

pub struct MockLink {
    state: LinkStateCell,
    script: LinkScript,
    countdown: AtomicU32,
    reconnect_requests: AtomicU32,
    status_reads: AtomicU32,
}

impl MockLink {
    pub fn up() -> Arc<Self> {
        let link = Self::with_script(LinkScript::UpAfter(0));
        link.state.apply(ConnectionEvent::Established);
        Arc::new(link)
    }

    pub fn down(script: LinkScript) -> Arc<Self> {
        Arc::new(Self::with_script(script))
    }

    fn with_script(script: LinkScript) -> Self {
        Self {
            state: LinkStateCell::new(),
            script,
            countdown: AtomicU32::new(0),
            reconnect_requests: AtomicU32::new(0),
            status_reads: AtomicU32::new(0),
        }
    }

    pub fn drop_link(&self) {
        self.state.apply(ConnectionEvent::Lost);
    }

    pub fn reconnect_requests(&self) -> u32 {
        self.reconnect_requests.load(Ordering::SeqCst)
    }

    pub fn status_reads(&self) -> u32 {
        self.status_reads.load(Ordering::SeqCst)
    }
}

impl NetworkLink for MockLink {
    fn status(&self) -> ConnectionState {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        if self.state.load() == ConnectionState::Connecting {
            let left = self.countdown.load(Ordering::SeqCst);
            if left == 0 {
                self.state.apply(ConnectionEvent::Established);
            } else {
                self.countdown.store(left - 1, Ordering::SeqCst);
            }
        }
        self.state.load()
    }

    fn begin(&self, _credentials: &LinkCredentials) {
        self.request_reconnect();
    }

    fn request_reconnect(&self) {
        self.reconnect_requests.fetch_add(1, Ordering::SeqCst);
        if !self.state.try_begin_attempt() {
            return;
        }
        match self.script {
            LinkScript::UpAfter(n) => self.countdown.store(n, Ordering::SeqCst),
            LinkScript::Never => {
                self.state.apply(ConnectionEvent::AttemptFailed);
            }
        }
    }

    fn name(&self) -> &'static str {
        "mock-link"
    }
}

#[derive(Default)]
struct ClientLog {
    accept: bool,
    fail_publish: bool,
    connected: bool,
    connect_attempts: u32,
    polls: u32,
    published: Vec<(String, Vec<u8>)>,
}

/// Test-side view of a `MockClient`
#[derive(Clone)]
pub struct ClientHandle(Arc<Mutex<ClientLog>>);

impl ClientHandle {
    pub fn set_accept(&self, accept: bool) {
        self.0.lock().unwrap().accept = accept;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.0.lock().unwrap().fail_publish = fail;
    }

    pub fn drop_session(&self) {
        self.0.lock().unwrap().connected = false;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.0.lock().unwrap().connect_attempts
    }

    pub fn polls(&self) -> u32 {
        self.0.lock().unwrap().polls
    }

    pub fn topics(&self) -> Vec<String> {
        self.0.lock().unwrap().published.iter().map(|(t, _)| t.clone()).collect()
    }

    /// Timestamps of every published record, in publish order
    pub fn published_ts(&self) -> Vec<u64> {
        self.0
            .lock()
            .unwrap()
            .published
            .iter()
            .map(|(_, payload)| wire::decode(payload).unwrap().ts_ms)
            .collect()
    }
}

pub struct MockClient {
    log: Arc<Mutex<ClientLog>>,
}

impl MockClient {
    /// Client whose broker accepts connections; starts disconnected
    pub fn accepting() -> (Box<dyn MessagingClient>, ClientHandle) {
        Self::build(true, false)
    }

    /// Client already connected
    pub fn connected() -> (Box<dyn MessagingClient>, ClientHandle) {
        Self::build(true, true)
    }

    /// Client whose broker refuses every connection
    pub fn refusing() -> (Box<dyn MessagingClient>, ClientHandle) {
        Self::build(false, false)
    }

    fn build(accept: bool, connected: bool) -> (Box<dyn MessagingClient>, ClientHandle) {
        let log = Arc::new(Mutex::new(ClientLog {
            accept,
            connected,
            ..Default::default()
        }));
        let handle = ClientHandle(log.clone());
        (Box::new(MockClient { log }), handle)
    }
}

#[async_trait]
impl MessagingClient for MockClient {
    fn is_connected(&self) -> bool {
        self.log.lock().unwrap().connected
    }

    async fn connect(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.connect_attempts += 1;
        if log.accept {
            log.connected = true;
            Ok(())
        } else {
            Err(anyhow!("connection refused"))
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if !log.connected {
            return Err(anyhow!("not connected"));
        }
        if log.fail_publish {
            return Err(anyhow!("send buffer full"));
        }
        log.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn poll(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.polls += 1;
        if log.connected {
            Ok(())
        } else {
            Err(anyhow!("not connected"))
        }
    }

    fn name(&self) -> &'static str {
        "mock-client"
    }
}
