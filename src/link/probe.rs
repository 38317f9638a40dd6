//! TCP-probe link
//!
//! On a host there is no radio to ask, so the link is considered up while a
//! TCP connect to the probe address (gateway or broker) succeeds. A watcher
//! re-probes periodically once the link has been started and marks it down
//! when a probe fails. Repairing it is left to whoever calls
//! `request_reconnect`.

use super::{LinkCredentials, LinkStateCell, NetworkLink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use tremor_shared::{ConnectionEvent, ConnectionState};

/// Configuration for a probe link
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Address whose reachability defines the link
    pub address: String,
    /// Timeout of one probe
    pub probe_timeout: Duration,
    /// Interval between watcher probes
    pub watch_interval: Duration,
}

pub struct ProbeLink {
    inner: Arc<ProbeInner>,
}

struct ProbeInner {
    config: ProbeConfig,
    state: LinkStateCell,
    watching: AtomicBool,
}

impl ProbeLink {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                config,
                state: LinkStateCell::new(),
                watching: AtomicBool::new(false),
            }),
        }
    }

    fn spawn_attempt(&self) {
        let inner = self.inner.clone();
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!("[LINK] No runtime to run the connect attempt on");
                inner.state.apply(ConnectionEvent::AttemptFailed);
                return;
            }
        };

        handle.spawn(async move {
            match inner.probe().await {
                Ok(local) => {
                    inner.state.apply(ConnectionEvent::Established);
                    info!("[LINK] Connected, local address {}", local);
                }
                Err(e) => {
                    inner.state.apply(ConnectionEvent::AttemptFailed);
                    debug!("[LINK] Connect attempt failed: {}", e);
                }
            }
        });
    }

    fn spawn_watcher(&self) {
        if self.inner.watching.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.watching.store(false, Ordering::Release);
            return;
        };

        let inner = self.inner.clone();
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.watch_interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if inner.state.load() != ConnectionState::Connected {
                    continue;
                }
                if let Err(e) = inner.probe().await {
                    inner.state.apply(ConnectionEvent::Lost);
                    warn!("[LINK] Link lost: {}", e);
                }
            }
        });
    }
}

impl ProbeInner {
    async fn probe(&self) -> anyhow::Result<std::net::SocketAddr> {
        let stream = timeout(
            self.config.probe_timeout,
            TcpStream::connect(&self.config.address),
        )
        .await
        .map_err(|_| anyhow::anyhow!("probe to {} timed out", self.config.address))??;

        Ok(stream.local_addr()?)
    }
}

impl NetworkLink for ProbeLink {
    fn status(&self) -> ConnectionState {
        self.inner.state.load()
    }

    fn begin(&self, credentials: &LinkCredentials) {
        info!(
            "[LINK] Joining network {} ({}, probe {})",
            credentials.ssid,
            credentials.security(),
            self.inner.config.address
        );
        self.request_reconnect();
        self.spawn_watcher();
    }

    fn request_reconnect(&self) {
        if self.inner.state.try_begin_attempt() {
            self.spawn_attempt();
        }
    }

    fn name(&self) -> &'static str {
        "tcp-probe"
    }
}
