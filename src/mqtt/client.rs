//! MQTT 3.1.1 client over TCP
//!
//! Publish-only, QoS 0. The session is torn down locally on any I/O or
//! protocol error and `is_connected` turns false; reconnecting is the
//! caller's decision.

use super::MessagingClient;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use tremor_shared::codec::{self, ConnectReturnCode, FrameDecoder, Packet};

/// Options for one broker session
#[derive(Debug, Clone)]
pub struct MqttOptions {
    /// Broker `host:port`
    pub address: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Bound on TCP connect plus CONNACK
    pub connect_timeout: Duration,
    /// Bound on writing one packet to the socket
    pub write_timeout: Duration,
}

/// Derive a stable client id from the device id
///
/// The id is `<prefix>_<8 hex digits>`, the digits being the FNV-1a hash of
/// the device id, so each device keeps the same id across restarts.
pub fn client_id_for(prefix: &str, device_id: &str) -> String {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in device_id.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    format!("{}_{:08x}", prefix, hash)
}

pub struct MqttClient {
    options: MqttOptions,
    stream: Option<TcpStream>,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    last_sent: Instant,
    ping_outstanding: bool,
}

impl MqttClient {
    pub fn new(options: MqttOptions) -> Self {
        Self {
            options,
            stream: None,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 1024],
            last_sent: Instant::now(),
            ping_outstanding: false,
        }
    }

    pub fn options(&self) -> &MqttOptions {
        &self.options
    }

    async fn handshake(&mut self) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.options.address).await?;
        stream.set_nodelay(true)?;

        let connect = codec::encode(&Packet::Connect {
            client_id: self.options.client_id.clone(),
            keep_alive_secs: self.options.keep_alive.as_secs().min(u16::MAX as u64) as u16,
            clean_session: true,
        })?;
        stream.write_all(&connect).await?;

        self.decoder.clear();
        loop {
            let n = stream.read(&mut self.read_buf).await?;
            if n == 0 {
                bail!("broker closed connection during handshake");
            }
            self.decoder.extend(&self.read_buf[..n]);

            match self.decoder.decode_next()? {
                Some(Packet::ConnAck {
                    code: ConnectReturnCode::Accepted,
                    ..
                }) => return Ok(stream),
                Some(Packet::ConnAck { code, .. }) => {
                    bail!("broker refused connection: {:?}", code)
                }
                Some(other) => bail!("unexpected packet before CONNACK: {:?}", other),
                None => continue,
            }
        }
    }

    /// Tear the session down locally and build the error to return
    fn lose(&mut self, reason: impl std::fmt::Display) -> anyhow::Error {
        if self.stream.take().is_some() {
            warn!("[MQTT] Session lost: {}", reason);
        }
        self.decoder.clear();
        self.ping_outstanding = false;
        anyhow!("{}", reason)
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        let encoded = codec::encode(packet)?;
        let write_timeout = self.options.write_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("not connected"))?;

        let written = timeout(write_timeout, stream.write_all(&encoded)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.lose(format!("write failed: {}", e))),
            Err(_) => {
                return Err(self.lose(format!("write timed out after {:?}", write_timeout)));
            }
        }
        self.last_sent = Instant::now();
        Ok(())
    }

    /// Drain whatever the broker sent without waiting
    fn drain_incoming(&mut self) -> Result<()> {
        loop {
            let Some(stream) = self.stream.as_ref() else {
                return Err(anyhow!("not connected"));
            };
            match stream.try_read(&mut self.read_buf) {
                Ok(0) => return Err(self.lose("broker closed connection")),
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(self.lose(format!("read failed: {}", e))),
            }
        }

        loop {
            match self.decoder.decode_next() {
                Ok(Some(Packet::PingResp)) => self.ping_outstanding = false,
                Ok(Some(Packet::Disconnect)) => return Err(self.lose("broker sent DISCONNECT")),
                Ok(Some(other)) => debug!("[MQTT] Ignoring {:?}", other),
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.lose(format!("protocol error: {}", e))),
            }
        }
    }
}

#[async_trait]
impl MessagingClient for MqttClient {
    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        self.stream = None;
        self.ping_outstanding = false;

        let stream = match timeout(self.options.connect_timeout, self.handshake()).await {
            Ok(result) => result?,
            Err(_) => bail!("connect to {} timed out", self.options.address),
        };

        self.stream = Some(stream);
        self.last_sent = Instant::now();
        info!(
            "[MQTT] Session open to {} as {}",
            self.options.address, self.options.client_id
        );
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let packet = Packet::Publish {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
            retain: false,
        };
        self.send(&packet).await
    }

    async fn poll(&mut self) -> Result<()> {
        self.drain_incoming()?;

        if self.last_sent.elapsed() >= self.options.keep_alive / 2 {
            if self.ping_outstanding {
                return Err(self.lose("keep-alive timed out"));
            }
            self.send(&Packet::PingReq).await?;
            self.ping_outstanding = true;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}
