//! One device connection

use super::registry::{RecordOrder, SessionRegistry};
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tremor_shared::codec::{self, ConnectReturnCode, FrameDecoder, Packet};
use tremor_shared::wire;

/// Time allowed for the first packet after accept
const CONNECT_WAIT: Duration = Duration::from_secs(10);

pub struct DeviceSession {
    stream: TcpStream,
    addr: SocketAddr,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    client_id: Option<String>,
    /// Silence allowed before the session is dropped
    read_deadline: Option<Duration>,
}

impl DeviceSession {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            stream,
            addr,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
            client_id: None,
            read_deadline: Some(CONNECT_WAIT),
        }
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        let encoded = codec::encode(packet)?;
        self.stream.write_all(&encoded).await?;
        Ok(())
    }

    /// Read the next packet; `None` once the connection is over
    async fn recv(&mut self) -> Option<Packet> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(packet)) => return Some(packet),
                Ok(None) => {}
                Err(e) => {
                    warn!("[BROKER] Protocol error from {}: {}", self.addr, e);
                    return None;
                }
            }

            let read = self.stream.read(&mut self.read_buf);
            let result = match self.read_deadline {
                Some(deadline) => match timeout(deadline, read).await {
                    Ok(result) => result,
                    Err(_) => {
                        match &self.client_id {
                            Some(id) => warn!("[BROKER] {} silent for {:?}, dropping", id, deadline),
                            None => debug!(
                                "[BROKER] {} sent no CONNECT within {:?}, dropping",
                                self.addr, deadline
                            ),
                        }
                        return None;
                    }
                },
                None => read.await,
            };

            match result {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!("[BROKER] Read error from {}: {}", self.addr, e);
                    return None;
                }
            }
        }
    }

    async fn accept_connect(
        &mut self,
        registry: &SessionRegistry,
        client_id: String,
        keep_alive_secs: u16,
    ) -> Result<()> {
        if client_id.is_empty() {
            self.send(&Packet::ConnAck {
                session_present: false,
                code: ConnectReturnCode::IdentifierRejected,
            })
            .await?;
            return Err(anyhow!("empty client id"));
        }

        self.send(&Packet::ConnAck {
            session_present: false,
            code: ConnectReturnCode::Accepted,
        })
        .await?;

        if registry.register(&client_id, self.addr).await {
            warn!("[BROKER] {} reconnected, replacing previous session", client_id);
        }
        info!(
            "[BROKER] {} connected from {} (keep-alive {}s, {} sessions)",
            client_id,
            self.addr,
            keep_alive_secs,
            registry.count().await
        );

        // Keep-alive grace is one and a half intervals; zero disables it
        self.read_deadline =
            (keep_alive_secs > 0).then(|| Duration::from_millis(keep_alive_secs as u64 * 1500));
        self.client_id = Some(client_id);
        Ok(())
    }

    /// Serve the connection until the device leaves or breaks protocol
    pub async fn serve(mut self, registry: SessionRegistry) {
        while let Some(packet) = self.recv().await {
            let Some(client_id) = self.client_id.clone() else {
                match packet {
                    Packet::Connect {
                        client_id,
                        keep_alive_secs,
                        ..
                    } => {
                        if let Err(e) = self.accept_connect(&registry, client_id, keep_alive_secs).await {
                            warn!("[BROKER] Refused {}: {}", self.addr, e);
                            break;
                        }
                        continue;
                    }
                    other => {
                        warn!("[BROKER] {} sent {:?} before CONNECT", self.addr, other);
                        break;
                    }
                }
            };

            match packet {
                Packet::Publish { topic, payload, .. } => {
                    handle_publish(&registry, &client_id, &topic, &payload).await;
                }
                Packet::PingReq => {
                    if let Err(e) = self.send(&Packet::PingResp).await {
                        warn!("[BROKER] Write error to {}: {}", self.addr, e);
                        break;
                    }
                }
                Packet::Disconnect => {
                    info!("[BROKER] {} disconnected", client_id);
                    break;
                }
                Packet::Connect { .. } => {
                    warn!("[BROKER] {} sent a second CONNECT", client_id);
                    break;
                }
                other => debug!("[BROKER] Ignoring {:?} from {}", other, client_id),
            }
        }

        match &self.client_id {
            Some(id) => {
                registry.unregister(id, self.addr).await;
                debug!("[BROKER] Session {} closed", id);
            }
            None => debug!("[BROKER] {} closed before CONNECT", self.addr),
        }
    }
}

/// Validate and log one published record
async fn handle_publish(registry: &SessionRegistry, client_id: &str, topic: &str, payload: &[u8]) {
    let record = match wire::decode(payload) {
        Ok(record) => record,
        Err(e) => {
            registry.reject(client_id).await;
            warn!("[BROKER] Rejected payload on {} from {}: {}", topic, client_id, e);
            return;
        }
    };

    if let RecordOrder::Backwards { previous } = registry.record(client_id, record.ts_ms).await {
        warn!(
            "[BROKER] {} ts_ms went backwards: {} after {}",
            client_id, record.ts_ms, previous
        );
    }

    info!(
        "[BROKER] {} {} acc=({:.3}, {:.3}, {:.3}) |a|={:.3} gyro=({:.3}, {:.3}, {:.3}) temp={:.2} ts={}",
        topic,
        client_id,
        record.acc_x,
        record.acc_y,
        record.acc_z,
        record.acc_magnitude(),
        record.gyro_x,
        record.gyro_y,
        record.gyro_z,
        record.temp,
        record.ts_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::net::TcpListener;
    use tremor_shared::SampleRecord;

    /// Broker serving a single connection, plus the device side of it
    async fn connected_pair() -> (TcpStream, SessionRegistry, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = SessionRegistry::new();

        let served = registry.clone();
        let handle = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            DeviceSession::new(stream, peer).serve(served).await;
        });

        let device = TcpStream::connect(addr).await.unwrap();
        (device, registry, handle)
    }

    async fn send(device: &mut TcpStream, packet: Packet) {
        device.write_all(&codec::encode(&packet).unwrap()).await.unwrap();
    }

    async fn expect(device: &mut TcpStream, decoder: &mut FrameDecoder) -> Option<Packet> {
        let mut buf = [0u8; 256];
        loop {
            if let Some(packet) = decoder.decode_next().unwrap() {
                return Some(packet);
            }
            let n = device.read(&mut buf).await.unwrap();
            if n == 0 {
                return None;
            }
            decoder.extend(&buf[..n]);
        }
    }

    fn connect(client_id: &str) -> Packet {
        Packet::Connect {
            client_id: client_id.into(),
            keep_alive_secs: 15,
            clean_session: true,
        }
    }

    fn publish(record: &SampleRecord) -> Packet {
        Packet::Publish {
            topic: "parkinson/mpu6050".into(),
            payload: wire::encode(record).unwrap(),
            retain: false,
        }
    }

    #[tokio::test]
    async fn test_session_records_and_pings() {
        let (mut device, registry, _broker) = connected_pair().await;
        let mut decoder = FrameDecoder::new();

        send(&mut device, connect("esp32_mpu_0badf00d")).await;
        assert_eq!(
            expect(&mut device, &mut decoder).await,
            Some(Packet::ConnAck {
                session_present: false,
                code: ConnectReturnCode::Accepted
            })
        );

        send(&mut device, publish(&SampleRecord::at(80))).await;
        send(&mut device, publish(&SampleRecord::at(40))).await;
        send(
            &mut device,
            Packet::Publish {
                topic: "parkinson/mpu6050".into(),
                payload: Bytes::from_static(b"{\"acc_x\":1.0}"),
                retain: false,
            },
        )
        .await;

        // The ping answer orders after every earlier packet
        send(&mut device, Packet::PingReq).await;
        assert_eq!(expect(&mut device, &mut decoder).await, Some(Packet::PingResp));

        let info = registry.get_info("esp32_mpu_0badf00d").await.unwrap();
        assert_eq!(info.records, 2);
        assert_eq!(info.out_of_order, 1);
        assert_eq!(info.rejected, 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_session() {
        let (mut device, registry, broker) = connected_pair().await;
        let mut decoder = FrameDecoder::new();

        send(&mut device, connect("esp32_mpu_1")).await;
        expect(&mut device, &mut decoder).await;
        assert_eq!(registry.count().await, 1);

        send(&mut device, Packet::Disconnect).await;
        broker.await.unwrap();
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_before_connect_closes() {
        let (mut device, registry, broker) = connected_pair().await;
        let mut decoder = FrameDecoder::new();

        send(&mut device, publish(&SampleRecord::at(0))).await;
        assert_eq!(expect(&mut device, &mut decoder).await, None);
        broker.await.unwrap();
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_client_id_rejected() {
        let (mut device, _registry, _broker) = connected_pair().await;
        let mut decoder = FrameDecoder::new();

        send(&mut device, connect("")).await;
        assert_eq!(
            expect(&mut device, &mut decoder).await,
            Some(Packet::ConnAck {
                session_present: false,
                code: ConnectReturnCode::IdentifierRejected
            })
        );
        assert_eq!(expect(&mut device, &mut decoder).await, None);
    }

    #[tokio::test]
    async fn test_bare_connect_and_close_leaves_no_session() {
        let (device, registry, broker) = connected_pair().await;

        // A reachability check: open the socket, send nothing, close it
        drop(device);

        tokio::time::timeout(Duration::from_secs(1), broker)
            .await
            .expect("session outlived the closed socket")
            .unwrap();
        assert_eq!(registry.count().await, 0);
    }
}
