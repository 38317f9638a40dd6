//! Registry of connected device sessions

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Per-client bookkeeping
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub client_id: String,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// Records accepted
    pub records: u64,
    /// Payloads that failed validation
    pub rejected: u64,
    /// Records whose `ts_ms` was lower than the previous one
    pub out_of_order: u64,
    pub last_ts_ms: Option<u64>,
}

impl SessionInfo {
    fn new(client_id: String, addr: SocketAddr) -> Self {
        Self {
            client_id,
            addr,
            connected_at: Instant::now(),
            records: 0,
            rejected: 0,
            out_of_order: 0,
            last_ts_ms: None,
        }
    }
}

/// How a record's timestamp relates to the session's previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrder {
    InOrder,
    Backwards { previous: u64 },
    UnknownSession,
}

/// Client id -> session info, shared by all session tasks
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionInfo>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; returns true if it replaced one with the same id
    pub async fn register(&self, client_id: &str, addr: SocketAddr) -> bool {
        let info = SessionInfo::new(client_id.to_string(), addr);
        self.sessions
            .write()
            .await
            .insert(client_id.to_string(), info)
            .is_some()
    }

    /// Remove a session, unless another connection has taken the id over
    pub async fn unregister(&self, client_id: &str, addr: SocketAddr) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(client_id).is_some_and(|info| info.addr == addr) {
            sessions.remove(client_id);
        }
    }

    /// Count an accepted record and check its order
    pub async fn record(&self, client_id: &str, ts_ms: u64) -> RecordOrder {
        let mut sessions = self.sessions.write().await;
        let Some(info) = sessions.get_mut(client_id) else {
            return RecordOrder::UnknownSession;
        };

        info.records += 1;
        let order = match info.last_ts_ms {
            Some(previous) if ts_ms < previous => {
                info.out_of_order += 1;
                RecordOrder::Backwards { previous }
            }
            _ => RecordOrder::InOrder,
        };
        info.last_ts_ms = Some(ts_ms);
        order
    }

    /// Count a payload that failed validation
    pub async fn reject(&self, client_id: &str) {
        if let Some(info) = self.sessions.write().await.get_mut(client_id) {
            info.rejected += 1;
        }
    }

    pub async fn get_info(&self, client_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(client_id).cloned()
    }

    pub async fn connected_clients(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_record_order() {
        let registry = SessionRegistry::new();
        assert!(!registry.register("esp32_mpu_1", addr(5000)).await);

        assert_eq!(registry.record("esp32_mpu_1", 40).await, RecordOrder::InOrder);
        assert_eq!(registry.record("esp32_mpu_1", 40).await, RecordOrder::InOrder);
        assert_eq!(
            registry.record("esp32_mpu_1", 0).await,
            RecordOrder::Backwards { previous: 40 }
        );
        assert_eq!(registry.record("other", 0).await, RecordOrder::UnknownSession);

        let info = registry.get_info("esp32_mpu_1").await.unwrap();
        assert_eq!(info.records, 3);
        assert_eq!(info.out_of_order, 1);
        assert_eq!(info.last_ts_ms, Some(0));
    }

    #[tokio::test]
    async fn test_takeover_survives_old_unregister() {
        let registry = SessionRegistry::new();
        registry.register("esp32_mpu_1", addr(5000)).await;
        assert!(registry.register("esp32_mpu_1", addr(5001)).await);

        // The old connection closing must not remove the new session
        registry.unregister("esp32_mpu_1", addr(5000)).await;
        assert_eq!(registry.connected_clients().await, vec!["esp32_mpu_1"]);

        registry.unregister("esp32_mpu_1", addr(5001)).await;
        assert_eq!(registry.count().await, 0);
    }
}
