//! Pipeline event reporting
//!
//! Every recoverable condition is reported as a `PipelineEvent`. Each kind
//! has its own stable code, its own counter in `PipelineStats`, and is logged
//! at a level matching its severity. Observers (tests, diagnostics) can also
//! subscribe to the raw event stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events reported by the pipeline tasks
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Sample dropped because the queue was full
    QueueFull { ts_ms: u64 },
    /// Sensor read failed; no sample this cycle
    SensorReadFailed { reason: String },
    /// Publisher could not get the client lock in time; record dropped
    ResourceBusy { ts_ms: u64 },
    /// Network link observed down
    LinkDown,
    /// Link came back within the repair window
    LinkRestored { polls: u32 },
    /// Link still down after every repair poll
    LinkRepairExhausted { polls: u32 },
    /// Messaging client connected
    ClientConnected,
    /// Messaging client connect attempt failed
    ClientConnectFailed { reason: String },
    /// Record skipped because the client is unavailable
    ClientUnavailable { ts_ms: u64 },
    /// Record could not be serialized
    EncodeFailed { ts_ms: u64, reason: String },
    /// Record handed to the client
    Published { ts_ms: u64, bytes: usize },
    /// Client rejected or failed to send the record
    TransmitFailed { ts_ms: u64, reason: String },
}

impl PipelineEvent {
    /// Stable reporting code
    pub fn code(&self) -> &'static str {
        match self {
            PipelineEvent::QueueFull { .. } => "queue_full",
            PipelineEvent::SensorReadFailed { .. } => "sensor_read_failed",
            PipelineEvent::ResourceBusy { .. } => "resource_busy",
            PipelineEvent::LinkDown => "link_down",
            PipelineEvent::LinkRestored { .. } => "link_restored",
            PipelineEvent::LinkRepairExhausted { .. } => "link_repair_exhausted",
            PipelineEvent::ClientConnected => "client_connected",
            PipelineEvent::ClientConnectFailed { .. } => "client_connect_failed",
            PipelineEvent::ClientUnavailable { .. } => "client_unavailable",
            PipelineEvent::EncodeFailed { .. } => "encode_failed",
            PipelineEvent::Published { .. } => "published",
            PipelineEvent::TransmitFailed { .. } => "transmit_failed",
        }
    }

    fn log(&self) {
        let code = self.code();
        match self {
            PipelineEvent::QueueFull { ts_ms } => {
                warn!(code, ts_ms, "[SAMPLER] Queue full, sample dropped");
            }
            PipelineEvent::SensorReadFailed { reason } => {
                warn!(code, "[SAMPLER] Sensor read failed: {}", reason);
            }
            PipelineEvent::ResourceBusy { ts_ms } => {
                warn!(code, ts_ms, "[PUBLISHER] Timed out waiting for client lock");
            }
            PipelineEvent::LinkDown => {
                warn!(code, "[LINK] Link down, reconnecting");
            }
            PipelineEvent::LinkRestored { polls } => {
                info!(code, polls, "[LINK] Link restored");
            }
            PipelineEvent::LinkRepairExhausted { polls } => {
                warn!(code, polls, "[LINK] Reconnect failed, will retry");
            }
            PipelineEvent::ClientConnected => {
                info!(code, "[MQTT] Connected to broker");
            }
            PipelineEvent::ClientConnectFailed { reason } => {
                warn!(code, "[MQTT] Connect failed: {}", reason);
            }
            PipelineEvent::ClientUnavailable { ts_ms } => {
                debug!(code, ts_ms, "[PUBLISHER] Client unavailable, record skipped");
            }
            PipelineEvent::EncodeFailed { ts_ms, reason } => {
                warn!(code, ts_ms, "[PUBLISHER] Encode failed: {}", reason);
            }
            PipelineEvent::Published { ts_ms, bytes } => {
                debug!(code, ts_ms, bytes, "[PUBLISHER] Publish OK");
            }
            PipelineEvent::TransmitFailed { ts_ms, reason } => {
                warn!(code, ts_ms, "[PUBLISHER] Publish FAIL: {}", reason);
            }
        }
    }
}

/// Per-event counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub queue_full: AtomicU64,
    pub sensor_read_failed: AtomicU64,
    pub resource_busy: AtomicU64,
    pub link_down: AtomicU64,
    pub link_restored: AtomicU64,
    pub link_repair_exhausted: AtomicU64,
    pub client_connected: AtomicU64,
    pub client_connect_failed: AtomicU64,
    pub client_unavailable: AtomicU64,
    pub encode_failed: AtomicU64,
    pub published: AtomicU64,
    pub transmit_failed: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub queue_full: u64,
    pub sensor_read_failed: u64,
    pub resource_busy: u64,
    pub link_down: u64,
    pub link_restored: u64,
    pub link_repair_exhausted: u64,
    pub client_connected: u64,
    pub client_connect_failed: u64,
    pub client_unavailable: u64,
    pub encode_failed: u64,
    pub published: u64,
    pub transmit_failed: u64,
}

impl StatsSnapshot {
    /// Records that left the pipeline without reaching the client
    pub fn dropped(&self) -> u64 {
        self.queue_full
            + self.resource_busy
            + self.client_unavailable
            + self.encode_failed
            + self.transmit_failed
    }
}

impl PipelineStats {
    fn counter(&self, event: &PipelineEvent) -> &AtomicU64 {
        match event {
            PipelineEvent::QueueFull { .. } => &self.queue_full,
            PipelineEvent::SensorReadFailed { .. } => &self.sensor_read_failed,
            PipelineEvent::ResourceBusy { .. } => &self.resource_busy,
            PipelineEvent::LinkDown => &self.link_down,
            PipelineEvent::LinkRestored { .. } => &self.link_restored,
            PipelineEvent::LinkRepairExhausted { .. } => &self.link_repair_exhausted,
            PipelineEvent::ClientConnected => &self.client_connected,
            PipelineEvent::ClientConnectFailed { .. } => &self.client_connect_failed,
            PipelineEvent::ClientUnavailable { .. } => &self.client_unavailable,
            PipelineEvent::EncodeFailed { .. } => &self.encode_failed,
            PipelineEvent::Published { .. } => &self.published,
            PipelineEvent::TransmitFailed { .. } => &self.transmit_failed,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            queue_full: load(&self.queue_full),
            sensor_read_failed: load(&self.sensor_read_failed),
            resource_busy: load(&self.resource_busy),
            link_down: load(&self.link_down),
            link_restored: load(&self.link_restored),
            link_repair_exhausted: load(&self.link_repair_exhausted),
            client_connected: load(&self.client_connected),
            client_connect_failed: load(&self.client_connect_failed),
            client_unavailable: load(&self.client_unavailable),
            encode_failed: load(&self.encode_failed),
            published: load(&self.published),
            transmit_failed: load(&self.transmit_failed),
        }
    }
}

/// The "report event" sink shared by all tasks
///
/// Reporting never blocks: counters are atomics, the observer channel is
/// unbounded, and logging goes through the non-blocking writer set up in
/// `main`.
#[derive(Clone, Default)]
pub struct EventReporter {
    stats: Arc<PipelineStats>,
    observer: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventReporter {
    /// Create a reporter that only logs and counts
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reporter that also forwards every event to a receiver
    #[cfg(test)]
    pub fn with_observer() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Self {
            stats: Arc::new(PipelineStats::default()),
            observer: Some(tx),
        };
        (reporter, rx)
    }

    /// Report one event
    pub fn report(&self, event: PipelineEvent) {
        event.log();
        self.stats.counter(&event).fetch_add(1, Ordering::Relaxed);

        if let Some(tx) = &self.observer {
            // A gone observer is not an error for the pipeline
            let _ = tx.send(event);
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Log a health summary of the counters
    pub fn log_summary(&self) {
        let s = self.stats();
        info!(
            published = s.published,
            dropped = s.dropped(),
            queue_full = s.queue_full,
            resource_busy = s.resource_busy,
            transmit_failed = s.transmit_failed,
            client_connect_failed = s.client_connect_failed,
            link_down = s.link_down,
            link_restored = s.link_restored,
            link_repair_exhausted = s.link_repair_exhausted,
            client_connected = s.client_connected,
            sensor_read_failed = s.sensor_read_failed,
            "[STATS] Pipeline summary"
        );
    }
}
