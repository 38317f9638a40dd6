//! Publishing task
//!
//! Drains the sample queue and delivers each record through the shared
//! publisher resource, repairing the messaging client on the way when it
//! has to. Every failure here is recoverable: the record is dropped,
//! reported, and the loop moves on.

use crate::config::PipelineConfig;
use crate::publisher::PublisherResource;
use crate::queue::SampleConsumer;
use crate::report::{EventReporter, PipelineEvent};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};
use tremor_shared::{wire, ConnectionState, SampleRecord};

/// What happened to one dequeued record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    TransmitFailed,
    /// Client still disconnected after the reconnect attempt
    ClientUnavailable,
    /// Lock not acquired within the timeout
    ResourceBusy,
    EncodeFailed,
}

pub struct PublishingTask {
    consumer: SampleConsumer,
    resource: Arc<PublisherResource>,
    reporter: EventReporter,
    topic: String,
    config: PipelineConfig,
}

impl PublishingTask {
    pub fn new(
        consumer: SampleConsumer,
        resource: Arc<PublisherResource>,
        reporter: EventReporter,
        topic: String,
        config: PipelineConfig,
    ) -> Self {
        Self {
            consumer,
            resource,
            reporter,
            topic,
            config,
        }
    }

    /// Deliver one record; the lock is held for the whole call once acquired
    pub async fn publish_one(&self, record: SampleRecord) -> PublishOutcome {
        let ts_ms = record.ts_ms;

        let mut slot = match self.resource.acquire().await {
            Ok(slot) => slot,
            Err(_) => {
                self.reporter.report(PipelineEvent::ResourceBusy { ts_ms });
                return PublishOutcome::ResourceBusy;
            }
        };

        let link = self.resource.link();
        if !link.is_connected() {
            // Best effort; the link monitor owns the bounded repair. The
            // record still goes through the client below.
            link.request_reconnect();
            self.reporter.report(PipelineEvent::LinkDown);
        }

        if slot.refresh() != ConnectionState::Connected {
            info!("[PUBLISHER] Reconnecting messaging client...");
            match slot.connect_once().await {
                Ok(()) => self.reporter.report(PipelineEvent::ClientConnected),
                Err(e) => {
                    self.reporter.report(PipelineEvent::ClientConnectFailed {
                        reason: e.to_string(),
                    });
                    debug!(
                        "[PUBLISHER] {} failed connect attempts, backing off {:?}",
                        slot.failed_attempts(),
                        self.config.client_backoff
                    );
                    sleep(self.config.client_backoff).await;
                }
            }

            if slot.state() != ConnectionState::Connected {
                self.reporter.report(PipelineEvent::ClientUnavailable { ts_ms });
                return PublishOutcome::ClientUnavailable;
            }
        }

        let payload = match wire::encode(&record) {
            Ok(payload) => payload,
            Err(e) => {
                self.reporter.report(PipelineEvent::EncodeFailed {
                    ts_ms,
                    reason: e.to_string(),
                });
                return PublishOutcome::EncodeFailed;
            }
        };
        debug!(
            "[PUBLISHER] Publishing -> {}",
            String::from_utf8_lossy(&payload)
        );

        let client = slot.client_mut();
        let outcome = match client.publish(&self.topic, &payload).await {
            Ok(()) => {
                self.reporter.report(PipelineEvent::Published {
                    ts_ms,
                    bytes: payload.len(),
                });
                PublishOutcome::Published
            }
            Err(e) => {
                self.reporter.report(PipelineEvent::TransmitFailed {
                    ts_ms,
                    reason: e.to_string(),
                });
                PublishOutcome::TransmitFailed
            }
        };

        if let Err(e) = client.poll().await {
            debug!("[MQTT] Maintenance step failed: {}", e);
        }
        slot.refresh();

        outcome
    }

    /// Run until the sampling side of the queue goes away
    pub async fn run(mut self) -> Result<()> {
        info!("[PUBLISHER] Publishing to topic {}", self.topic);
        let mut last_summary = Instant::now();

        loop {
            match self.consumer.pop_timeout(self.config.recv_timeout).await {
                Ok(Some(record)) => {
                    self.publish_one(record).await;
                }
                Ok(None) => {}
                Err(e) => return Err(anyhow!("[PUBLISHER] Stopping: {}", e)),
            }

            if last_summary.elapsed() >= self.config.stats_interval {
                self.reporter.log_summary();
                last_summary = Instant::now();
            }

            sleep(self.config.post_cycle_delay).await;
        }
    }
}
