//! Sampling task
//!
//! Reads the sensor once per period and hands the record to the queue
//! without ever waiting on it. The only suspension point is the wait for the
//! next scheduled wake.

use super::schedule::{PeriodicSchedule, UptimeClock};
use crate::queue::{QueueError, SampleProducer};
use crate::report::{EventReporter, PipelineEvent};
use crate::sensor::SampleSource;
use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::info;
use tremor_shared::SampleRecord;

/// What one sampling cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Enqueued { ts_ms: u64 },
    Dropped { ts_ms: u64 },
    ReadFailed,
}

pub struct SamplingTask {
    source: Box<dyn SampleSource>,
    producer: SampleProducer,
    reporter: EventReporter,
    clock: UptimeClock,
    period: Duration,
}

impl SamplingTask {
    pub fn new(
        source: Box<dyn SampleSource>,
        producer: SampleProducer,
        reporter: EventReporter,
        clock: UptimeClock,
        period: Duration,
    ) -> Self {
        Self {
            source,
            producer,
            reporter,
            clock,
            period,
        }
    }

    /// One cycle: read, stamp, enqueue or drop
    ///
    /// Only a closed queue is an error; everything else is reported.
    pub fn sample_once(&mut self) -> Result<SampleOutcome, QueueError> {
        let reading = match self.source.read() {
            Ok(reading) => reading,
            Err(e) => {
                self.reporter.report(PipelineEvent::SensorReadFailed {
                    reason: e.to_string(),
                });
                return Ok(SampleOutcome::ReadFailed);
            }
        };

        let ts_ms = self.clock.now_ms();
        let record = SampleRecord::new(reading.accel, reading.gyro, reading.temp_c, ts_ms);

        match self.producer.try_push(record) {
            Ok(()) => Ok(SampleOutcome::Enqueued { ts_ms }),
            Err(QueueError::Full) => {
                self.reporter.report(PipelineEvent::QueueFull { ts_ms });
                Ok(SampleOutcome::Dropped { ts_ms })
            }
            Err(e) => Err(e),
        }
    }

    /// Run until the consumer side of the queue goes away
    pub async fn run(mut self) -> Result<()> {
        info!(
            "[SAMPLER] Sampling {} every {:?}",
            self.source.name(),
            self.period
        );

        let mut schedule = PeriodicSchedule::new(Instant::now(), self.period);
        loop {
            self.sample_once()
                .map_err(|e| anyhow!("[SAMPLER] Stopping: {}", e))?;
            sleep_until(schedule.advance()).await;
        }
    }
}
