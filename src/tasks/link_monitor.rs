//! Link monitor task
//!
//! Periodically checks the network link and runs a bounded repair when it
//! is down. Works on the link's own atomic status only; it never takes the
//! publisher lock and never touches the messaging client.

use crate::config::LinkMonitorConfig;
use crate::link::NetworkLink;
use crate::report::{EventReporter, PipelineEvent};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info};

/// Result of one health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    AlreadyUp,
    Restored { polls: u32 },
    Exhausted { polls: u32 },
}

pub struct LinkMonitorTask {
    link: Arc<dyn NetworkLink>,
    reporter: EventReporter,
    config: LinkMonitorConfig,
}

impl LinkMonitorTask {
    pub fn new(link: Arc<dyn NetworkLink>, reporter: EventReporter, config: LinkMonitorConfig) -> Self {
        Self {
            link,
            reporter,
            config,
        }
    }

    /// Check the link once and, if it is down, request a reconnect and poll
    /// for at most `max_polls` intervals
    pub async fn repair_once(&self) -> RepairOutcome {
        if self.link.is_connected() {
            return RepairOutcome::AlreadyUp;
        }

        self.reporter.report(PipelineEvent::LinkDown);
        self.link.request_reconnect();

        let mut polls = 0;
        while polls < self.config.max_polls {
            sleep(self.config.poll_interval).await;
            polls += 1;

            let status = self.link.status();
            debug!("[LINK] Reconnect poll {}/{}: {:?}", polls, self.config.max_polls, status);
            if status.is_connected() {
                self.reporter.report(PipelineEvent::LinkRestored { polls });
                return RepairOutcome::Restored { polls };
            }
        }

        self.reporter.report(PipelineEvent::LinkRepairExhausted { polls });
        RepairOutcome::Exhausted { polls }
    }

    /// Run forever: one check, then wait the monitor interval
    pub async fn run(self) {
        info!(
            "[LINK] Monitoring {} every {:?}",
            self.link.name(),
            self.config.interval
        );

        loop {
            self.repair_once().await;
            sleep(self.config.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LinkScript, MockLink};
    use std::time::Duration;
    use tokio::time::Instant;

    fn monitor(link: Arc<MockLink>) -> (LinkMonitorTask, EventReporter) {
        let reporter = EventReporter::new();
        let task = LinkMonitorTask::new(link, reporter.clone(), LinkMonitorConfig::default());
        (task, reporter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_up_is_left_alone() {
        let link = MockLink::up();
        let (task, reporter) = monitor(link.clone());

        assert_eq!(task.repair_once().await, RepairOutcome::AlreadyUp);
        assert_eq!(link.reconnect_requests(), 0);
        assert_eq!(reporter.stats().link_down, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_gives_up_after_max_polls() {
        let link = MockLink::down(LinkScript::Never);
        let (task, reporter) = monitor(link.clone());

        let start = Instant::now();
        let outcome = task.repair_once().await;

        assert_eq!(outcome, RepairOutcome::Exhausted { polls: 20 });
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(link.reconnect_requests(), 1);
        // One check before the repair plus one read per poll
        assert_eq!(link.status_reads(), 21);
        assert_eq!(reporter.stats().link_repair_exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_stops_when_link_returns() {
        let link = MockLink::down(LinkScript::UpAfter(3));
        let (task, reporter) = monitor(link.clone());

        let start = Instant::now();
        let outcome = task.repair_once().await;

        assert_eq!(outcome, RepairOutcome::Restored { polls: 4 });
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
        assert_eq!(reporter.stats().link_restored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_checks_on_interval() {
        let link = MockLink::up();
        let (task, reporter) = monitor(link.clone());

        let runner = tokio::spawn(task.run());
        tokio::time::sleep(Duration::from_secs(15)).await;

        link.drop_link();
        // Next check at 20 s finds the link down and repairs it
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(link.reconnect_requests(), 1);
        assert_eq!(reporter.stats().link_down, 1);
        assert_eq!(reporter.stats().link_restored, 1);
        assert!(link.is_connected());
        runner.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_does_not_block_other_tasks() {
        let link = MockLink::down(LinkScript::Never);
        let (task, _reporter) = monitor(link);

        let repair = tokio::spawn(async move { task.repair_once().await });

        let ticks = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = ticks.clone();
        let other = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(40)).await;
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let outcome = repair.await.unwrap();
        assert_eq!(outcome, RepairOutcome::Exhausted { polls: 20 });
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) >= 249);
        other.abort();
    }
}
