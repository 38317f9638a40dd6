//! Drift-free periodic schedule and the device uptime clock

use std::time::Duration;
use tokio::time::Instant;

/// Wake targets computed from the previous target, never from "now"
///
/// A cycle that runs late shortens the following sleep instead of pushing
/// every later wake back, so the long-run rate stays at one cycle per period.
/// If a cycle overruns by more than a whole period the next target is
/// already in the past and the following cycle starts immediately.
#[derive(Debug, Clone)]
pub struct PeriodicSchedule {
    next: Instant,
    period: Duration,
}

impl PeriodicSchedule {
    pub fn new(start: Instant, period: Duration) -> Self {
        Self { next: start, period }
    }

    /// Move to the next wake target and return it
    pub fn advance(&mut self) -> Instant {
        self.next += self.period;
        self.next
    }
}

/// Milliseconds since the device started
#[derive(Debug, Clone, Copy)]
pub struct UptimeClock {
    origin: Instant,
}

impl UptimeClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}
