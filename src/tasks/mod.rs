//! The three pipeline tasks
//!
//! Each task is a plain struct built from the shared device context and
//! consumed by its `run` loop. The sampler gets an execution context of its
//! own; the publisher and the link monitor share one.

mod link_monitor;
mod publishing;
mod sampling;
mod schedule;

pub use link_monitor::LinkMonitorTask;
pub use publishing::PublishingTask;
pub use sampling::SamplingTask;
pub use schedule::UptimeClock;
