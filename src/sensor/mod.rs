//! Motion sensor collaborators
//!
//! The sampling task only needs a synchronous "read current sample" with a
//! bounded latency. Driver details stay behind `SampleSource`.

mod simulated;

pub use simulated::SimulatedImu;

use crate::config::SensorConfig;
use thiserror::Error;

/// One raw reading from the motion sensor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionReading {
    /// Acceleration in m/s²
    pub accel: [f32; 3],
    /// Angular rate in rad/s
    pub gyro: [f32; 3],
    /// Die temperature in °C
    pub temp_c: f32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Sensor not found on bus")]
    NotFound,

    #[error("Sensor not initialized")]
    NotInitialized,

    #[error("Sensor read failed: {0}")]
    Read(String),
}

/// A sensor driver producing one reading per call
pub trait SampleSource: Send {
    /// Probe and configure the device
    fn init(&mut self, config: &SensorConfig) -> Result<(), SensorError>;

    /// Read the current sample; must return within a bounded time
    fn read(&mut self) -> Result<MotionReading, SensorError>;

    /// Human-readable name for this sensor
    fn name(&self) -> &'static str;
}
