//! Tremor Shared Types
//!
//! This crate provides the record type, the JSON wire format and the MQTT
//! packet codec shared by the telemetry device and the development broker.

pub mod codec;
pub mod state_machine;
pub mod wire;

pub use state_machine::{ConnectionEvent, ConnectionState, ConnectionStateMachine, TransitionResult};
pub use wire::WireError;

/// One motion sample as produced by the sampling task
///
/// Accelerations are in m/s², angular rates in rad/s, temperature in °C and
/// the timestamp in milliseconds since boot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleRecord {
    pub acc_x: f32,
    pub acc_y: f32,
    pub acc_z: f32,
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
    pub temp: f32,
    pub ts_ms: u64,
}

impl SampleRecord {
    /// Create a record from raw axis triples
    pub fn new(acc: [f32; 3], gyro: [f32; 3], temp: f32, ts_ms: u64) -> Self {
        Self {
            acc_x: acc[0],
            acc_y: acc[1],
            acc_z: acc[2],
            gyro_x: gyro[0],
            gyro_y: gyro[1],
            gyro_z: gyro[2],
            temp,
            ts_ms,
        }
    }

    /// Record with zeroed axes, used as a timestamp marker in tests and tools
    pub fn at(ts_ms: u64) -> Self {
        Self {
            ts_ms,
            ..Default::default()
        }
    }

    /// Acceleration vector magnitude in m/s²
    pub fn acc_magnitude(&self) -> f32 {
        (self.acc_x * self.acc_x + self.acc_y * self.acc_y + self.acc_z * self.acc_z).sqrt()
    }
}

/// Timing parameters for the pipeline
///
/// These are deploy-time constants; nothing adjusts them while running.
pub mod timing {
    /// Sampling period (25 Hz)
    pub const SAMPLE_PERIOD_MS: u64 = 40;

    /// Slots in the sample queue
    pub const QUEUE_CAPACITY: usize = 10;

    /// How long the publisher waits for a record before idling
    pub const RECV_TIMEOUT_MS: u64 = 1000;

    /// How long the publisher waits for the client lock
    pub const LOCK_TIMEOUT_MS: u64 = 100;

    /// Yield after every publisher iteration
    pub const POST_CYCLE_DELAY_MS: u64 = 10;

    /// Backoff after a failed messaging-client connect
    pub const CLIENT_RECONNECT_BACKOFF_MS: u64 = 2000;

    /// Link health check interval
    pub const LINK_MONITOR_INTERVAL_MS: u64 = 10_000;

    /// Poll interval while waiting for the link to come back
    pub const LINK_POLL_INTERVAL_MS: u64 = 500;

    /// Polls before the monitor gives up on one repair attempt
    pub const LINK_POLL_ATTEMPTS: u32 = 20;

    /// Startup link timeout; exceeding it restarts the device
    pub const INITIAL_LINK_TIMEOUT_MS: u64 = 20_000;

    /// Status poll interval while bringing the link up at startup
    pub const INITIAL_LINK_POLL_MS: u64 = 250;

    /// Settle time after configuring the sensor
    pub const SENSOR_SETTLE_MS: u64 = 100;
}

/// Broker defaults
pub mod broker {
    /// Standard unencrypted MQTT port
    pub const DEFAULT_PORT: u16 = 1883;

    /// Topic the device publishes samples to
    pub const DEFAULT_TOPIC: &str = "parkinson/mpu6050";

    /// Prefix for generated client identifiers
    pub const CLIENT_ID_PREFIX: &str = "esp32_mpu";

    /// Keep-alive advertised in CONNECT, in seconds
    pub const KEEP_ALIVE_SECS: u16 = 15;
}
