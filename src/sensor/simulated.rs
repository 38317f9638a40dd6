//! Simulated 6-axis IMU
//!
//! Produces a resting-hand signal: gravity on Z, a small 5 Hz tremor on the
//! horizontal axes and matching angular-rate oscillation, with a die
//! temperature that warms up slowly. Values are attenuated by the configured
//! low-pass bandwidth and clamped to the configured full-scale ranges.

use super::{MotionReading, SampleSource, SensorError};
use crate::config::{SensorConfig, STANDARD_GRAVITY};
use std::f32::consts::TAU;
use std::time::Instant;

/// Dominant tremor frequency
const TREMOR_HZ: f32 = 5.0;
/// Tremor acceleration amplitude in m/s²
const TREMOR_ACCEL: f32 = 0.35;
/// Tremor angular-rate amplitude in rad/s
const TREMOR_GYRO: f32 = 0.12;

const TEMP_START_C: f32 = 29.0;
const TEMP_SETTLED_C: f32 = 33.5;
/// Warm-up time constant in seconds
const TEMP_TAU_S: f32 = 300.0;

pub struct SimulatedImu {
    attached: bool,
    config: Option<SensorConfig>,
    started: Instant,
}

impl SimulatedImu {
    /// A sensor that is present on the bus
    pub fn new() -> Self {
        Self {
            attached: true,
            config: None,
            started: Instant::now(),
        }
    }

    /// A sensor that fails to answer the probe
    #[cfg(test)]
    pub fn detached() -> Self {
        Self {
            attached: false,
            ..Self::new()
        }
    }

    /// Reading at `t` seconds after init
    fn reading_at(config: &SensorConfig, t: f32) -> MotionReading {
        let cutoff = config.filter_bandwidth.cutoff_hz();
        let gain = 1.0 / (1.0 + (TREMOR_HZ / cutoff).powi(2)).sqrt();
        let phase = TAU * TREMOR_HZ * t;

        let accel_limit = config.accel_range.limit_mps2();
        let gyro_limit = config.gyro_range.limit_rad_s();
        let clamp_a = |v: f32| v.clamp(-accel_limit, accel_limit);
        let clamp_g = |v: f32| v.clamp(-gyro_limit, gyro_limit);

        let accel = [
            clamp_a(gain * TREMOR_ACCEL * phase.sin()),
            clamp_a(gain * TREMOR_ACCEL * 0.6 * (phase + 0.9).sin()),
            clamp_a(STANDARD_GRAVITY + gain * TREMOR_ACCEL * 0.2 * (2.0 * phase).sin()),
        ];
        let gyro = [
            clamp_g(gain * TREMOR_GYRO * phase.cos()),
            clamp_g(gain * TREMOR_GYRO * 0.7 * (phase + 0.4).cos()),
            clamp_g(gain * TREMOR_GYRO * 0.3 * (phase + 1.3).sin()),
        ];
        let temp_c =
            TEMP_SETTLED_C - (TEMP_SETTLED_C - TEMP_START_C) * (-t / TEMP_TAU_S).exp();

        MotionReading {
            accel,
            gyro,
            temp_c,
        }
    }
}

impl Default for SimulatedImu {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for SimulatedImu {
    fn init(&mut self, config: &SensorConfig) -> Result<(), SensorError> {
        if !self.attached {
            return Err(SensorError::NotFound);
        }
        self.config = Some(config.clone());
        self.started = Instant::now();
        Ok(())
    }

    fn read(&mut self) -> Result<MotionReading, SensorError> {
        let config = self.config.as_ref().ok_or(SensorError::NotInitialized)?;
        let t = self.started.elapsed().as_secs_f32();
        Ok(Self::reading_at(config, t))
    }

    fn name(&self) -> &'static str {
        "simulated-mpu6050"
    }
}
