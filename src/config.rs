//! Device configuration
//!
//! Everything here is fixed once the device has started. `main` builds a
//! `DeviceConfig` from the defaults, applying deploy-time environment
//! overrides before any task is spawned.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tremor_shared::{broker, timing};

/// A sensor setting that names no supported value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported {setting} '{value}'")]
pub struct UnsupportedSetting {
    pub setting: &'static str,
    pub value: String,
}

fn unsupported(setting: &'static str, value: &str) -> UnsupportedSetting {
    UnsupportedSetting {
        setting,
        value: value.to_string(),
    }
}

/// Link-layer credentials and startup behaviour
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name to join
    pub ssid: String,
    /// Network passphrase
    pub passphrase: String,
    /// Address the link layer probes to decide whether it is up
    pub probe_address: String,
    /// Timeout for a single probe
    pub probe_timeout: Duration,
    /// How often the link re-probes on its own once started
    pub watch_interval: Duration,
    /// Startup connect timeout; exceeding it restarts the device
    pub connect_timeout: Duration,
    /// Status poll interval while waiting at startup
    pub startup_poll: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: "tremor-lab".into(),
            passphrase: String::new(),
            probe_address: format!("127.0.0.1:{}", broker::DEFAULT_PORT),
            probe_timeout: Duration::from_secs(2),
            watch_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_millis(timing::INITIAL_LINK_TIMEOUT_MS),
            startup_poll: Duration::from_millis(timing::INITIAL_LINK_POLL_MS),
        }
    }
}

/// Messaging-client (MQTT) settings
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host name or IP
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Topic every record is published to
    pub topic: String,
    /// Prefix of the generated client identifier
    pub client_id_prefix: String,
    /// Keep-alive advertised to the broker
    pub keep_alive: Duration,
    /// Bound on one connect attempt (TCP + CONNACK)
    pub connect_timeout: Duration,
    /// Bound on writing one packet to the broker socket
    pub write_timeout: Duration,
}

impl BrokerConfig {
    /// `host:port` string for socket connects
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: broker::DEFAULT_PORT,
            topic: broker::DEFAULT_TOPIC.into(),
            client_id_prefix: broker::CLIENT_ID_PREFIX.into(),
            keep_alive: Duration::from_secs(broker::KEEP_ALIVE_SECS as u64),
            connect_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(1),
        }
    }
}

/// Sampling and publishing cadence
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sampling period
    pub sample_period: Duration,
    /// Sample queue capacity
    pub queue_capacity: usize,
    /// Publisher wait for a record before idling
    pub recv_timeout: Duration,
    /// Publisher wait for the client lock
    pub lock_timeout: Duration,
    /// Yield after every publisher iteration
    pub post_cycle_delay: Duration,
    /// Backoff after a failed client connect
    pub client_backoff: Duration,
    /// Interval of the pipeline health summary
    pub stats_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_millis(timing::SAMPLE_PERIOD_MS),
            queue_capacity: timing::QUEUE_CAPACITY,
            recv_timeout: Duration::from_millis(timing::RECV_TIMEOUT_MS),
            lock_timeout: Duration::from_millis(timing::LOCK_TIMEOUT_MS),
            post_cycle_delay: Duration::from_millis(timing::POST_CYCLE_DELAY_MS),
            client_backoff: Duration::from_millis(timing::CLIENT_RECONNECT_BACKOFF_MS),
            stats_interval: Duration::from_secs(60),
        }
    }
}

/// Link monitor cadence
#[derive(Debug, Clone)]
pub struct LinkMonitorConfig {
    /// Interval between health checks
    pub interval: Duration,
    /// Poll interval while waiting for a repair
    pub poll_interval: Duration,
    /// Polls per repair attempt
    pub max_polls: u32,
}

impl Default for LinkMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(timing::LINK_MONITOR_INTERVAL_MS),
            poll_interval: Duration::from_millis(timing::LINK_POLL_INTERVAL_MS),
            max_polls: timing::LINK_POLL_ATTEMPTS,
        }
    }
}

/// Accelerometer full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelRange {
    G2,
    G4,
    G8,
    G16,
}

impl AccelRange {
    /// Full-scale value in m/s²
    pub fn limit_mps2(self) -> f32 {
        let g = match self {
            AccelRange::G2 => 2.0,
            AccelRange::G4 => 4.0,
            AccelRange::G8 => 8.0,
            AccelRange::G16 => 16.0,
        };
        g * STANDARD_GRAVITY
    }
}

impl FromStr for AccelRange {
    type Err = UnsupportedSetting;

    /// `2g`, `4g`, `8g` or `16g`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2g" => Ok(AccelRange::G2),
            "4g" => Ok(AccelRange::G4),
            "8g" => Ok(AccelRange::G8),
            "16g" => Ok(AccelRange::G16),
            _ => Err(unsupported("accelerometer range", s)),
        }
    }
}

/// Gyroscope full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GyroRange {
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
}

impl GyroRange {
    /// Full-scale value in rad/s
    pub fn limit_rad_s(self) -> f32 {
        let dps = match self {
            GyroRange::Dps250 => 250.0_f32,
            GyroRange::Dps500 => 500.0,
            GyroRange::Dps1000 => 1000.0,
            GyroRange::Dps2000 => 2000.0,
        };
        dps.to_radians()
    }
}

impl FromStr for GyroRange {
    type Err = UnsupportedSetting;

    /// Degrees per second: `250`, `500`, `1000` or `2000`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "250" => Ok(GyroRange::Dps250),
            "500" => Ok(GyroRange::Dps500),
            "1000" => Ok(GyroRange::Dps1000),
            "2000" => Ok(GyroRange::Dps2000),
            _ => Err(unsupported("gyroscope range", s)),
        }
    }
}

/// Digital low-pass filter bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterBandwidth {
    Hz260,
    Hz184,
    Hz94,
    Hz44,
    Hz21,
    Hz10,
    Hz5,
}

impl FilterBandwidth {
    pub fn cutoff_hz(self) -> f32 {
        match self {
            FilterBandwidth::Hz260 => 260.0,
            FilterBandwidth::Hz184 => 184.0,
            FilterBandwidth::Hz94 => 94.0,
            FilterBandwidth::Hz44 => 44.0,
            FilterBandwidth::Hz21 => 21.0,
            FilterBandwidth::Hz10 => 10.0,
            FilterBandwidth::Hz5 => 5.0,
        }
    }
}

impl FromStr for FilterBandwidth {
    type Err = UnsupportedSetting;

    /// Cutoff in Hz, one of the steps the filter supports
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "260" => Ok(FilterBandwidth::Hz260),
            "184" => Ok(FilterBandwidth::Hz184),
            "94" => Ok(FilterBandwidth::Hz94),
            "44" => Ok(FilterBandwidth::Hz44),
            "21" => Ok(FilterBandwidth::Hz21),
            "10" => Ok(FilterBandwidth::Hz10),
            "5" => Ok(FilterBandwidth::Hz5),
            _ => Err(unsupported("filter bandwidth", s)),
        }
    }
}

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f32 = 9.80665;

/// Sensor configuration applied at init
#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
    pub filter_bandwidth: FilterBandwidth,
    /// Settle time after configuration
    pub settle: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            accel_range: AccelRange::G8,
            gyro_range: GyroRange::Dps500,
            filter_bandwidth: FilterBandwidth::Hz21,
            settle: Duration::from_millis(timing::SENSOR_SETTLE_MS),
        }
    }
}

/// Complete device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Identifier of this device, also the seed of the MQTT client id
    pub device_id: String,
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    pub pipeline: PipelineConfig,
    pub monitor: LinkMonitorConfig,
    pub sensor: SensorConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "tremor-001".into(),
            network: NetworkConfig::default(),
            broker: BrokerConfig::default(),
            pipeline: PipelineConfig::default(),
            monitor: LinkMonitorConfig::default(),
            sensor: SensorConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Apply deploy-time overrides from a variable lookup
    ///
    /// Unknown or unparsable values leave the default in place.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("TREMOR_DEVICE_ID") {
            self.device_id = id;
        }
        if let Some(ssid) = lookup("TREMOR_WIFI_SSID") {
            self.network.ssid = ssid;
        }
        if let Some(pass) = lookup("TREMOR_WIFI_PASS") {
            self.network.passphrase = pass;
        }
        if let Some(host) = lookup("TREMOR_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("TREMOR_BROKER_PORT").and_then(|p| p.parse().ok()) {
            self.broker.port = port;
        }
        if let Some(topic) = lookup("TREMOR_TOPIC") {
            self.broker.topic = topic;
        }
        if let Some(range) = lookup("TREMOR_ACCEL_RANGE").and_then(|v| v.parse().ok()) {
            self.sensor.accel_range = range;
        }
        if let Some(range) = lookup("TREMOR_GYRO_RANGE").and_then(|v| v.parse().ok()) {
            self.sensor.gyro_range = range;
        }
        if let Some(bandwidth) = lookup("TREMOR_FILTER_HZ").and_then(|v| v.parse().ok()) {
            self.sensor.filter_bandwidth = bandwidth;
        }
        if let Some(probe) = lookup("TREMOR_PROBE_ADDR") {
            self.network.probe_address = probe;
        } else {
            // Without a dedicated gateway the broker itself is the probe target
            self.network.probe_address = self.broker.address();
        }
        self
    }

    /// Apply overrides from the process environment
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DeviceConfig::default();
        assert_eq!(config.pipeline.sample_period, Duration::from_millis(40));
        assert_eq!(config.pipeline.queue_capacity, 10);
        assert_eq!(config.pipeline.lock_timeout, Duration::from_millis(100));
        assert_eq!(config.monitor.max_polls, 20);
        assert_eq!(config.network.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.broker.address(), "127.0.0.1:1883");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TREMOR_BROKER_HOST", "10.0.0.5"),
            ("TREMOR_BROKER_PORT", "11883"),
            ("TREMOR_TOPIC", "lab/imu"),
        ]
        .into_iter()
        .collect();

        let config =
            DeviceConfig::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.broker.address(), "10.0.0.5:11883");
        assert_eq!(config.broker.topic, "lab/imu");
        assert_eq!(config.network.probe_address, "10.0.0.5:11883");
        // Cadence is never overridable
        assert_eq!(config.pipeline.sample_period, Duration::from_millis(40));
    }

    #[test]
    fn test_bad_port_keeps_default() {
        let config = DeviceConfig::default().with_overrides(|k| {
            (k == "TREMOR_BROKER_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(config.broker.port, 1883);
    }

    #[test]
    fn test_sensor_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TREMOR_ACCEL_RANGE", "16G"),
            ("TREMOR_GYRO_RANGE", "2000"),
            ("TREMOR_FILTER_HZ", "44"),
        ]
        .into_iter()
        .collect();

        let config =
            DeviceConfig::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.sensor.accel_range, AccelRange::G16);
        assert_eq!(config.sensor.gyro_range, GyroRange::Dps2000);
        assert_eq!(config.sensor.filter_bandwidth, FilterBandwidth::Hz44);
    }

    #[test]
    fn test_unsupported_sensor_setting_keeps_default() {
        let config = DeviceConfig::default().with_overrides(|k| {
            (k == "TREMOR_FILTER_HZ").then(|| "30".to_string())
        });
        assert_eq!(config.sensor.filter_bandwidth, FilterBandwidth::Hz21);

        let err = "3g".parse::<AccelRange>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported accelerometer range '3g'");
    }

    #[test]
    fn test_every_setting_parses() {
        let accel: Vec<AccelRange> = ["2g", "4g", "8g", "16g"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(accel, vec![AccelRange::G2, AccelRange::G4, AccelRange::G8, AccelRange::G16]);

        for (text, hz) in [("250", 250.0_f32), ("1000", 1000.0)] {
            let range: GyroRange = text.parse().unwrap();
            assert!((range.limit_rad_s() - hz.to_radians()).abs() < 1e-6);
        }

        for text in ["260", "184", "94", "44", "21", "10", "5"] {
            let bw: FilterBandwidth = text.parse().unwrap();
            assert_eq!(bw.cutoff_hz(), text.parse::<f32>().unwrap());
        }
    }

    #[test]
    fn test_sensor_ranges() {
        let sensor = SensorConfig::default();
        assert!((sensor.accel_range.limit_mps2() - 78.4532).abs() < 1e-3);
        assert!((sensor.gyro_range.limit_rad_s() - 8.7266).abs() < 1e-3);
    }
}
