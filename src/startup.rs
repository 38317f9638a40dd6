//! Device bring-up
//!
//! Sequential and fatal-on-failure, in this order: network link, messaging
//! client (failure tolerated, retried lazily by the publisher), sensor, queue
//! and publisher lock. The result is the context every task is built from.

use crate::config::DeviceConfig;
use crate::link::{LinkCredentials, NetworkLink};
use crate::mqtt::MessagingClient;
use crate::publisher::PublisherResource;
use crate::queue::{sample_queue, SampleConsumer, SampleProducer};
use crate::report::{EventReporter, PipelineEvent};
use crate::sensor::{SampleSource, SensorError};
use crate::tasks::{LinkMonitorTask, PublishingTask, SamplingTask, UptimeClock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Exit code asking the supervisor to restart the device
pub const EXIT_RESTART: i32 = 75;
/// Exit code for a halt
pub const EXIT_HALT: i32 = 1;

#[derive(Error, Debug)]
pub enum InitError {
    #[error("Network link not up after {0:?}")]
    LinkTimeout(Duration),

    #[error("Motion sensor not found, check the bus wiring")]
    SensorNotFound,

    #[error("Sensor init failed: {0}")]
    Sensor(SensorError),

    #[error("Resource allocation failed: {0}")]
    ResourceAllocation(String),
}

impl InitError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            InitError::LinkTimeout(_) => EXIT_RESTART,
            _ => EXIT_HALT,
        }
    }
}

/// Hardware and network handles handed to `bring_up`
pub struct Collaborators {
    pub link: Arc<dyn NetworkLink>,
    pub client: Box<dyn MessagingClient>,
    pub source: Box<dyn SampleSource>,
}

/// Everything the tasks share, created once and never torn down
pub struct DeviceContext {
    pub config: DeviceConfig,
    pub link: Arc<dyn NetworkLink>,
    pub source: Box<dyn SampleSource>,
    pub producer: SampleProducer,
    pub consumer: SampleConsumer,
    pub resource: Arc<PublisherResource>,
    pub reporter: EventReporter,
    pub clock: UptimeClock,
}

impl DeviceContext {
    /// Split the context into the three tasks
    pub fn into_tasks(self) -> (SamplingTask, PublishingTask, LinkMonitorTask) {
        let sampling = SamplingTask::new(
            self.source,
            self.producer,
            self.reporter.clone(),
            self.clock,
            self.config.pipeline.sample_period,
        );
        let publishing = PublishingTask::new(
            self.consumer,
            self.resource,
            self.reporter.clone(),
            self.config.broker.topic.clone(),
            self.config.pipeline.clone(),
        );
        let monitor = LinkMonitorTask::new(self.link, self.reporter, self.config.monitor.clone());

        (sampling, publishing, monitor)
    }
}

/// Join the network and wait for the link, polling its status
async fn wait_for_link(link: &dyn NetworkLink, config: &DeviceConfig) -> Result<(), InitError> {
    let network = &config.network;
    link.begin(&LinkCredentials {
        ssid: network.ssid.clone(),
        passphrase: network.passphrase.clone(),
    });

    let start = Instant::now();
    loop {
        if link.is_connected() {
            info!("[LINK] Link up after {:?}", start.elapsed());
            return Ok(());
        }
        if start.elapsed() >= network.connect_timeout {
            return Err(InitError::LinkTimeout(network.connect_timeout));
        }
        sleep(network.startup_poll).await;
    }
}

pub async fn bring_up(
    config: DeviceConfig,
    parts: Collaborators,
    reporter: EventReporter,
) -> Result<DeviceContext, InitError> {
    let clock = UptimeClock::start();
    let Collaborators {
        link,
        mut client,
        mut source,
    } = parts;

    wait_for_link(link.as_ref(), &config).await?;

    info!("[MQTT] Connecting {} to broker {}", client.name(), config.broker.address());
    match client.connect().await {
        Ok(()) => reporter.report(PipelineEvent::ClientConnected),
        Err(e) => {
            reporter.report(PipelineEvent::ClientConnectFailed {
                reason: e.to_string(),
            });
            warn!(
                "[MQTT] Continuing without broker, retrying in {:?}",
                config.pipeline.client_backoff
            );
            sleep(config.pipeline.client_backoff).await;
        }
    }

    info!("[SENSOR] Initializing {}", source.name());
    source.init(&config.sensor).map_err(|e| match e {
        SensorError::NotFound => InitError::SensorNotFound,
        other => InitError::Sensor(other),
    })?;
    info!(
        "[SENSOR] Configured: accel {:?}, gyro {:?}, filter {:?}",
        config.sensor.accel_range, config.sensor.gyro_range, config.sensor.filter_bandwidth
    );
    sleep(config.sensor.settle).await;

    let capacity = config.pipeline.queue_capacity;
    let (producer, consumer) =
        sample_queue(capacity).map_err(|e| InitError::ResourceAllocation(e.to_string()))?;
    info!("Queue allocated: {} slots", producer.capacity());

    let resource = Arc::new(PublisherResource::new(
        link.clone(),
        client,
        config.pipeline.lock_timeout,
    ));
    info!("Publisher lock created");

    Ok(DeviceContext {
        config,
        link,
        source,
        producer,
        consumer,
        resource,
        reporter,
        clock,
    })
}
