mod config;
mod link;
mod mqtt;
mod publisher;
mod queue;
mod report;
mod sensor;
mod startup;
mod tasks;
#[cfg(test)]
mod testing;

use anyhow::Result;
use config::DeviceConfig;
use link::{ProbeConfig, ProbeLink};
use mqtt::{client_id_for, MqttClient, MqttOptions};
use report::EventReporter;
use sensor::SimulatedImu;
use startup::{bring_up, Collaborators, InitError, EXIT_HALT};
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Logs go through a background writer so no task blocks on stdout
    let (writer, log_guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_thread_names(true))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = DeviceConfig::from_env();

    info!("========================================");
    info!("  Tremor edge {}", env!("CARGO_PKG_VERSION"));
    info!("  Device: {}", config.device_id);
    info!("========================================");
    info!("  Network: {}", config.network.ssid);
    info!("  Broker: {}", config.broker.address());
    info!("  Topic: {}", config.broker.topic);

    let code = match run(config).await {
        Ok(()) => 0,
        Err(e) => {
            let code = e
                .downcast_ref::<InitError>()
                .map(InitError::exit_code)
                .unwrap_or(EXIT_HALT);
            error!("Fatal: {:#} (exit {})", e, code);
            code
        }
    };

    drop(log_guard);
    std::process::exit(code);
}

async fn run(config: DeviceConfig) -> Result<()> {
    let link = Arc::new(ProbeLink::new(ProbeConfig {
        address: config.network.probe_address.clone(),
        probe_timeout: config.network.probe_timeout,
        watch_interval: config.network.watch_interval,
    }));

    let client = MqttClient::new(MqttOptions {
        address: config.broker.address(),
        client_id: client_id_for(&config.broker.client_id_prefix, &config.device_id),
        keep_alive: config.broker.keep_alive,
        connect_timeout: config.broker.connect_timeout,
        write_timeout: config.broker.write_timeout,
    });
    info!("[MQTT] Client id {}", client.options().client_id);

    let parts = Collaborators {
        link,
        client: Box::new(client),
        source: Box::new(SimulatedImu::new()),
    };

    let ctx = bring_up(config, parts, EventReporter::new()).await?;
    let (sampling, publishing, monitor) = ctx.into_tasks();

    // The sampler gets a thread and runtime of its own so the publishing
    // side can never delay a sample
    let sampler = std::thread::Builder::new()
        .name("sampler".into())
        .spawn(move || -> Result<()> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()?;
            rt.block_on(sampling.run())
        })
        .map_err(|e| InitError::ResourceAllocation(format!("sampler thread: {}", e)))?;
    info!("Sampler started on its own thread");

    tokio::spawn(monitor.run());
    info!("Link monitor started");

    info!("Pipeline running");
    let result = publishing.run().await;

    // The publisher only stops when the sampler is gone
    match sampler.join() {
        Ok(Err(e)) => error!("{:#}", e),
        Ok(Ok(())) => {}
        Err(_) => error!("[SAMPLER] Thread panicked"),
    }
    result
}
