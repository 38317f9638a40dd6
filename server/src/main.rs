//! Development MQTT endpoint for tremor-edge devices
//!
//! Accepts device sessions, answers CONNECT and PINGREQ, and validates and
//! logs every published record.

mod session;

use session::{DeviceSession, SessionRegistry};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tremor_shared::broker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let bind = std::env::var("TREMOR_BROKER_BIND")
        .unwrap_or_else(|_| format!("0.0.0.0:{}", broker::DEFAULT_PORT));
    let listener = TcpListener::bind(&bind).await?;
    info!("[BROKER] Listening on {}", bind);

    let registry = SessionRegistry::new();
    tokio::spawn(log_sessions(registry.clone()));

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("[BROKER] Accept failed: {}", e);
                continue;
            }
        };
        // Link reachability checks connect and close every few seconds
        debug!("[BROKER] Connection from {}", addr);

        if let Err(e) = stream.set_nodelay(true) {
            warn!("[BROKER] set_nodelay on {}: {}", addr, e);
        }

        let registry = registry.clone();
        tokio::spawn(async move {
            DeviceSession::new(stream, addr).serve(registry).await;
        });
    }
}

/// Per-session counters, once a minute
async fn log_sessions(registry: SessionRegistry) {
    let mut ticker = interval(Duration::from_secs(60));
    ticker.tick().await;

    loop {
        ticker.tick().await;

        for client_id in registry.connected_clients().await {
            if let Some(info) = registry.get_info(&client_id).await {
                info!(
                    records = info.records,
                    rejected = info.rejected,
                    out_of_order = info.out_of_order,
                    "[BROKER] {} ({}) up {:?}",
                    info.client_id,
                    info.addr,
                    info.connected_at.elapsed()
                );
            }
        }
    }
}
