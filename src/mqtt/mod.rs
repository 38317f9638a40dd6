//! Messaging client layer
//!
//! The publisher drives the client only while holding the publisher lock,
//! so every method takes `&mut self` and no internal locking is needed.

mod client;

pub use client::{client_id_for, MqttClient, MqttOptions};

use anyhow::Result;
use async_trait::async_trait;

/// A publish-only messaging client
#[async_trait]
pub trait MessagingClient: Send {
    /// Whether the client believes its session is up
    fn is_connected(&self) -> bool;

    /// One bounded connect attempt
    async fn connect(&mut self) -> Result<()>;

    /// Submit a payload for transmission on a topic
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// One maintenance step: service incoming packets and keep-alive
    async fn poll(&mut self) -> Result<()>;

    /// Human-readable name for this client
    fn name(&self) -> &'static str;
}
