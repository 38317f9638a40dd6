//! Device sessions on the development broker
//!
//! This module handles:
//! - The MQTT exchange with one connected device
//! - Validation and logging of published records
//! - Tracking connected clients and their record order

mod connection;
mod registry;

pub use connection::DeviceSession;
pub use registry::SessionRegistry;
