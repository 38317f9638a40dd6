//! Network link layer
//!
//! The link owns its own status. Readers (the publisher, the link monitor)
//! only ever see atomic loads of it, and transitions are applied lock-free,
//! so no lock is shared with the messaging-client state. A status read
//! followed by an action is not atomic across tasks: the publisher and the
//! monitor may both see the link down and both request a reconnect, which
//! the state machine absorbs.

mod probe;

pub use probe::{ProbeConfig, ProbeLink};

use std::sync::atomic::{AtomicU8, Ordering};
use tremor_shared::state_machine::next_state;
use tremor_shared::{ConnectionEvent, ConnectionState, TransitionResult};

/// Credentials used to join the network
#[derive(Debug, Clone)]
pub struct LinkCredentials {
    pub ssid: String,
    pub passphrase: String,
}

impl LinkCredentials {
    /// Label for logs; the passphrase itself is never printed
    pub fn security(&self) -> &'static str {
        if self.passphrase.is_empty() {
            "open"
        } else {
            "secured"
        }
    }
}

/// The lower network layer as seen by the pipeline
pub trait NetworkLink: Send + Sync {
    /// Current status; a plain atomic read
    fn status(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Start joining the network; returns immediately
    fn begin(&self, credentials: &LinkCredentials);

    /// Ask the link to reconnect; returns immediately
    fn request_reconnect(&self);

    /// Human-readable name for this link
    fn name(&self) -> &'static str;
}

/// Atomic holder for the link state machine
#[derive(Debug, Default)]
pub struct LinkStateCell {
    raw: AtomicU8,
}

impl LinkStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// Apply an event through the shared transition table
    pub fn apply(&self, event: ConnectionEvent) -> TransitionResult {
        let result = self
            .raw
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                next_state(ConnectionState::from_u8(raw), event).map(ConnectionState::as_u8)
            });

        match result {
            Ok(prev) => match next_state(ConnectionState::from_u8(prev), event) {
                Some(to) => TransitionResult::Success(to),
                None => TransitionResult::Invalid {
                    from: ConnectionState::from_u8(prev),
                    event,
                },
            },
            Err(prev) => TransitionResult::Invalid {
                from: ConnectionState::from_u8(prev),
                event,
            },
        }
    }

    /// Move Disconnected -> Connecting; false if an attempt is already
    /// running or the link is up
    pub fn try_begin_attempt(&self) -> bool {
        self.raw
            .compare_exchange(
                ConnectionState::Disconnected.as_u8(),
                ConnectionState::Connecting.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
