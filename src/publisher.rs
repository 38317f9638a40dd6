//! Shared publisher resource
//!
//! One instance per device. The messaging client and its state machine sit
//! behind a single `tokio::sync::Mutex`; every read or change of client state
//! happens while holding it. The network link is reachable from here too but
//! is never guarded by this lock: it owns its status and exposes atomic
//! reads, so the link monitor can act on it without touching the lock.

use crate::link::NetworkLink;
use crate::mqtt::MessagingClient;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tremor_shared::{ConnectionEvent, ConnectionState, ConnectionStateMachine};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Timed out after {0:?} waiting for the publisher lock")]
pub struct LockTimeout(pub Duration);

/// Client handle plus the messaging-client state machine
pub struct ClientSlot {
    fsm: ConnectionStateMachine,
    client: Box<dyn MessagingClient>,
}

impl ClientSlot {
    pub fn state(&self) -> ConnectionState {
        self.fsm.state()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.fsm.failed_attempts()
    }

    pub fn client_mut(&mut self) -> &mut dyn MessagingClient {
        self.client.as_mut()
    }

    /// Bring the state machine in line with the client's own view
    ///
    /// The client drops its session on I/O errors; this records the loss.
    pub fn refresh(&mut self) -> ConnectionState {
        if self.fsm.state() == ConnectionState::Connected && !self.client.is_connected() {
            self.fsm.process_event(ConnectionEvent::Lost);
        } else if self.fsm.state() == ConnectionState::Disconnected && self.client.is_connected() {
            self.fsm.process_event(ConnectionEvent::Established);
        }
        self.fsm.state()
    }

    /// One connect attempt through the state machine
    pub async fn connect_once(&mut self) -> Result<()> {
        self.fsm.process_event(ConnectionEvent::ConnectRequested);

        match self.client.connect().await {
            Ok(()) => {
                self.fsm.process_event(ConnectionEvent::Established);
                Ok(())
            }
            Err(e) => {
                self.fsm.process_event(ConnectionEvent::AttemptFailed);
                Err(e)
            }
        }
    }
}

/// The single shared handle to the publishing path
pub struct PublisherResource {
    link: Arc<dyn NetworkLink>,
    slot: Mutex<ClientSlot>,
    lock_timeout: Duration,
}

impl PublisherResource {
    pub fn new(
        link: Arc<dyn NetworkLink>,
        client: Box<dyn MessagingClient>,
        lock_timeout: Duration,
    ) -> Self {
        let mut fsm = ConnectionStateMachine::new();
        if client.is_connected() {
            fsm.process_event(ConnectionEvent::Established);
        }

        Self {
            link,
            slot: Mutex::new(ClientSlot { fsm, client }),
            lock_timeout,
        }
    }

    /// The network link; read without the lock
    pub fn link(&self) -> &Arc<dyn NetworkLink> {
        &self.link
    }

    /// Acquire the client lock, giving up after the configured timeout
    pub async fn acquire(&self) -> Result<MutexGuard<'_, ClientSlot>, LockTimeout> {
        tokio::time::timeout(self.lock_timeout, self.slot.lock())
            .await
            .map_err(|_| LockTimeout(self.lock_timeout))
    }
}
