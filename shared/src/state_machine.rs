//! Connection State Machine
//!
//! Transition table shared by the network-link and messaging-client layers.
//! Each layer owns its own instance; the two are never merged, and the
//! recovery policy around a failed transition belongs to the owner.

/// Connection state of one network layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    /// Decode a state stored as a raw byte (atomic storage)
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Events that drive a connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connect or reconnect was requested
    ConnectRequested,
    /// The layer reports itself connected
    Established,
    /// A connect attempt failed
    AttemptFailed,
    /// An established connection was lost
    Lost,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and the state is now the given one
    Success(ConnectionState),
    /// Transition was invalid from the current state
    Invalid {
        from: ConnectionState,
        event: ConnectionEvent,
    },
}

/// Next state for an event, if the transition is valid
pub fn next_state(from: ConnectionState, event: ConnectionEvent) -> Option<ConnectionState> {
    use ConnectionEvent::*;
    use ConnectionState::*;

    match (from, event) {
        (Disconnected, ConnectRequested) => Some(Connecting),
        // Repeated requests while an attempt is running are absorbed
        (Connecting, ConnectRequested) => Some(Connecting),

        (Connecting, Established) => Some(Connected),
        // The link layer may come back on its own (driver auto-reconnect)
        (Disconnected, Established) => Some(Connected),
        (Connected, Established) => Some(Connected),

        (Connecting, AttemptFailed) => Some(Disconnected),

        (Connected, Lost) => Some(Disconnected),
        (Connecting, Lost) => Some(Disconnected),
        (Disconnected, Lost) => Some(Disconnected),

        _ => None,
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    match (from, to) {
        (a, b) if a == b => true,
        (Disconnected, Connecting) => true,
        (Disconnected, Connected) => true,
        (Connecting, Connected) => true,
        (Connecting, Disconnected) => true,
        (Connected, Disconnected) => true,
        _ => false,
    }
}

/// Owned state machine with attempt bookkeeping
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
    failed_attempts: u32,
    total_connects: u32,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Consecutive failed attempts since the last successful connect
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Number of times the machine reached Connected from another state
    pub fn total_connects(&self) -> u32 {
        self.total_connects
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: ConnectionEvent) -> TransitionResult {
        let from = self.current_state;

        match next_state(from, event) {
            Some(to) => {
                match event {
                    ConnectionEvent::AttemptFailed => {
                        self.failed_attempts = self.failed_attempts.saturating_add(1);
                    }
                    ConnectionEvent::Established if from != ConnectionState::Connected => {
                        self.failed_attempts = 0;
                        self.total_connects = self.total_connects.saturating_add(1);
                    }
                    _ => {}
                }
                self.current_state = to;
                TransitionResult::Success(to)
            }
            None => TransitionResult::Invalid { from, event },
        }
    }
}
