//! Session connection state machine.

use std::fmt;

use crate::error::{Error, Result};

/// Session connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started, or terminated.
    Disconnected,
    /// Opening a transport and presenting the token.
    Connecting,
    /// Token accepted; message flow not yet open.
    Authenticated,
    /// Fully connected and operational.
    Connected,
    /// Lost the transport, waiting out the backoff.
    Reconnecting,
}

/// Events that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Caller started the session.
    Start,
    /// Server accepted the token.
    AuthAccepted,
    /// Server rejected the token.
    AuthRejected,
    /// Keep-alive armed and outbound path open.
    HandshakeComplete,
    /// Connect, handshake or live transport failed.
    TransportFailed,
    /// Backoff elapsed with retries left.
    Retry,
    /// Retry budget spent.
    Exhausted,
    /// User quit.
    Close,
}

impl ConnectionState {
    /// Apply `transition`, or fail with `InvalidState` if it is not allowed here.
    pub fn transition(self, transition: Transition) -> Result<ConnectionState> {
        use ConnectionState::*;
        use Transition::*;

        let next = match (self, transition) {
            (_, Close) => Disconnected,
            (Disconnected, Start) => Connecting,
            (Connecting, AuthAccepted) => Authenticated,
            (Connecting, AuthRejected) => Disconnected,
            (Authenticated, HandshakeComplete) => Connected,
            (Connecting | Authenticated | Connected, TransportFailed) => Reconnecting,
            (Reconnecting, Retry) => Connecting,
            (Reconnecting, Exhausted) => Disconnected,
            (state, transition) => {
                return Err(Error::InvalidState {
                    expected: expected_for(transition).to_string(),
                    actual: state.to_string(),
                })
            }
        };
        Ok(next)
    }

    /// True while a transport may carry chat traffic.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True while a run is in progress.
    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

fn expected_for(transition: Transition) -> &'static str {
    match transition {
        Transition::Start => "Disconnected",
        Transition::AuthAccepted | Transition::AuthRejected => "Connecting",
        Transition::HandshakeComplete => "Authenticated",
        Transition::TransportFailed => "Connecting, Authenticated or Connected",
        Transition::Retry | Transition::Exhausted => "Reconnecting",
        Transition::Close => "any",
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Authenticated => "Authenticated",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
        };
        f.write_str(name)
    }
}
