//! Error types for the eurus client.

use thiserror::Error;

/// Main error type for eurus operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the filesystem or sockets.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is missing keys, malformed or invalid.
    #[error("config error: {message}")]
    Config { message: String },

    /// Token file is unreadable or does not hold a single-line token.
    #[error("token error: {message}")]
    Token { message: String },

    /// Malformed frame or unexpected message.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Server rejected the token.
    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    /// WebSocket transport failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Handshake or keep-alive deadline passed.
    #[error("operation timed out")]
    Timeout,

    /// Retry budget spent without getting back to a live connection.
    #[error("reconnect attempts exhausted after {attempts} retries")]
    ReconnectExhausted { attempts: u32 },

    /// No live transport to send on.
    #[error("not connected")]
    NotConnected,

    /// Invalid state transition or operation in the current state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl Error {
    /// Returns true if this error is transient and reconnection may help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::ConnectionClosed | Error::Timeout | Error::Io(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Error::ConnectionClosed,
            other => Error::Transport {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol {
            message: e.to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config {
            message: e.to_string(),
        }
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config {
            message: e.to_string(),
        }
    }
}

/// Convenience result type for eurus operations.
pub type Result<T> = std::result::Result<T, Error>;
