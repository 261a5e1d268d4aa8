//! Session configuration.

use std::time::Duration;

use super::reconnect::Backoff;
use crate::error::{Error, Result};

/// Immutable settings for one session, usually built by
/// [`Config::session_config`](crate::Config::session_config).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Retries allowed after consecutive transport failures.
    pub reconnect_attempts: u32,
    /// Time between keep-alive pings while connected.
    pub ping_interval: Duration,
    /// How long a ping may stay unanswered.
    pub pong_timeout: Duration,
    /// Budget for connect plus authentication.
    pub handshake_timeout: Duration,
    pub backoff: Backoff,
}

impl SessionConfig {
    /// Defaults for everything except the endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_attempts: 10,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            backoff: Backoff::default(),
        }
    }

    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Reject settings a run cannot work with: a non-WebSocket URL or a zero
    /// ping interval, pong timeout or handshake timeout.
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(Error::Config {
                message: format!("session url must be ws:// or wss://, got {:?}", self.url),
            });
        }
        for (name, value) in [
            ("ping_interval", self.ping_interval),
            ("pong_timeout", self.pong_timeout),
            ("handshake_timeout", self.handshake_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }
        Ok(())
    }
}
