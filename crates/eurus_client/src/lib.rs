//! Eurus chat client library (config, token, WebSocket session core, installer).
//! Used by the `eurus` terminal binary.

pub mod config;
pub mod error;
pub mod logging;
pub mod messages;
pub mod session;
pub mod setup;
pub mod token;
mod transport;

pub use config::{default_config_path, AuthSection, Config, NetworkSection, ServerSection, UiSection};
pub use error::{Error, Result};
pub use messages::{ChatCommand, ServerMessage};
pub use session::{
    Backoff, ConnectionState, Events, Outbox, Session, SessionConfig, SessionEvent, Termination,
};
pub use token::Token;
