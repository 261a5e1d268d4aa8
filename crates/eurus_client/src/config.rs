//! Client config load/save for `~/.config/eurus/config.toml`.
//! Sections: server.*, auth.*, ui.*, network.*. Only ui.* and the tuning keys
//! under network.* may be omitted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::{Backoff, SessionConfig};

/// Name of the per-user config directory under `~/.config`.
pub const APP_DIR: &str = "eurus";
/// Config file name inside the config directory.
pub const CONFIG_FILE: &str = "config.toml";
/// Token file name written by `eurus setup`.
pub const TOKEN_FILE: &str = "token";
/// Server used when setup is not given one.
pub const DEFAULT_SERVER_URL: &str = "wss://eurus.sreus.tech/ws";

/// Server section (url).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    pub url: String,
}

/// Auth section (token_path, username).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSection {
    pub token_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// UI section. Display-only; the session core never reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiSection {
    #[serde(default = "default_true")]
    pub show_timestamps: bool,
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
    #[serde(default)]
    pub multiline_mode: bool,
}

impl Default for UiSection {
    fn default() -> Self {
        Self {
            show_timestamps: true,
            message_limit: default_message_limit(),
            multiline_mode: false,
        }
    }
}

/// Network section (reconnect bound, keep-alive cadence and timeouts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSection {
    pub reconnect_attempts: u32,
    /// Seconds between keep-alive pings.
    pub ping_interval: u64,
    /// Seconds to wait for a pong before the transport counts as dropped.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout: u64,
    /// Seconds allowed for connect plus authentication.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            reconnect_attempts: 10,
            ping_interval: 30,
            pong_timeout: default_pong_timeout(),
            handshake_timeout: default_handshake_timeout(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Full client config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub ui: UiSection,
    pub network: NetworkSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSection {
                url: DEFAULT_SERVER_URL.to_string(),
            },
            auth: AuthSection {
                token_path: format!("~/.config/{}/{}", APP_DIR, TOKEN_FILE),
                username: None,
            },
            ui: UiSection::default(),
            network: NetworkSection::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_message_limit() -> usize {
    1000
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_backoff_initial_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = self.server.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(config_error(format!(
                "server.url must be a ws:// or wss:// URL, got {:?}",
                self.server.url
            )));
        }
        if self.auth.token_path.trim().is_empty() {
            return Err(config_error("auth.token_path must not be empty"));
        }
        let network = &self.network;
        for (key, value) in [
            ("network.ping_interval", network.ping_interval),
            ("network.pong_timeout", network.pong_timeout),
            ("network.handshake_timeout", network.handshake_timeout),
            ("network.backoff_initial_ms", network.backoff_initial_ms),
        ] {
            if value == 0 {
                return Err(config_error(format!("{} must be greater than zero", key)));
            }
        }
        if network.backoff_max_ms < network.backoff_initial_ms {
            return Err(config_error(
                "network.backoff_max_ms must not be below network.backoff_initial_ms",
            ));
        }
        Ok(())
    }

    /// Token path with a leading `~/` expanded to the home directory.
    pub fn token_path(&self) -> PathBuf {
        expand_home(&self.auth.token_path)
    }

    /// Immutable session settings derived from the network section.
    pub fn session_config(&self) -> SessionConfig {
        let network = &self.network;
        SessionConfig {
            url: self.server.url.trim().to_string(),
            reconnect_attempts: network.reconnect_attempts,
            ping_interval: Duration::from_secs(network.ping_interval),
            pong_timeout: Duration::from_secs(network.pong_timeout),
            handshake_timeout: Duration::from_secs(network.handshake_timeout),
            backoff: Backoff::new(
                Duration::from_millis(network.backoff_initial_ms),
                Duration::from_millis(network.backoff_max_ms),
            ),
        }
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
    }
}

/// Returns the default config directory: `~/.config/eurus`.
pub fn default_config_dir() -> Option<PathBuf> {
    let home = home_dir()?;
    Some(home.join(".config").join(APP_DIR))
}

/// Returns the default config file path: `~/.config/eurus/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|dir| dir.join(CONFIG_FILE))
}

#[cfg(unix)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(windows)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE").map(PathBuf::from)
}

#[cfg(not(any(unix, windows)))]
fn home_dir() -> Option<PathBuf> {
    None
}

/// Expand a leading `~` or `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load config from a TOML file. Path is typically `~/.config/eurus/config.toml`.
pub fn load(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        config_error(format!("failed to read {}: {}", path.display(), e))
    })?;
    debug!(path = %path.display(), "loading config");
    Config::parse(&contents)
}

/// Save config to a TOML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
