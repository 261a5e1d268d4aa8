//! Bearer token file handling.
//!
//! The token file holds one line: the raw JWT issued by the server. It is
//! written once by `eurus setup` with owner-only permissions and read once per
//! process at session start.

use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Opaque bearer credential presented at handshake time.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

impl Token {
    /// Wrap a raw token string, trimming surrounding whitespace.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let token = raw.as_ref().trim();
        if token.is_empty() {
            return Err(token_error("token is empty"));
        }
        if token.contains(char::is_whitespace) {
            return Err(token_error("token must be a single line without spaces"));
        }
        Ok(Self(token.to_string()))
    }

    /// Read the token from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| token_error(format!("failed to read {}: {}", path.display(), e)))?;
        check_permissions(path);
        debug!(path = %path.display(), "loaded token");
        Self::new(contents)
    }

    /// Write the token to `path` as a single line, readable by the owner only.
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, format!("{}\n", self.0))?;
        restrict_to_owner(path)?;
        Ok(())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn token_error(message: impl Into<String>) -> Error {
    Error::Token {
        message: message.into(),
    }
}

/// Set mode 0600 on `path`.
#[cfg(unix)]
pub(crate) fn restrict_to_owner(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn restrict_to_owner(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn check_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                mode = %format_args!("{:o}", mode),
                "token file is readable by other users; expected 600"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) {}
