//! First-run provisioning: config directory, `config.toml` and token file.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{self, Config, CONFIG_FILE, DEFAULT_SERVER_URL, TOKEN_FILE};
use crate::error::Result;
use crate::token::Token;

/// Files written by [`provision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub token: PathBuf,
}

/// Create `dir`, write a default config pointing at `dir/token`, and store the
/// token there with owner-only permissions. Existing files are overwritten.
pub fn provision(
    dir: &Path,
    username: &str,
    token: &str,
    server_url: Option<&str>,
) -> Result<Provisioned> {
    let token = Token::new(token)?;

    std::fs::create_dir_all(dir)?;
    restrict_dir(dir)?;

    let config_path = dir.join(CONFIG_FILE);
    let token_path = dir.join(TOKEN_FILE);

    let mut cfg = Config::default();
    cfg.server.url = server_url.unwrap_or(DEFAULT_SERVER_URL).to_string();
    cfg.auth.token_path = token_path.display().to_string();
    cfg.auth.username = Some(username.to_string());
    cfg.validate()?;

    config::save(&config_path, &cfg)?;
    token.store(&token_path)?;

    info!(
        dir = %dir.display(),
        username,
        "provisioned eurus config"
    );

    Ok(Provisioned {
        dir: dir.to_path_buf(),
        config: config_path,
        token: token_path,
    })
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
