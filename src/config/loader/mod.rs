use crate::config::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// `~/.switchboard`, or `$SWITCHBOARD_HOME` when set.
pub fn get_switchboard_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("SWITCHBOARD_HOME")
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".switchboard"))
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_switchboard_home()?.join("config.json"))
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    let mut config = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON from {}", path.display()))?;
        check_file_permissions(path);
        config
    } else {
        Config::default()
    };

    // Env overrides win over config.json
    crate::config::credentials::apply_env_overrides(&mut config);

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;
    Ok(config)
}

/// Warn if the config file has overly permissive permissions.
/// Only emits warnings once per process.
#[cfg(unix)]
fn check_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Once;

    static WARNED: Once = Once::new();
    WARNED.call_once(|| {
        if let Ok(meta) = std::fs::metadata(path) {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    "config file {} has permissions {:o}, recommend 0600",
                    path.display(),
                    mode & 0o777
                );
            }
        }
    });
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path) {}
