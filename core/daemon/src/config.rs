//! Settings file for the daemon.
//!
//! `enabled` is re-read from disk on every guarded watcher entry point so the
//! user can toggle the fix while mpv is running. Everything else is read once
//! at startup.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::host::SettingsSource;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".subresync/config.toml";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/mpvsocket";
pub const SOCKET_ENV: &str = "SUBRESYNC_MPV_SOCKET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("home directory not found")]
    HomeNotFound,

    #[error("failed to read config: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            player: PlayerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlayerConfig {
    #[serde(default)]
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Directory for a daily-rolling log file. Stderr only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = fs_err::read_to_string(path).map_err(ConfigError::Read)?;
    toml::from_str::<Settings>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Socket precedence: command line, then `SUBRESYNC_MPV_SOCKET`, then the
/// settings file, then [`DEFAULT_SOCKET_PATH`].
pub fn resolve_socket_path(cli: Option<PathBuf>, settings: &Settings) -> PathBuf {
    choose_socket_path(cli, env::var_os(SOCKET_ENV).map(PathBuf::from), settings)
}

fn choose_socket_path(
    cli: Option<PathBuf>,
    from_env: Option<PathBuf>,
    settings: &Settings,
) -> PathBuf {
    cli.or(from_env)
        .or_else(|| settings.player.socket.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// [`SettingsSource`] backed by the settings file.
///
/// A missing file means enabled. A broken file disables the fix until it is
/// repaired; the warning is logged once per breakage rather than every tick.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    broken: AtomicBool,
}

impl FileSettings {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            broken: AtomicBool::new(false),
        }
    }
}

impl SettingsSource for FileSettings {
    fn enabled(&self) -> bool {
        match load_settings(&self.path) {
            Ok(settings) => {
                if self.broken.swap(false, Ordering::Relaxed) {
                    info!(path = %self.path.display(), "Settings file readable again");
                }
                settings.enabled
            }
            Err(err) => {
                if !self.broken.swap(true, Ordering::Relaxed) {
                    warn!(error = %err, "Failed to load settings; subtitle fix paused");
                }
                false
            }
        }
    }
}
