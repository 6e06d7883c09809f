//! TOML-based configuration persistence for the router.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\TheaterRouter\config.toml`
//! - Linux:    `~/.config/theater-router/config.toml`
//! - macOS:    `~/Library/Application Support/TheaterRouter/config.toml`
//!
//! Example:
//!
//! ```toml
//! [router]
//! action_timeout_ms = 5000
//! log_level = "info"
//!
//! [projector]
//! enabled = true
//! host = "192.168.1.40"
//! community = "SONY"
//! ```
//!
//! Every field carries a `#[serde(default = "...")]`, so a missing section or
//! key falls back to the built-in value and a first run works without a file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use theater_core::protocol::messages::{DEFAULT_COMMUNITY, DEFAULT_PORT};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub projector: ProjectorConfig,
}

/// Dispatch engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    /// Rule file location; `None` means `rules.toml` next to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,
    /// Upper bound for a single destination call, in milliseconds.
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Connection settings for the networked projector controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectorConfig {
    /// When false the projector is neither connected nor registered.
    #[serde(default)]
    pub enabled: bool,
    /// Controller name used in rules, both as source and as destination.
    #[serde(default = "default_projector_name")]
    pub name: String,
    #[serde(default = "default_projector_host")]
    pub host: String,
    #[serde(default = "default_projector_port")]
    pub port: u16,
    /// Four-character ASCII community tag.
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Power status poll interval; `0` disables the watcher.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl RouterConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

impl ProjectorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_action_timeout_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_projector_name() -> String {
    "Projector".to_string()
}
fn default_projector_host() -> String {
    "127.0.0.1".to_string()
}
fn default_projector_port() -> u16 {
    DEFAULT_PORT
}
fn default_community() -> String {
    DEFAULT_COMMUNITY.to_string()
}
fn default_connect_timeout_ms() -> u64 {
    3_000
}
fn default_read_timeout_ms() -> u64 {
    3_000
}
fn default_poll_interval_ms() -> u64 {
    10_000
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rules_file: None,
            action_timeout_ms: default_action_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_projector_name(),
            host: default_projector_host(),
            port: default_projector_port(),
            community: default_community(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the default path of the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Resolves where the rule file lives for `config`.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when no explicit path is
/// configured and the platform directory is unknown.
pub fn rules_file_path(config: &AppConfig) -> Result<PathBuf, ConfigError> {
    match &config.router.rules_file {
        Some(path) => Ok(path.clone()),
        None => Ok(config_dir()?.join("rules.toml")),
    }
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("TheaterRouter"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("theater-router"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("TheaterRouter")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
