//! Configuration for sensorwatch tools.
//!
//! A TOML file at the platform config dir, layered over built-in defaults
//! and under `SENSORWATCH_*` environment variables, translated into a
//! validated `sensorwatch_core::MonitorConfig`. Durations are written in
//! the file as milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sensorwatch_core::{CoreError, FeedConfig, MonitorConfig, ServerConfig, TlsVerification};

/// Prefix of every environment override. Nested keys use `__`, e.g.
/// `SENSORWATCH_SERVER__URL` or `SENSORWATCH_MONITOR__POLL_INTERVAL_MS`.
pub const ENV_PREFIX: &str = "SENSORWATCH_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no server URL configured")]
    MissingServer,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<CoreError> for ConfigError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidConfig { field, reason } => Self::Validation { field, reason },
            other => Self::Validation {
                field: "config".into(),
                reason: other.to_string(),
            },
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,

    #[serde(default)]
    pub monitor: Monitor,

    /// Devices whose sensors are watched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feeds: Vec<Feed>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Server {
    /// Feed server base URL (e.g. "http://192.168.1.20:8000").
    pub url: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_timeout_ms(),
            insecure: false,
            ca_cert: None,
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Liveness and resilience tunables.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Monitor {
    pub watch_directory: bool,
    pub recent_data_window_ms: u64,
    pub transition_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_multiplier: f64,
    pub max_reconnect_delay_ms: u64,
    pub max_consecutive_errors: u32,
    pub max_reconnect_attempts: u32,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            watch_directory: true,
            recent_data_window_ms: 10_000,
            transition_delay_ms: 2_000,
            poll_interval_ms: 2_000,
            max_poll_interval_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_multiplier: 2.0,
            max_reconnect_delay_ms: 10_000,
            max_consecutive_errors: 5,
            max_reconnect_attempts: 10,
        }
    }
}

/// One watched device. An empty `sensors` list learns them from the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Feed {
    pub device: String,
    #[serde(default)]
    pub sensors: Vec<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "sensorwatch", "sensorwatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("sensorwatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path` (if it exists), then the
/// environment.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the full Config from the canonical path and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` and the environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parents.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Build and validate a `MonitorConfig`.
    pub fn to_monitor_config(&self) -> Result<MonitorConfig, ConfigError> {
        let server = self.server_config()?;
        let m = &self.monitor;

        let mut config = MonitorConfig::new(server.url.clone());
        config.server = server;
        config.feeds = self
            .feeds
            .iter()
            .map(|feed| FeedConfig::new(feed.device.clone(), feed.sensors.iter().cloned()))
            .collect();
        config.watch_directory = m.watch_directory;
        config.recent_data_window = Duration::from_millis(m.recent_data_window_ms);
        config.transition_delay = Duration::from_millis(m.transition_delay_ms);
        config.poll_interval = Duration::from_millis(m.poll_interval_ms);
        config.max_poll_interval = Duration::from_millis(m.max_poll_interval_ms);
        config.reconnect_base_delay = Duration::from_millis(m.reconnect_base_delay_ms);
        config.reconnect_multiplier = m.reconnect_multiplier;
        config.max_reconnect_delay = Duration::from_millis(m.max_reconnect_delay_ms);
        config.max_consecutive_errors = m.max_consecutive_errors;
        config.max_reconnect_attempts = m.max_reconnect_attempts;

        config.validate()?;
        Ok(config)
    }

    /// Server connection settings only. Enough for one-shot queries.
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let raw = self.server.url.as_deref().ok_or(ConfigError::MissingServer)?;
        let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
            field: "server.url".into(),
            reason: format!("invalid URL: {raw}"),
        })?;

        let tls = if self.server.insecure {
            TlsVerification::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.server.ca_cert {
            TlsVerification::CustomCa(ca_path.clone())
        } else {
            TlsVerification::SystemDefaults
        };

        Ok(ServerConfig {
            url,
            tls,
            timeout: Duration::from_millis(self.server.timeout_ms),
        })
    }
}
