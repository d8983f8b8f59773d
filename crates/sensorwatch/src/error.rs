//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use sensorwatch_config::ConfigError;
use sensorwatch_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the sensor server at {url}")]
    #[diagnostic(
        code(sensorwatch::connection_failed),
        help(
            "Check that the server is running and reachable.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Server error: {message}")]
    #[diagnostic(code(sensorwatch::server_error))]
    Server { message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("'{path}' not found on the server")]
    #[diagnostic(
        code(sensorwatch::not_found),
        help("Run: sensorwatch devices to see connected devices")
    )]
    NotFound { path: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No sensor server configured")]
    #[diagnostic(
        code(sensorwatch::no_server),
        help(
            "Pass --server URL, set SENSORWATCH_SERVER__URL, or create a config with:\n  \
             sensorwatch --server URL config init\n\
             Expected at: {path}"
        )
    )]
    NoServer { path: String },

    #[error("Nothing to watch")]
    #[diagnostic(
        code(sensorwatch::no_feeds),
        help(
            "Name feeds on the command line (DEVICE or DEVICE:SENSOR,...) \
             or add [[feeds]] to the config file."
        )
    )]
    NoFeeds,

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(sensorwatch::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(sensorwatch::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(sensorwatch::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render config: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::NoServer { .. } | Self::NoFeeds | Self::ConfigExists { .. } | Self::Config(_) => {
                exit_code::CONFIG
            }
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingServer => CliError::NoServer {
                path: sensorwatch_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::NotFound { path } => CliError::NotFound { path },
            CoreError::InvalidConfig { field, reason } => CliError::Validation { field, reason },
            CoreError::Server { message, .. } | CoreError::Malformed { message } => {
                CliError::Server { message }
            }
            CoreError::ShutDown => CliError::Server {
                message: "monitor stopped unexpectedly".into(),
            },
        }
    }
}
