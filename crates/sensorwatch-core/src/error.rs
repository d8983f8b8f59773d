// ── Core error types ──
//
// Errors that can cross the public API. Transport failures never do:
// they are absorbed into liveness and directory state inside the
// session. What remains is configuration, lifecycle, and the one-shot
// query helpers used by the CLI.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Monitor has been shut down")]
    ShutDown,

    // ── Query errors ─────────────────────────────────────────────────
    #[error("Cannot reach server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Not found on server: {path}")]
    NotFound { path: String },

    #[error("Server error: {message}")]
    Server { message: String, status: Option<u16> },

    #[error("Unexpected response: {message}")]
    Malformed { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<sensorwatch_api::Error> for CoreError {
    fn from(err: sensorwatch_api::Error) -> Self {
        use sensorwatch_api::Error as Api;

        match err {
            Api::Transport(ref e) if e.is_connect() || e.is_timeout() => {
                CoreError::ConnectionFailed {
                    url: e.url().map_or_else(|| "<unknown>".into(), ToString::to_string),
                    reason: e.to_string(),
                }
            }
            Api::Transport(e) => CoreError::Server {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            Api::Status { status: 404, path } => CoreError::NotFound { path },
            Api::Status { status, path } => CoreError::Server {
                message: format!("HTTP {status} for {path}"),
                status: Some(status),
            },
            Api::InvalidUrl(e) => CoreError::InvalidConfig {
                field: "server.url".into(),
                reason: e.to_string(),
            },
            Api::Tls(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {reason}"),
            },
            Api::Deserialization { message, body: _ } => CoreError::Malformed { message },
            Api::MalformedBatch(message) => CoreError::Malformed { message },
        }
    }
}
