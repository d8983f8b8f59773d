use thiserror::Error;

/// Top-level error type for the `sensorwatch-api` crate.
///
/// Failures of HTTP polling and of decoding either transport's payloads.
/// Push channel failures are reported as close codes instead.
/// `sensorwatch-core` absorbs these into liveness state; they never reach
/// observers directly.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server answered with a non-success status.
    #[error("Server returned HTTP {status} for {path}")]
    Status { status: u16, path: String },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// A sample batch whose columns disagree in length.
    #[error("Malformed sample batch: {0}")]
    MalformedBatch(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Status { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the payload, not the transport, was at fault.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Deserialization { .. } | Self::MalformedBatch(_))
    }
}
