// ── Runtime monitor configuration ──
//
// These types describe *what* to watch and *how* patiently. They never
// touch disk: the CLI (or any other host) builds a `MonitorConfig` and
// hands it to `Monitor::start`, which validates it once.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::CoreError;

/// TLS verification strategy for the feed server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed lab servers).
    DangerAcceptInvalid,
}

/// Where the feed server lives.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server base URL (e.g. `http://192.168.1.20:8000`). Push URLs are
    /// derived from it.
    pub url: Url,
    pub tls: TlsVerification,
    /// Per-request timeout for poll requests.
    pub timeout: Duration,
}

/// One device whose sensors are watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub device: String,
    /// Sensor ids to watch. Empty means "learn them from the first status
    /// poll of this device".
    pub sensors: Vec<String>,
}

impl FeedConfig {
    pub fn new(device: impl Into<String>, sensors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            device: device.into(),
            sensors: sensors.into_iter().map(Into::into).collect(),
        }
    }
}

/// Configuration for one monitoring session.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub server: ServerConfig,
    pub feeds: Vec<FeedConfig>,
    /// Keep a live device directory (push `/ws/devices`, poll `/api/devices`).
    pub watch_directory: bool,

    /// A sample older than this is stale. Default: 10s.
    pub recent_data_window: Duration,
    /// Grace period before a stale `Active` sensor is reported `Inactive`.
    /// Default: 2s.
    pub transition_delay: Duration,

    /// Fallback poll cadence. Default: 2s.
    pub poll_interval: Duration,
    /// Upper bound on poll backoff. Default: 30s.
    pub max_poll_interval: Duration,

    /// Delay before the first push reconnect. Default: 1s.
    pub reconnect_base_delay: Duration,
    /// Growth factor between consecutive reconnect delays. Default: 2.0.
    pub reconnect_multiplier: f64,
    /// Upper bound on push reconnect delay. Default: 10s.
    pub max_reconnect_delay: Duration,

    /// Consecutive errors before a sensor is reported `Error`, and push
    /// failures before polling takes over. Default: 5.
    pub max_consecutive_errors: u32,
    /// Consecutive push failures after which push is abandoned for the
    /// session. Default: 10.
    pub max_reconnect_attempts: u32,
}

impl MonitorConfig {
    /// A configuration for `url` with every tunable at its default.
    pub fn new(url: Url) -> Self {
        Self {
            server: ServerConfig {
                url,
                tls: TlsVerification::default(),
                timeout: Duration::from_secs(10),
            },
            feeds: Vec::new(),
            watch_directory: true,
            recent_data_window: Duration::from_secs(10),
            transition_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            max_poll_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_multiplier: 2.0,
            max_reconnect_delay: Duration::from_secs(10),
            max_consecutive_errors: 5,
            max_reconnect_attempts: 10,
        }
    }

    /// Builder-style feed registration.
    #[must_use]
    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feeds.push(feed);
        self
    }

    /// Check every field once. Called by `Monitor::start`.
    pub fn validate(&self) -> Result<(), CoreError> {
        fn invalid(field: &str, reason: impl Into<String>) -> CoreError {
            CoreError::InvalidConfig {
                field: field.into(),
                reason: reason.into(),
            }
        }

        if !matches!(self.server.url.scheme(), "http" | "https") {
            return Err(invalid("server.url", "scheme must be http or https"));
        }
        for (field, value) in [
            ("recent_data_window", self.recent_data_window),
            ("transition_delay", self.transition_delay),
            ("poll_interval", self.poll_interval),
            ("reconnect_base_delay", self.reconnect_base_delay),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.max_poll_interval < self.poll_interval {
            return Err(invalid("max_poll_interval", "must be >= poll_interval"));
        }
        if self.max_reconnect_delay < self.reconnect_base_delay {
            return Err(invalid("max_reconnect_delay", "must be >= reconnect_base_delay"));
        }
        if !self.reconnect_multiplier.is_finite() || self.reconnect_multiplier < 1.0 {
            return Err(invalid("reconnect_multiplier", "must be a finite number >= 1.0"));
        }
        if self.max_consecutive_errors == 0 {
            return Err(invalid("max_consecutive_errors", "must be at least 1"));
        }

        let mut devices = HashSet::new();
        for feed in &self.feeds {
            if feed.device.trim().is_empty() {
                return Err(invalid("feeds.device", "device id must not be empty"));
            }
            if !devices.insert(feed.device.as_str()) {
                return Err(invalid("feeds.device", format!("duplicate device '{}'", feed.device)));
            }
            if feed.sensors.iter().any(|s| s.trim().is_empty()) {
                return Err(invalid("feeds.sensors", "sensor id must not be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> MonitorConfig {
        MonitorConfig::new(Url::parse("http://127.0.0.1:8000").unwrap())
            .with_feed(FeedConfig::new("dev1", ["accelerometer", "gyroscope"]))
    }

    #[test]
    fn defaults_are_valid() {
        base().validate().unwrap();
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut cfg = base();
        cfg.recent_data_window = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("recent_data_window"), "{err}");
    }

    #[test]
    fn poll_ceiling_below_interval_is_rejected() {
        let mut cfg = base();
        cfg.max_poll_interval = Duration::from_millis(500);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn shrinking_multiplier_is_rejected() {
        let mut cfg = base();
        cfg.reconnect_multiplier = 0.5;
        assert!(cfg.validate().is_err());
        cfg.reconnect_multiplier = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_devices_are_rejected() {
        let cfg = base().with_feed(FeedConfig::new("dev1", ["gyroscope"]));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn websocket_scheme_is_rejected_for_server_url() {
        let cfg = MonitorConfig::new(Url::parse("ws://127.0.0.1:8000").unwrap());
        assert!(cfg.validate().is_err());
    }
}
