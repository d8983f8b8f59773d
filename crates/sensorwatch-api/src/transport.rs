// Shared transport configuration for building reqwest::Client instances
// and deriving push-channel URLs from the server base URL.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::Error;

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (for self-signed lab servers).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("sensorwatch/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

/// Derive a WebSocket URL for `path` from an HTTP(S) base URL.
///
/// `https` maps to `wss`, everything else to `ws`. Host and port are kept.
pub fn push_url(base: &Url, path: &str) -> Result<Url, Error> {
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    let host = base.host_str().unwrap_or("localhost");
    let raw = match base.port() {
        Some(p) => format!("{scheme}://{host}:{p}{path}"),
        None => format!("{scheme}://{host}{path}"),
    };
    Ok(Url::parse(&raw)?)
}

/// Path of the per-sensor push endpoint.
pub fn sensor_push_path(device: &str, sensor: &str) -> String {
    format!("/ws/device/{device}/sensor/{sensor}")
}

/// Path of the directory push endpoint.
pub const DIRECTORY_PUSH_PATH: &str = "/ws/devices";

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn https_base_maps_to_wss() {
        let base = Url::parse("https://lab.local:8443").unwrap();
        let url = push_url(&base, DIRECTORY_PUSH_PATH).unwrap();
        assert_eq!(url.as_str(), "wss://lab.local:8443/ws/devices");
    }

    #[test]
    fn http_base_without_port_maps_to_ws() {
        let base = Url::parse("http://10.0.0.5").unwrap();
        let url = push_url(&base, &sensor_push_path("dev1", "gyroscope")).unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.5/ws/device/dev1/sensor/gyroscope");
    }

    #[test]
    fn default_transport_builds_a_client() {
        assert!(TransportConfig::default().build_client().is_ok());
    }
}
