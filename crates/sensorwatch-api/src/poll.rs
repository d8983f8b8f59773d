// Poll endpoint HTTP client
//
// Wraps `reqwest::Client` with server-specific URL construction and
// response decoding. Used as the fallback transport when push channels
// go quiet, and for one-shot queries from the CLI.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;
use crate::wire::{DeviceEntry, DeviceStatusResponse};

/// Raw HTTP client for the server's request/response endpoints.
#[derive(Debug, Clone)]
pub struct PollClient {
    http: reqwest::Client,
    base_url: Url,
}

impl PollClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the server root, e.g. `http://192.168.1.20:8000`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The server base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `GET /api/devices`: the full device directory.
    pub async fn devices(&self) -> Result<HashMap<String, DeviceEntry>, Error> {
        self.get_json("/api/devices").await
    }

    /// `GET /api/device/{device}/info`: per-sensor status for one device.
    pub async fn device_status(&self, device: &str) -> Result<DeviceStatusResponse, Error> {
        self.get_json(&format!("/api/device/{device}/info")).await
    }

    // ── Transport mechanics ──────────────────────────────────────────

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        debug!(url = %url, "GET");

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                path: path.to_owned(),
            });
        }

        let body = resp.text().await?;
        trace!(bytes = body.len(), "poll response body");
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
