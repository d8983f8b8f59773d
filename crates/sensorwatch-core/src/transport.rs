// ── Transport seam ──
//
// The session talks to the server only through `Transport`. The network
// implementation wraps `sensorwatch-api`; tests substitute a scripted one.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sensorwatch_api::transport::{DIRECTORY_PUSH_PATH, push_url, sensor_push_path};
use sensorwatch_api::wire::{DeviceEntry, DeviceStatusResponse};
use sensorwatch_api::{ChannelSink, PollClient, PushChannel, TlsMode, TransportConfig};
use url::Url;

use crate::config::{ServerConfig, TlsVerification};
use crate::error::CoreError;
use crate::resilience::StreamId;

/// One push connection, owned by the session.
pub trait PushConnection: Send + Sync {
    /// Start a connection attempt; returns its id.
    fn connect(&self) -> u64;
    /// Close with code 1000.
    fn disconnect(&self, reason: &str);
    /// Send a text frame; dropped if not connected.
    fn send(&self, message: &str);
}

impl PushConnection for PushChannel {
    fn connect(&self) -> u64 {
        PushChannel::connect(self)
    }

    fn disconnect(&self, reason: &str) {
        PushChannel::disconnect(self, reason);
    }

    fn send(&self, message: &str) {
        PushChannel::send(self, message);
    }
}

/// Everything the session needs from the server.
pub trait Transport: Send + Sync + 'static {
    /// Create (but do not connect) the push connection for `stream`.
    fn open_push(
        &self,
        stream: &StreamId,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<Box<dyn PushConnection>, sensorwatch_api::Error>;

    /// `GET` the status of every sensor of `device`.
    fn device_status(
        &self,
        device: &str,
    ) -> BoxFuture<'static, Result<DeviceStatusResponse, sensorwatch_api::Error>>;

    /// `GET` the full device directory.
    fn devices(
        &self,
    ) -> BoxFuture<'static, Result<HashMap<String, DeviceEntry>, sensorwatch_api::Error>>;
}

// ── Network implementation ───────────────────────────────────────────

/// [`Transport`] over WebSocket push channels and HTTP polling.
#[derive(Debug, Clone)]
pub struct NetworkTransport {
    base_url: Url,
    poll: PollClient,
}

impl NetworkTransport {
    pub fn new(server: &ServerConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: tls_mode(&server.tls),
            timeout: server.timeout,
        };
        let poll = PollClient::new(server.url.clone(), &transport)?;
        Ok(Self {
            base_url: server.url.clone(),
            poll,
        })
    }

    /// The poll client, for one-shot queries.
    pub fn poll_client(&self) -> &PollClient {
        &self.poll
    }
}

impl Transport for NetworkTransport {
    fn open_push(
        &self,
        stream: &StreamId,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<Box<dyn PushConnection>, sensorwatch_api::Error> {
        let path = match stream {
            StreamId::Sensor(key) => sensor_push_path(&key.device, &key.sensor),
            StreamId::Directory => DIRECTORY_PUSH_PATH.to_owned(),
        };
        let url = push_url(&self.base_url, &path)?;
        Ok(Box::new(PushChannel::new(url, sink)))
    }

    fn device_status(
        &self,
        device: &str,
    ) -> BoxFuture<'static, Result<DeviceStatusResponse, sensorwatch_api::Error>> {
        let poll = self.poll.clone();
        let device = device.to_owned();
        async move { poll.device_status(&device).await }.boxed()
    }

    fn devices(
        &self,
    ) -> BoxFuture<'static, Result<HashMap<String, DeviceEntry>, sensorwatch_api::Error>> {
        let poll = self.poll.clone();
        async move { poll.devices().await }.boxed()
    }
}

pub(crate) fn tls_mode(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}
