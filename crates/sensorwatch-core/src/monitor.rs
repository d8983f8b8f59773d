// ── Monitor facade ──
//
// Cheaply cloneable handle to one monitoring session. Reads come from
// published snapshots and never wait on the session task; mutations are
// posted to it as commands.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::MonitorConfig;
use crate::error::CoreError;
use crate::model::{DeviceDirectory, DirectoryDiff, LivenessRecord, SensorKey};
use crate::resilience::{ChannelState, StreamId};
use crate::session::{Command, Input, Session};
use crate::status::StatusSummary;
use crate::store::{SharedState, Subscription};
use crate::stream::StatusStream;
use crate::transport::{NetworkTransport, Transport};

/// Live view of a set of sensor feeds and the device directory.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: MonitorConfig,
    shared: Arc<SharedState>,
    inputs: mpsc::UnboundedSender<Input>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Validate `config` and start a session against the network.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: MonitorConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let transport = NetworkTransport::new(&config.server)?;
        Self::start_with_transport(config, Arc::new(transport))
    }

    /// Start a session over a caller-supplied transport.
    pub fn start_with_transport(
        config: MonitorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let shared = Arc::new(SharedState::new());
        let (inputs, inputs_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = Session::new(&config, transport, Arc::clone(&shared), inputs.clone());
        let task = tokio::spawn(session.run(inputs_rx, cancel.child_token()));

        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                shared,
                inputs,
                cancel,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    // ── Liveness ─────────────────────────────────────────────────────

    /// Call `on_change` with every new state of `sensor`'s record.
    ///
    /// Callbacks run on the session task and must return quickly.
    pub fn subscribe(
        &self,
        sensor: &SensorKey,
        on_change: impl Fn(&LivenessRecord) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.shared.subscribe_sensor(sensor.clone(), on_change)
    }

    /// Current record of `sensor`, if it is watched.
    pub fn liveness(&self, sensor: &SensorKey) -> Option<LivenessRecord> {
        self.inner.shared.liveness(sensor)
    }

    /// Every watched sensor, sorted.
    pub fn sensors(&self) -> Vec<SensorKey> {
        self.inner.shared.sensors()
    }

    /// Start watching `sensor`. No-op if it is already watched.
    pub fn watch_sensor(&self, sensor: SensorKey) -> Result<(), CoreError> {
        if sensor.device.trim().is_empty() || sensor.sensor.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "sensor".into(),
                reason: format!("'{sensor}' is not a valid sensor key"),
            });
        }
        self.send(Command::Watch(sensor));
        Ok(())
    }

    /// Stop watching `sensor` and drop its record.
    pub fn unwatch_sensor(&self, sensor: &SensorKey) {
        self.send(Command::Unwatch(sensor.clone()));
    }

    // ── Directory ────────────────────────────────────────────────────

    pub fn directory(&self) -> Arc<DeviceDirectory> {
        self.inner.shared.directory()
    }

    /// Call `on_diff` with every non-empty directory diff.
    pub fn subscribe_directory(
        &self,
        on_diff: impl Fn(&DirectoryDiff) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.shared.subscribe_directory(on_diff)
    }

    // ── Status ───────────────────────────────────────────────────────

    pub fn status(&self) -> Arc<StatusSummary> {
        self.inner.shared.status()
    }

    pub fn status_stream(&self) -> StatusStream {
        StatusStream::new(self.inner.shared.status_receiver())
    }

    /// Connection state of a push stream, if the stream exists.
    pub fn channel_state(&self, stream: &StreamId) -> Option<ChannelState> {
        self.inner.shared.channel_state(stream)
    }

    // ── Control ──────────────────────────────────────────────────────

    /// Ask the server to resend current state and re-evaluate every sensor.
    pub fn request_manual_refresh(&self) {
        self.send(Command::ManualRefresh);
    }

    /// Cancel every timer, close every channel, and wait for the session
    /// to finish. Idempotent.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown);
        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(error = %e, "session task ended abnormally");
            }
        }
        self.inner.cancel.cancel();
    }

    fn send(&self, command: Command) {
        if self.inner.inputs.send(Input::Command(command)).is_err() {
            debug!("monitor already shut down, command dropped");
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
