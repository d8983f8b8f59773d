//! Liveness tracking and transport resilience between `sensorwatch-api`
//! and its consumers (the CLI, or any other host).
//!
//! - **[`Monitor`]**: Facade over one monitoring session.
//!   [`start()`](Monitor::start) validates a [`MonitorConfig`], opens a push
//!   channel per sensor (and one for the device directory), and spawns the
//!   session task that owns all mutable state. Reads such as
//!   [`liveness()`](Monitor::liveness) and [`directory()`](Monitor::directory)
//!   come from published snapshots and never block.
//!
//! - **Liveness** ([`liveness`]): Per-sensor state machine with a
//!   hysteresis window, so a single late sample does not flip a sensor to
//!   `Inactive`.
//!
//! - **Resilience** ([`resilience`]): Capped exponential reconnect backoff,
//!   push-to-poll fallback, and source-time race resolution between the
//!   two transports.
//!
//! - **Directory** ([`store::DirectoryReconciler`]): Turns repeated full
//!   device snapshots into minimal add/update/remove diffs.
//!
//! - **Status** ([`status`]): Summary counts derived from the above,
//!   observable via [`Monitor::status_stream()`].

pub mod config;
pub mod error;
pub mod liveness;
pub mod model;
pub mod monitor;
pub mod query;
pub mod resilience;
pub mod scheduler;
mod session;
pub mod status;
pub mod store;
pub mod stream;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{FeedConfig, MonitorConfig, ServerConfig, TlsVerification};
pub use error::CoreError;
pub use liveness::{LivenessPolicy, Observation};
pub use model::{
    DeviceDirectory, DeviceField, DeviceRecord, DeviceUpdate, DirectoryDiff, LivenessRecord,
    LivenessStatus, SensorKey,
};
pub use monitor::Monitor;
pub use resilience::{Backoff, ChannelState, StreamId};
pub use status::{CountSource, DeviceCounts, StatusSummary};
pub use store::Subscription;
pub use stream::StatusStream;
pub use transport::{NetworkTransport, PushConnection, Transport};

// Wire types that appear in the public API.
pub use sensorwatch_api::wire::{DeviceEntry, DeviceStatusResponse, SensorStatus};
pub use sensorwatch_api::{ChannelEvent, ChannelEventKind, ChannelSink, CloseCode};
