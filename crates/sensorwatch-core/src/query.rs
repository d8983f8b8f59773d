// ── One-shot queries ──
//
// Single request/response helpers for hosts that want a snapshot without
// running a session (the CLI's `devices` and `sensors` commands).

use std::collections::BTreeMap;

use sensorwatch_api::wire::SensorStatus;

use crate::config::ServerConfig;
use crate::error::CoreError;
use crate::model::{DeviceDirectory, directory_from_entries};
use crate::transport::NetworkTransport;

/// Fetch the device directory once.
pub async fn fetch_directory(server: &ServerConfig) -> Result<DeviceDirectory, CoreError> {
    let transport = NetworkTransport::new(server)?;
    let entries = transport.poll_client().devices().await?;
    Ok(directory_from_entries(entries))
}

/// Fetch the status of every sensor of `device` once.
pub async fn fetch_sensor_status(
    server: &ServerConfig,
    device: &str,
) -> Result<BTreeMap<String, SensorStatus>, CoreError> {
    let transport = NetworkTransport::new(server)?;
    let response = transport.poll_client().device_status(device).await?;
    Ok(response.sensors)
}
