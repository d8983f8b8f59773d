// ── Status aggregation ──
//
// Summary counts derived from liveness records and the device directory.
// Recomputed by the session after every change; never mutated in place.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{DeviceDirectory, LivenessRecord, SensorKey};

/// Where a per-device count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CountSource {
    /// Reported by the server in the directory.
    Directory,
    /// Computed from this session's liveness records.
    Local,
}

/// Active/total sensor pair for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceCounts {
    pub active: u32,
    pub total: u32,
    pub source: CountSource,
}

/// Immutable status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    /// Sensors tracked by this session.
    pub total_sensors: usize,
    /// Tracked sensors that are `Active` or `Transitioning`.
    pub active_sensors: usize,
    /// Devices known to the directory.
    pub device_count: usize,
    /// `false` while the directory is failing on both transports.
    pub directory_available: bool,
    pub devices: BTreeMap<String, DeviceCounts>,
}

impl Default for StatusSummary {
    fn default() -> Self {
        Self {
            total_sensors: 0,
            active_sensors: 0,
            device_count: 0,
            directory_available: true,
            devices: BTreeMap::new(),
        }
    }
}

/// Derive a summary. Pure.
///
/// Per-device counts prefer the directory's `sensor_count` and
/// `active_sensor_count`, each independently, and fall back to the local
/// records for that device.
pub fn aggregate<'a>(
    records: impl IntoIterator<Item = (&'a SensorKey, &'a LivenessRecord)>,
    directory: &DeviceDirectory,
    directory_available: bool,
) -> StatusSummary {
    let mut local: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    let mut total_sensors = 0;
    let mut active_sensors = 0;

    for (key, record) in records {
        let active = record.status.counts_as_active();
        total_sensors += 1;
        if active {
            active_sensors += 1;
        }
        let entry = local.entry(key.device.as_str()).or_default();
        entry.1 += 1;
        if active {
            entry.0 += 1;
        }
    }

    let mut devices = BTreeMap::new();
    for (id, record) in directory {
        let (local_active, local_total) = local.get(id.as_str()).copied().unwrap_or_default();
        let source = if record.sensor_count.is_some() || record.active_sensor_count.is_some() {
            CountSource::Directory
        } else {
            CountSource::Local
        };
        devices.insert(
            id.clone(),
            DeviceCounts {
                active: record.active_sensor_count.unwrap_or(local_active),
                total: record.sensor_count.unwrap_or(local_total),
                source,
            },
        );
    }
    for (device, (active, total)) in local {
        devices
            .entry(device.to_owned())
            .or_insert(DeviceCounts {
                active,
                total,
                source: CountSource::Local,
            });
    }

    StatusSummary {
        total_sensors,
        active_sensors,
        device_count: directory.len(),
        directory_available,
        devices,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{DeviceRecord, LivenessStatus};

    fn rec(status: LivenessStatus) -> LivenessRecord {
        LivenessRecord {
            status,
            ..LivenessRecord::default()
        }
    }

    #[test]
    fn transitioning_counts_as_active() {
        let records = [
            (SensorKey::new("d1", "accelerometer"), rec(LivenessStatus::Active)),
            (SensorKey::new("d1", "gyroscope"), rec(LivenessStatus::Transitioning)),
            (SensorKey::new("d1", "magnetometer"), rec(LivenessStatus::Error)),
            (SensorKey::new("d2", "accelerometer"), rec(LivenessStatus::Unknown)),
        ];
        let summary = aggregate(
            records.iter().map(|(k, r)| (k, r)),
            &DeviceDirectory::new(),
            true,
        );

        assert_eq!(summary.total_sensors, 4);
        assert_eq!(summary.active_sensors, 2);
        assert_eq!(
            summary.devices["d1"],
            DeviceCounts {
                active: 2,
                total: 3,
                source: CountSource::Local
            }
        );
        assert_eq!(summary.devices["d2"].active, 0);
    }

    #[test]
    fn directory_counts_take_precedence() {
        let records = [(SensorKey::new("d1", "gyroscope"), rec(LivenessStatus::Inactive))];
        let mut directory = DeviceDirectory::new();
        directory.insert(
            "d1".into(),
            DeviceRecord {
                id: "d1".into(),
                name: None,
                connected_at: None,
                sensor_count: Some(3),
                active_sensor_count: Some(3),
            },
        );
        directory.insert(
            "d9".into(),
            DeviceRecord {
                id: "d9".into(),
                name: Some("tablet".into()),
                connected_at: None,
                sensor_count: None,
                active_sensor_count: None,
            },
        );

        let summary = aggregate(records.iter().map(|(k, r)| (k, r)), &directory, false);
        assert_eq!(summary.device_count, 2);
        assert!(!summary.directory_available);
        assert_eq!(
            summary.devices["d1"],
            DeviceCounts {
                active: 3,
                total: 3,
                source: CountSource::Directory
            }
        );
        assert_eq!(
            summary.devices["d9"],
            DeviceCounts {
                active: 0,
                total: 0,
                source: CountSource::Local
            }
        );
        assert_eq!(summary.active_sensors, 0);
    }
}
