// ── Device directory domain types ──

use std::collections::BTreeMap;

use serde::Serialize;

use sensorwatch_api::wire::DeviceEntry;

/// A device as known to the directory. Equality is field-wise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub id: String,
    pub name: Option<String>,
    /// Server-side ISO-8601 timestamp, compared as text.
    pub connected_at: Option<String>,
    pub sensor_count: Option<u32>,
    pub active_sensor_count: Option<u32>,
}

impl DeviceRecord {
    pub fn from_entry(id: impl Into<String>, entry: DeviceEntry) -> Self {
        Self {
            id: id.into(),
            name: entry.name,
            connected_at: entry.connected_at,
            sensor_count: entry.sensor_count,
            active_sensor_count: entry.active_sensor_count,
        }
    }

    /// Fields whose value differs between `self` and `newer`.
    pub fn changed_fields(&self, newer: &Self) -> Vec<DeviceField> {
        let mut changed = Vec::new();
        if self.name != newer.name {
            changed.push(DeviceField::Name);
        }
        if self.connected_at != newer.connected_at {
            changed.push(DeviceField::ConnectedAt);
        }
        if self.sensor_count != newer.sensor_count {
            changed.push(DeviceField::SensorCount);
        }
        if self.active_sensor_count != newer.active_sensor_count {
            changed.push(DeviceField::ActiveSensorCount);
        }
        changed
    }
}

/// A diffable field of [`DeviceRecord`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceField {
    Name,
    ConnectedAt,
    SensorCount,
    ActiveSensorCount,
}

/// Authoritative set of known devices, keyed by id.
pub type DeviceDirectory = BTreeMap<String, DeviceRecord>;

/// Build a directory from a raw server snapshot.
pub fn directory_from_entries(
    entries: impl IntoIterator<Item = (String, DeviceEntry)>,
) -> DeviceDirectory {
    entries
        .into_iter()
        .map(|(id, entry)| (id.clone(), DeviceRecord::from_entry(id, entry)))
        .collect()
}

/// One device whose fields changed between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceUpdate {
    pub id: String,
    pub changed_fields: Vec<DeviceField>,
    /// The record as of the newer snapshot.
    pub record: DeviceRecord,
}

/// Minimal add/update/remove events between two directory snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryDiff {
    pub added: Vec<DeviceRecord>,
    pub updated: Vec<DeviceUpdate>,
    pub removed: Vec<String>,
}

impl DirectoryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: Option<&str>) -> DeviceRecord {
        DeviceRecord {
            id: id.into(),
            name: name.map(Into::into),
            connected_at: Some("2025-05-01T10:00:00".into()),
            sensor_count: Some(2),
            active_sensor_count: Some(1),
        }
    }

    #[test]
    fn identical_records_have_no_changes() {
        let a = record("s1", Some("Pixel"));
        assert!(a.changed_fields(&a.clone()).is_empty());
    }

    #[test]
    fn only_changed_fields_are_listed() {
        let a = record("s1", Some("Pixel"));
        let mut b = a.clone();
        b.active_sensor_count = Some(2);
        b.name = None;
        assert_eq!(
            a.changed_fields(&b),
            vec![DeviceField::Name, DeviceField::ActiveSensorCount]
        );
    }

    #[test]
    fn field_names_render_snake_case() {
        assert_eq!(DeviceField::ConnectedAt.to_string(), "connected_at");
        assert_eq!(DeviceField::Name.as_ref(), "name");
    }
}
