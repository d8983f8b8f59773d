// ── Wire formats ──
//
// JSON envelopes exchanged with the sensor feed server, over both the
// push channel and the poll endpoints.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A message received on a push channel.
///
/// Tagged by the `type` field. Unknown types fail deserialization and are
/// dropped by the caller.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// Full history for a sensor, sent once after connecting.
    Historical { data: SampleColumns },
    /// Current data window for a sensor.
    Update { data: SampleColumns },
    /// Authoritative directory snapshot.
    DeviceListUpdate { devices: HashMap<String, DeviceEntry> },
}

impl PushMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })
    }
}

/// Outbound request asking the server to resend the current state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    RequestUpdate,
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        // Serializing a unit-variant enum cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Column-oriented sample arrays as the server sends them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SampleColumns {
    #[serde(default)]
    pub time: Vec<f64>,
    #[serde(default)]
    pub x: Vec<f64>,
    #[serde(default)]
    pub y: Vec<f64>,
    #[serde(default)]
    pub z: Vec<f64>,
}

/// One reading: relative timestamp (seconds) and three axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Validated, row-oriented sample batch.
///
/// `time` is non-decreasing across samples. May be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    samples: Vec<Sample>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Timestamp of the newest sample, if any.
    pub fn latest_time(&self) -> Option<f64> {
        self.samples.last().map(|s| s.time)
    }
}

impl TryFrom<SampleColumns> for SampleBatch {
    type Error = Error;

    fn try_from(cols: SampleColumns) -> Result<Self, Self::Error> {
        let n = cols.time.len();
        if cols.x.len() != n || cols.y.len() != n || cols.z.len() != n {
            return Err(Error::MalformedBatch(format!(
                "column lengths differ: time={n} x={} y={} z={}",
                cols.x.len(),
                cols.y.len(),
                cols.z.len()
            )));
        }
        if cols.time.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::MalformedBatch("time is decreasing".into()));
        }

        let samples = cols
            .time
            .iter()
            .zip(&cols.x)
            .zip(&cols.y)
            .zip(&cols.z)
            .map(|(((&time, &x), &y), &z)| Sample { time, x, y, z })
            .collect();
        Ok(Self { samples })
    }
}

/// A device as listed by the server. The id is the map key, not a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connected_at: Option<String>,
    #[serde(default)]
    pub sensor_count: Option<u32>,
    #[serde(default)]
    pub active_sensor_count: Option<u32>,
}

/// Response of the device status poll endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceStatusResponse {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub sensors: BTreeMap<String, SensorStatus>,
}

/// Per-sensor entry of [`DeviceStatusResponse`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorStatus {
    #[serde(default)]
    pub has_data: bool,
    #[serde(default)]
    pub data_points: u64,
    #[serde(default)]
    pub time_since_last_update: Option<f64>,
    #[serde(default)]
    pub is_recent: bool,
    #[serde(default)]
    pub debug_info: Option<serde_json::Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_update_message() {
        let raw = r#"{"type":"update","data":{"time":[0.0,0.1],"x":[1,2],"y":[3,4],"z":[5,6]}}"#;
        let PushMessage::Update { data } = PushMessage::parse(raw).unwrap() else {
            panic!("expected update");
        };
        let batch = SampleBatch::try_from(data).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.latest_time(), Some(0.1));
        assert_eq!(batch.samples[1].z, 6.0);
    }

    #[test]
    fn parse_device_list_with_missing_fields() {
        let raw = r#"{"type":"device_list_update","devices":{
            "d1":{"name":"Pixel","connected_at":"2025-05-01T10:00:00","sensor_count":2,"active_sensor_count":1},
            "d2":{}
        }}"#;
        let PushMessage::DeviceListUpdate { devices } = PushMessage::parse(raw).unwrap() else {
            panic!("expected device list");
        };
        assert_eq!(devices["d1"].sensor_count, Some(2));
        assert_eq!(devices["d2"], DeviceEntry::default());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = PushMessage::parse(r#"{"type":"ping"}"#).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn ragged_columns_are_malformed() {
        let cols = SampleColumns {
            time: vec![0.0, 1.0],
            x: vec![1.0],
            y: vec![1.0, 2.0],
            z: vec![1.0, 2.0],
        };
        assert!(matches!(
            SampleBatch::try_from(cols),
            Err(Error::MalformedBatch(_))
        ));
    }

    #[test]
    fn decreasing_time_is_malformed() {
        let cols = SampleColumns {
            time: vec![1.0, 0.5],
            x: vec![0.0, 0.0],
            y: vec![0.0, 0.0],
            z: vec![0.0, 0.0],
        };
        assert!(SampleBatch::try_from(cols).is_err());
    }

    #[test]
    fn request_update_serializes_with_type_tag() {
        assert_eq!(ClientMessage::RequestUpdate.to_json(), r#"{"type":"request_update"}"#);
    }

    #[test]
    fn status_response_ignores_extra_fields() {
        let raw = r#"{"device_id":"d1","total_sensors":1,"sensors":{
            "accelerometer":{"type":"accelerometer","has_data":true,"data_points":40,
            "time_since_last_update":0.4,"is_recent":true,"is_active":true,"debug_info":null}
        }}"#;
        let resp: DeviceStatusResponse = serde_json::from_str(raw).unwrap();
        let accel = &resp.sensors["accelerometer"];
        assert!(accel.has_data && accel.is_recent);
        assert_eq!(accel.data_points, 40);
        assert_eq!(accel.time_since_last_update, Some(0.4));
    }
}
