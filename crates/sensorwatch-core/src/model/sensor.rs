// ── Sensor liveness domain types ──

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Identifies one sensor feed: a sensor id, unique within its device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SensorKey {
    pub device: String,
    pub sensor: String,
}

impl SensorKey {
    pub fn new(device: impl Into<String>, sensor: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            sensor: sensor.into(),
        }
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.sensor)
    }
}

/// Liveness of a single sensor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LivenessStatus {
    /// No data ever observed.
    Unknown,
    /// Fresh data present.
    Active,
    /// Data just went stale; the hysteresis window is running.
    Transitioning,
    /// Confirmed stale, or explicitly absent.
    Inactive,
    /// Sustained transport failure.
    Error,
}

impl LivenessStatus {
    /// The status observers see. `Transitioning` is reported as `Active`
    /// until the hysteresis window elapses.
    pub fn reported(self) -> Self {
        match self {
            Self::Transitioning => Self::Active,
            other => other,
        }
    }

    pub fn counts_as_active(self) -> bool {
        matches!(self, Self::Active | Self::Transitioning)
    }
}

/// Liveness state of one sensor, owned by the session's state machine.
///
/// Observers only ever receive clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessRecord {
    pub status: LivenessStatus,
    pub data_points: u64,
    pub last_data_at: Option<Instant>,
    pub transition_started_at: Option<Instant>,
    pub consecutive_errors: u32,
    pub last_error_message: Option<String>,
}

impl LivenessRecord {
    pub fn reported_status(&self) -> LivenessStatus {
        self.status.reported()
    }

    pub fn has_data(&self) -> bool {
        self.last_data_at.is_some() || self.data_points > 0
    }
}

impl Default for LivenessRecord {
    fn default() -> Self {
        Self {
            status: LivenessStatus::Unknown,
            data_points: 0,
            last_data_at: None,
            transition_started_at: None,
            consecutive_errors: 0,
            last_error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitioning_is_reported_active() {
        assert_eq!(LivenessStatus::Transitioning.reported(), LivenessStatus::Active);
        assert_eq!(LivenessStatus::Inactive.reported(), LivenessStatus::Inactive);
        assert!(LivenessStatus::Transitioning.counts_as_active());
        assert!(!LivenessStatus::Error.counts_as_active());
    }

    #[test]
    fn key_display_joins_device_and_sensor() {
        assert_eq!(SensorKey::new("dev1", "gyroscope").to_string(), "dev1/gyroscope");
    }

    #[test]
    fn status_renders_snake_case() {
        assert_eq!(LivenessStatus::Transitioning.to_string(), "transitioning");
    }
}
