//! Per-sensor liveness state machine with hysteresis.
//!
//! [`LivenessPolicy`] holds the tunables and applies observations and
//! clock ticks to a [`LivenessRecord`]. It never reads the clock itself:
//! every call takes `now`, so the transitions are deterministic and the
//! session decides when ticks happen (see [`LivenessPolicy::next_deadline`]).
//!
//! ```text
//!  Unknown ──fresh──▶ Active ──stale──▶ Transitioning ──delay──▶ Inactive
//!                       ▲                    │                     │
//!                       └──────fresh─────────┴─────────fresh───────┘
//!
//!  any ──errors ≥ max──▶ Error ──next success──▶ (re-derived)
//!  any ──absent──▶ Inactive
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::config::MonitorConfig;
use crate::model::{LivenessRecord, LivenessStatus};

/// A normalized observation about one sensor, from either transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Data is present; its newest sample was produced at `at`.
    Sample { at: Instant, data_points: u64 },
    /// A successful receipt that carries no dated sample (an empty batch,
    /// or a status poll reporting no data).
    Empty { data_points: u64 },
    /// An authoritative snapshot omitted the sensor.
    Absent,
    /// A transport failure affecting the sensor.
    Error { message: String },
}

/// Liveness tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub recent_data_window: Duration,
    pub transition_delay: Duration,
    pub max_consecutive_errors: u32,
}

impl From<&MonitorConfig> for LivenessPolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            recent_data_window: config.recent_data_window,
            transition_delay: config.transition_delay,
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }
}

impl LivenessPolicy {
    /// `true` if a sample produced at `at` is still fresh at `now`.
    pub fn is_fresh(&self, at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(at) < self.recent_data_window
    }

    /// Apply one observation, then settle the record at `now`.
    pub fn observe(&self, record: &mut LivenessRecord, observation: Observation, now: Instant) {
        match observation {
            Observation::Sample { at, data_points } => {
                record_success(record, data_points);
                record.last_data_at = Some(record.last_data_at.map_or(at, |prev| prev.max(at)));
                if self.is_fresh(at, now) {
                    record.status = LivenessStatus::Active;
                    record.transition_started_at = None;
                } else {
                    self.rederive(record, now);
                }
            }
            Observation::Empty { data_points } => {
                record_success(record, data_points);
                self.rederive(record, now);
            }
            Observation::Absent => {
                record.consecutive_errors = 0;
                record.last_error_message = None;
                record.status = LivenessStatus::Inactive;
                record.transition_started_at = None;
            }
            Observation::Error { message } => {
                record.consecutive_errors = record.consecutive_errors.saturating_add(1);
                record.last_error_message = Some(message);
                if record.consecutive_errors >= self.max_consecutive_errors {
                    record.status = LivenessStatus::Error;
                    record.transition_started_at = None;
                }
            }
        }
    }

    /// Advance time-driven transitions (staleness and hysteresis).
    ///
    /// At most one step is taken per call: a stale `Active` record enters
    /// `Transitioning` at `now` and needs another tick at least
    /// `transition_delay` later to become `Inactive`.
    pub fn evaluate(&self, record: &mut LivenessRecord, now: Instant) {
        match record.status {
            LivenessStatus::Active => {
                let stale = record.last_data_at.is_none_or(|at| !self.is_fresh(at, now));
                if stale {
                    record.status = LivenessStatus::Transitioning;
                    record.transition_started_at = Some(now);
                }
            }
            LivenessStatus::Transitioning => {
                if record.last_data_at.is_some_and(|at| self.is_fresh(at, now)) {
                    record.status = LivenessStatus::Active;
                    record.transition_started_at = None;
                    return;
                }
                let started = record.transition_started_at.unwrap_or(now);
                if now.saturating_duration_since(started) >= self.transition_delay {
                    record.status = LivenessStatus::Inactive;
                    record.transition_started_at = None;
                }
            }
            LivenessStatus::Unknown | LivenessStatus::Inactive | LivenessStatus::Error => {}
        }
    }

    /// When the record next needs an [`evaluate`](Self::evaluate) tick.
    pub fn next_deadline(&self, record: &LivenessRecord) -> Option<Instant> {
        match record.status {
            LivenessStatus::Active => record.last_data_at.map(|at| at + self.recent_data_window),
            LivenessStatus::Transitioning => record
                .transition_started_at
                .map(|at| at + self.transition_delay),
            LivenessStatus::Unknown | LivenessStatus::Inactive | LivenessStatus::Error => None,
        }
    }

    /// Successful observation without a fresh sample: clear `Error` and
    /// `Unknown` to whatever the data implies, then tick.
    fn rederive(&self, record: &mut LivenessRecord, now: Instant) {
        if matches!(record.status, LivenessStatus::Error | LivenessStatus::Unknown) {
            record.status = match record.last_data_at {
                Some(at) if self.is_fresh(at, now) => LivenessStatus::Active,
                _ if record.has_data() => LivenessStatus::Inactive,
                _ => LivenessStatus::Unknown,
            };
            record.transition_started_at = None;
        }
        self.evaluate(record, now);
    }
}

fn record_success(record: &mut LivenessRecord, data_points: u64) {
    record.data_points = data_points;
    record.consecutive_errors = 0;
    record.last_error_message = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(window_ms: u64, delay_ms: u64) -> LivenessPolicy {
        LivenessPolicy {
            recent_data_window: Duration::from_millis(window_ms),
            transition_delay: Duration::from_millis(delay_ms),
            max_consecutive_errors: 3,
        }
    }

    fn ms(t0: Instant, millis: u64) -> Instant {
        t0 + Duration::from_millis(millis)
    }

    fn sample(at: Instant) -> Observation {
        Observation::Sample { at, data_points: 10 }
    }

    #[test]
    fn push_sample_goes_stale_then_inactive() {
        let p = policy(3_000, 2_000);
        let t0 = Instant::now();
        let mut rec = LivenessRecord::default();

        p.observe(&mut rec, sample(t0), t0);
        assert_eq!(rec.status, LivenessStatus::Active);
        assert_eq!(rec.data_points, 10);

        p.evaluate(&mut rec, ms(t0, 2_900));
        assert_eq!(rec.status, LivenessStatus::Active);

        p.evaluate(&mut rec, ms(t0, 3_100));
        assert_eq!(rec.status, LivenessStatus::Transitioning);
        assert_eq!(rec.reported_status(), LivenessStatus::Active);
        assert_eq!(rec.transition_started_at, Some(ms(t0, 3_100)));

        p.evaluate(&mut rec, ms(t0, 5_000));
        assert_eq!(rec.status, LivenessStatus::Transitioning);

        p.evaluate(&mut rec, ms(t0, 5_100));
        assert_eq!(rec.status, LivenessStatus::Inactive);
        assert_eq!(rec.transition_started_at, None);
    }

    #[test]
    fn single_missed_tick_does_not_flap() {
        let p = policy(10, 10);
        let t0 = Instant::now();
        let mut rec = LivenessRecord::default();
        p.observe(&mut rec, sample(t0), t0);

        // One missed tick inside the delay window.
        p.evaluate(&mut rec, ms(t0, 12));
        assert_eq!(rec.reported_status(), LivenessStatus::Active);
        p.observe(&mut rec, sample(ms(t0, 15)), ms(t0, 15));
        assert_eq!(rec.status, LivenessStatus::Active);
        assert_eq!(rec.transition_started_at, None);

        // Two delay windows of silence.
        p.evaluate(&mut rec, ms(t0, 25));
        p.evaluate(&mut rec, ms(t0, 35));
        assert_eq!(rec.status, LivenessStatus::Inactive);
    }

    #[test]
    fn fresh_sample_cancels_transition() {
        let p = policy(1_000, 1_000);
        let t0 = Instant::now();
        let mut rec = LivenessRecord::default();
        p.observe(&mut rec, sample(t0), t0);
        p.evaluate(&mut rec, ms(t0, 1_200));
        assert_eq!(rec.status, LivenessStatus::Transitioning);

        p.observe(&mut rec, sample(ms(t0, 1_500)), ms(t0, 1_500));
        assert_eq!(rec.status, LivenessStatus::Active);
        assert_eq!(rec.transition_started_at, None);
        assert_eq!(p.next_deadline(&rec), Some(ms(t0, 2_500)));
    }

    #[test]
    fn old_poll_sample_does_not_activate() {
        let p = policy(1_000, 1_000);
        let t0 = Instant::now();
        let mut rec = LivenessRecord::default();

        p.observe(&mut rec, sample(t0), ms(t0, 4_000));
        assert_eq!(rec.status, LivenessStatus::Inactive);
    }

    #[test]
    fn absent_bypasses_hysteresis() {
        let p = policy(1_000, 1_000);
        let t0 = Instant::now();
        let mut rec = LivenessRecord::default();
        p.observe(&mut rec, sample(t0), t0);

        p.observe(&mut rec, Observation::Absent, ms(t0, 10));
        assert_eq!(rec.reported_status(), LivenessStatus::Inactive);
        assert_eq!(rec.status, LivenessStatus::Inactive);
        assert_eq!(p.next_deadline(&rec), None);
    }

    #[test]
    fn errors_escalate_at_threshold_and_clear_on_success() {
        let p = policy(1_000, 1_000);
        let t0 = Instant::now();
        let mut rec = LivenessRecord::default();
        p.observe(&mut rec, sample(t0), t0);

        for n in 1..=2 {
            p.observe(&mut rec, Observation::Error { message: "refused".into() }, t0);
            assert_eq!(rec.consecutive_errors, n);
            assert_eq!(rec.status, LivenessStatus::Active);
        }
        p.observe(&mut rec, Observation::Error { message: "refused".into() }, t0);
        assert_eq!(rec.status, LivenessStatus::Error);
        assert_eq!(rec.last_error_message.as_deref(), Some("refused"));

        // Success without fresh data re-derives from the data held.
        p.observe(&mut rec, Observation::Empty { data_points: 10 }, ms(t0, 5_000));
        assert_eq!(rec.status, LivenessStatus::Inactive);
        assert_eq!(rec.consecutive_errors, 0);
        assert_eq!(rec.last_error_message, None);
    }

    #[test]
    fn error_without_data_recovers_to_unknown() {
        let p = policy(1_000, 1_000);
        let t0 = Instant::now();
        let mut rec = LivenessRecord::default();
        for _ in 0..3 {
            p.observe(&mut rec, Observation::Error { message: "timeout".into() }, t0);
        }
        assert_eq!(rec.status, LivenessStatus::Error);

        p.observe(&mut rec, Observation::Empty { data_points: 0 }, t0);
        assert_eq!(rec.status, LivenessStatus::Unknown);
    }

    #[test]
    fn fresh_sample_clears_error_immediately() {
        let p = policy(1_000, 1_000);
        let t0 = Instant::now();
        let mut rec = LivenessRecord {
            status: LivenessStatus::Error,
            consecutive_errors: 7,
            ..LivenessRecord::default()
        };
        p.observe(&mut rec, sample(t0), t0);
        assert_eq!(rec.status, LivenessStatus::Active);
        assert_eq!(rec.consecutive_errors, 0);
    }

    #[test]
    fn empty_observation_keeps_fresh_sensor_active() {
        let p = policy(1_000, 1_000);
        let t0 = Instant::now();
        let mut rec = LivenessRecord::default();
        p.observe(&mut rec, sample(t0), t0);
        p.observe(&mut rec, Observation::Empty { data_points: 12 }, ms(t0, 500));
        assert_eq!(rec.status, LivenessStatus::Active);
        assert_eq!(rec.data_points, 12);
    }

    #[test]
    fn last_data_at_never_moves_backwards() {
        let p = policy(10_000, 1_000);
        let t0 = Instant::now();
        let mut rec = LivenessRecord::default();
        p.observe(&mut rec, sample(ms(t0, 2_000)), ms(t0, 2_000));
        p.observe(&mut rec, sample(t0), ms(t0, 2_100));
        assert_eq!(rec.last_data_at, Some(ms(t0, 2_000)));
    }
}
