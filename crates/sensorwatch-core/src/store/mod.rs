// ── Published session state ──
//
// The session task is the only writer. Everything here exists so that
// readers (`Monitor` accessors, subscribers) never wait on it: liveness
// records and channel states live in `DashMap`s, the directory behind an
// `ArcSwap`, and the status summary in a `watch` channel.

pub mod directory;
pub mod subscribers;

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::watch;

pub use directory::{DirectoryReconciler, diff};
pub use subscribers::Subscription;
use subscribers::Registry;

use crate::model::{DeviceDirectory, DirectoryDiff, LivenessRecord, SensorKey};
use crate::resilience::{ChannelState, StreamId};
use crate::status::{StatusSummary, aggregate};

pub(crate) struct SharedState {
    liveness: DashMap<SensorKey, LivenessRecord>,
    channels: DashMap<StreamId, ChannelState>,
    directory: ArcSwap<DeviceDirectory>,
    status: watch::Sender<Arc<StatusSummary>>,
    sensor_listeners: Arc<Registry<SensorKey, LivenessRecord>>,
    directory_listeners: Arc<Registry<(), DirectoryDiff>>,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(Arc::new(StatusSummary::default()));
        Self {
            liveness: DashMap::new(),
            channels: DashMap::new(),
            directory: ArcSwap::from_pointee(DeviceDirectory::new()),
            status,
            sensor_listeners: Registry::new(),
            directory_listeners: Registry::new(),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub(crate) fn liveness(&self, key: &SensorKey) -> Option<LivenessRecord> {
        self.liveness.get(key).map(|r| r.value().clone())
    }

    pub(crate) fn sensors(&self) -> Vec<SensorKey> {
        let mut keys: Vec<SensorKey> = self.liveness.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub(crate) fn channel_state(&self, stream: &StreamId) -> Option<ChannelState> {
        self.channels.get(stream).map(|s| s.value().clone())
    }

    pub(crate) fn directory(&self) -> Arc<DeviceDirectory> {
        self.directory.load_full()
    }

    pub(crate) fn status(&self) -> Arc<StatusSummary> {
        self.status.borrow().clone()
    }

    pub(crate) fn status_receiver(&self) -> watch::Receiver<Arc<StatusSummary>> {
        self.status.subscribe()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub(crate) fn subscribe_sensor(
        &self,
        key: SensorKey,
        on_change: impl Fn(&LivenessRecord) + Send + Sync + 'static,
    ) -> Subscription {
        self.sensor_listeners.add(key, on_change)
    }

    pub(crate) fn subscribe_directory(
        &self,
        on_diff: impl Fn(&DirectoryDiff) + Send + Sync + 'static,
    ) -> Subscription {
        self.directory_listeners.add((), on_diff)
    }

    // ── Writes (session task only) ───────────────────────────────────

    /// Publish a record. Listeners are notified only when something they
    /// can observe changed; entering the hysteresis window is not such a
    /// change, since it still reports `Active`.
    pub(crate) fn publish_liveness(&self, key: &SensorKey, record: &LivenessRecord) {
        let previous = self.liveness.insert(key.clone(), record.clone());
        if previous.is_none_or(|previous| !same_observable(&previous, record)) {
            self.sensor_listeners.notify(key, record);
        }
    }

    pub(crate) fn remove_liveness(&self, key: &SensorKey) {
        self.liveness.remove(key);
    }

    pub(crate) fn publish_channel(&self, stream: &StreamId, state: &ChannelState) {
        self.channels.insert(stream.clone(), state.clone());
    }

    pub(crate) fn remove_channel(&self, stream: &StreamId) {
        self.channels.remove(stream);
    }

    /// Replace the directory and notify listeners of a non-empty diff.
    pub(crate) fn publish_directory(&self, directory: &DeviceDirectory, diff: &DirectoryDiff) {
        self.directory.store(Arc::new(directory.clone()));
        if !diff.is_empty() {
            self.directory_listeners.notify(&(), diff);
        }
    }

    /// Recompute the summary; subscribers are only woken on change.
    pub(crate) fn refresh_status(&self, directory_available: bool) {
        let records: Vec<(SensorKey, LivenessRecord)> = self
            .liveness
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let directory = self.directory.load();
        let summary = aggregate(
            records.iter().map(|(k, r)| (k, r)),
            &directory,
            directory_available,
        );
        self.status.send_if_modified(|current| {
            if **current == summary {
                false
            } else {
                *current = Arc::new(summary);
                true
            }
        });
    }
}

fn same_observable(a: &LivenessRecord, b: &LivenessRecord) -> bool {
    a.reported_status() == b.reported_status()
        && a.data_points == b.data_points
        && a.last_data_at == b.last_data_at
        && a.consecutive_errors == b.consecutive_errors
        && a.last_error_message == b.last_error_message
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::model::LivenessStatus;

    #[test]
    fn unchanged_record_does_not_notify() {
        let state = SharedState::new();
        let key = SensorKey::new("d1", "gyroscope");
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let _sub = state.subscribe_sensor(key.clone(), move |_| *counter.lock().unwrap() += 1);

        let record = LivenessRecord::default();
        state.publish_liveness(&key, &record);
        state.publish_liveness(&key, &record);
        assert_eq!(*seen.lock().unwrap(), 1);

        let active = LivenessRecord {
            status: LivenessStatus::Active,
            ..record
        };
        state.publish_liveness(&key, &active);
        assert_eq!(*seen.lock().unwrap(), 2);
        assert_eq!(state.liveness(&key).unwrap().status, LivenessStatus::Active);
    }

    #[test]
    fn entering_hysteresis_is_not_announced() {
        let state = SharedState::new();
        let key = SensorKey::new("d1", "gyroscope");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = state.subscribe_sensor(key.clone(), move |r: &LivenessRecord| {
            sink.lock().unwrap().push(r.reported_status());
        });

        let active = LivenessRecord {
            status: LivenessStatus::Active,
            data_points: 10,
            ..LivenessRecord::default()
        };
        state.publish_liveness(&key, &active);
        let transitioning = LivenessRecord {
            status: LivenessStatus::Transitioning,
            transition_started_at: Some(tokio::time::Instant::now()),
            ..active.clone()
        };
        state.publish_liveness(&key, &transitioning);
        assert_eq!(
            state.liveness(&key).unwrap().status,
            LivenessStatus::Transitioning
        );

        state.publish_liveness(
            &key,
            &LivenessRecord {
                status: LivenessStatus::Inactive,
                transition_started_at: None,
                ..transitioning
            },
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![LivenessStatus::Active, LivenessStatus::Inactive]
        );
    }

    #[test]
    fn status_tracks_published_records() {
        let state = SharedState::new();
        let mut rx = state.status_receiver();
        let key = SensorKey::new("d1", "gyroscope");
        state.publish_liveness(
            &key,
            &LivenessRecord {
                status: LivenessStatus::Transitioning,
                ..LivenessRecord::default()
            },
        );
        state.refresh_status(true);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().active_sensors, 1);

        state.refresh_status(true);
        assert!(!rx.has_changed().unwrap());
    }
}
