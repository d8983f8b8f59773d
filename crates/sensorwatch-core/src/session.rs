// ── Monitoring session task ──
//
// One task owns every liveness record, every push stream, every poller
// and the directory. Channel tasks, timers, poll requests and API calls
// only post `Input`s to it, so each input is applied to completion before
// the next one is looked at.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use sensorwatch_api::wire::{
    ClientMessage, DeviceEntry, DeviceStatusResponse, PushMessage, SampleBatch, SensorStatus,
};
use sensorwatch_api::{ChannelEvent, ChannelEventKind, ChannelSink, CloseCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::MonitorConfig;
use crate::liveness::{LivenessPolicy, Observation};
use crate::model::{LivenessRecord, SensorKey, directory_from_entries};
use crate::resilience::{CloseOutcome, PushStream, ResiliencePolicy, StreamId};
use crate::scheduler::{Scheduler, TimerFire};
use crate::store::{DirectoryReconciler, SharedState};
use crate::transport::{PushConnection, Transport};

// ── Inputs ───────────────────────────────────────────────────────────

/// Requests from the `Monitor` handle.
#[derive(Debug)]
pub(crate) enum Command {
    Watch(SensorKey),
    Unwatch(SensorKey),
    ManualRefresh,
    Shutdown,
}

pub(crate) enum Input {
    Channel {
        stream: StreamId,
        event: ChannelEvent,
    },
    Timer(TimerFire<TimerKey>),
    DeviceStatus {
        device: String,
        result: Result<DeviceStatusResponse, sensorwatch_api::Error>,
    },
    Directory {
        requested_at: Instant,
        result: Result<HashMap<String, DeviceEntry>, sensorwatch_api::Error>,
    },
    Command(Command),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PollTarget {
    Device(String),
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    Reconnect(StreamId),
    Stale(StreamId),
    Liveness(SensorKey),
    Poll(PollTarget),
}

// ── Session state ────────────────────────────────────────────────────

struct PushSlot {
    connection: Option<Box<dyn PushConnection>>,
    stream: PushStream,
}

#[derive(Default)]
struct DeviceFeed {
    sensors: BTreeSet<String>,
    /// Sensors are learned from the first successful status poll.
    learning: bool,
}

#[derive(Default)]
struct Poller {
    failures: u32,
    request: Option<JoinHandle<()>>,
}

impl Poller {
    fn in_flight(&self) -> bool {
        self.request.as_ref().is_some_and(|h| !h.is_finished())
    }
}

pub(crate) struct Session {
    transport: Arc<dyn Transport>,
    shared: Arc<SharedState>,
    inputs: mpsc::UnboundedSender<Input>,
    scheduler: Scheduler<TimerKey>,
    liveness: LivenessPolicy,
    policy: ResiliencePolicy,
    poll_interval: Duration,
    watch_directory: bool,
    records: BTreeMap<SensorKey, LivenessRecord>,
    feeds: BTreeMap<String, DeviceFeed>,
    pushes: HashMap<StreamId, PushSlot>,
    pollers: HashMap<PollTarget, Poller>,
    reconciler: DirectoryReconciler,
    directory_errors: u32,
}

impl Session {
    pub(crate) fn new(
        config: &MonitorConfig,
        transport: Arc<dyn Transport>,
        shared: Arc<SharedState>,
        inputs: mpsc::UnboundedSender<Input>,
    ) -> Self {
        let timer_tx = inputs.clone();
        let scheduler = Scheduler::new(move |fire| {
            let _ = timer_tx.send(Input::Timer(fire));
        });

        let mut feeds = BTreeMap::new();
        for feed in &config.feeds {
            let entry: &mut DeviceFeed = feeds.entry(feed.device.clone()).or_default();
            entry.learning = feed.sensors.is_empty();
            entry.sensors.extend(feed.sensors.iter().cloned());
        }

        Self {
            transport,
            shared,
            inputs,
            scheduler,
            liveness: LivenessPolicy::from(config),
            policy: ResiliencePolicy::from(config),
            poll_interval: config.poll_interval,
            watch_directory: config.watch_directory,
            records: BTreeMap::new(),
            feeds,
            pushes: HashMap::new(),
            pollers: HashMap::new(),
            reconciler: DirectoryReconciler::new(),
            directory_errors: 0,
        }
    }

    /// Drive the session until shutdown or cancellation.
    pub(crate) async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<Input>,
        cancel: CancellationToken,
    ) {
        self.start();
        loop {
            let input = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                input = inputs.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };
            if !self.handle(input) {
                break;
            }
            self.shared.refresh_status(self.directory_available());
        }
        self.teardown();
    }

    fn start(&mut self) {
        let now = Instant::now();
        let keys: Vec<SensorKey> = self
            .feeds
            .iter()
            .flat_map(|(device, feed)| feed.sensors.iter().map(move |s| SensorKey::new(device, s)))
            .collect();
        info!(sensors = keys.len(), devices = self.feeds.len(), "monitor session starting");

        for key in keys {
            self.track_sensor(key, now);
        }
        let learning: Vec<String> = self
            .feeds
            .iter()
            .filter(|(_, feed)| feed.learning)
            .map(|(device, _)| device.clone())
            .collect();
        for device in learning {
            debug!(device, "no sensors configured, learning them from the server");
            self.ensure_polling(PollTarget::Device(device));
        }
        if self.watch_directory {
            self.open_push(StreamId::Directory, now);
        }
        self.shared.refresh_status(self.directory_available());
    }

    fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Channel { stream, event } => self.on_channel(stream, event),
            Input::Timer(fire) => self.on_timer(&fire),
            Input::DeviceStatus { device, result } => self.on_device_status(device, result),
            Input::Directory {
                requested_at,
                result,
            } => self.on_directory_poll(requested_at, result),
            Input::Command(Command::Watch(key)) => self.watch(key),
            Input::Command(Command::Unwatch(key)) => self.unwatch(&key),
            Input::Command(Command::ManualRefresh) => self.manual_refresh(),
            Input::Command(Command::Shutdown) => return false,
        }
        true
    }

    fn teardown(&mut self) {
        self.scheduler.cancel_all();
        for (stream, mut slot) in self.pushes.drain() {
            slot.stream.disconnect();
            if let Some(connection) = slot.connection.take() {
                connection.disconnect("monitor shut down");
            }
            self.shared.publish_channel(&stream, slot.stream.state());
        }
        for (_, poller) in self.pollers.drain() {
            if let Some(request) = poller.request {
                request.abort();
            }
        }
        info!("monitor session stopped");
    }

    // ── Sensors ──────────────────────────────────────────────────────

    fn track_sensor(&mut self, key: SensorKey, now: Instant) {
        if self.records.contains_key(&key) {
            return;
        }
        self.feeds
            .entry(key.device.clone())
            .or_default()
            .sensors
            .insert(key.sensor.clone());
        let record = LivenessRecord::default();
        self.shared.publish_liveness(&key, &record);
        self.records.insert(key.clone(), record);
        self.open_push(StreamId::Sensor(key), now);
    }

    fn watch(&mut self, key: SensorKey) {
        info!(sensor = %key, "watching sensor");
        self.track_sensor(key, Instant::now());
    }

    fn unwatch(&mut self, key: &SensorKey) {
        if self.records.remove(key).is_none() {
            return;
        }
        info!(sensor = %key, "unwatching sensor");
        let stream = StreamId::Sensor(key.clone());
        self.close_push(&stream, "sensor unwatched");
        self.scheduler.cancel(&TimerKey::Liveness(key.clone()));
        self.shared.remove_liveness(key);
        self.shared.remove_channel(&stream);

        if let Some(feed) = self.feeds.get_mut(&key.device) {
            feed.sensors.remove(&key.sensor);
            if feed.sensors.is_empty() && !feed.learning {
                self.feeds.remove(&key.device);
            }
        }
        self.stop_polling_if_idle(&PollTarget::Device(key.device.clone()));
    }

    /// Apply one observation and reschedule the record's liveness tick.
    fn observe(&mut self, key: &SensorKey, observation: Observation, now: Instant) {
        let policy = self.liveness;
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        let before = record.status;
        policy.observe(record, observation, now);
        if record.status != before {
            debug!(sensor = %key, from = %before, to = %record.status, "liveness changed");
        }
        self.after_liveness_change(key);
    }

    fn tick(&mut self, key: &SensorKey, now: Instant) {
        let policy = self.liveness;
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        let before = record.status;
        policy.evaluate(record, now);
        if record.status != before {
            debug!(sensor = %key, from = %before, to = %record.status, "liveness changed");
        }
        self.after_liveness_change(key);
    }

    fn after_liveness_change(&mut self, key: &SensorKey) {
        let Some(record) = self.records.get(key) else {
            return;
        };
        let timer = TimerKey::Liveness(key.clone());
        match self.liveness.next_deadline(record) {
            Some(deadline) => self.scheduler.schedule_at(timer, deadline),
            None => {
                self.scheduler.cancel(&timer);
            }
        }
        self.shared.publish_liveness(key, record);
    }

    // ── Push channels ────────────────────────────────────────────────

    fn open_push(&mut self, stream: StreamId, now: Instant) {
        let tx = self.inputs.clone();
        let tag = stream.clone();
        let sink: Arc<dyn ChannelSink> = Arc::new(move |event: ChannelEvent| {
            let _ = tx.send(Input::Channel {
                stream: tag.clone(),
                event,
            });
        });

        let mut slot = PushSlot {
            connection: None,
            stream: PushStream::for_stream(&stream),
        };
        match self.transport.open_push(&stream, sink) {
            Ok(connection) => {
                slot.stream.connecting(connection.connect());
                slot.connection = Some(connection);
                self.scheduler
                    .schedule_at(TimerKey::Stale(stream.clone()), now + self.policy.recent_data_window);
            }
            Err(e) => {
                warn!(%stream, error = %e, "cannot create push channel, polling instead");
                slot.stream.abandon();
            }
        }
        let polling = slot.stream.is_polling();
        self.shared.publish_channel(&stream, slot.stream.state());
        self.pushes.insert(stream.clone(), slot);
        if polling {
            self.ensure_polling(poll_target(&stream));
        }
    }

    fn close_push(&mut self, stream: &StreamId, reason: &str) {
        self.scheduler.cancel(&TimerKey::Reconnect(stream.clone()));
        self.scheduler.cancel(&TimerKey::Stale(stream.clone()));
        if let Some(mut slot) = self.pushes.remove(stream) {
            slot.stream.disconnect();
            if let Some(connection) = slot.connection {
                connection.disconnect(reason);
            }
        }
    }

    fn on_channel(&mut self, stream: StreamId, event: ChannelEvent) {
        let now = Instant::now();
        match event.kind {
            ChannelEventKind::Opened => self.on_opened(stream, event.connection, now),
            ChannelEventKind::Message(text) => {
                let current = self
                    .pushes
                    .get(&stream)
                    .is_some_and(|slot| slot.stream.is_current(event.connection));
                if current {
                    self.on_push_message(stream, &text, now);
                }
            }
            ChannelEventKind::Closed(code) => self.on_closed(stream, event.connection, code, now),
        }
    }

    fn on_opened(&mut self, stream: StreamId, connection: u64, now: Instant) {
        let Some(slot) = self.pushes.get_mut(&stream) else {
            return;
        };
        let was_polling = slot.stream.is_polling();
        if !slot.stream.opened(connection) {
            return;
        }
        info!(%stream, connection, "push channel open");
        let fallback_ended = was_polling && !slot.stream.is_polling();
        let open_is_fresh = slot.stream.open_is_fresh();
        self.shared.publish_channel(&stream, slot.stream.state());
        self.scheduler.cancel(&TimerKey::Reconnect(stream.clone()));
        if open_is_fresh {
            self.scheduler.cancel(&TimerKey::Stale(stream.clone()));
        } else {
            self.scheduler.ensure_at(
                TimerKey::Stale(stream.clone()),
                now + self.policy.recent_data_window,
            );
        }
        if fallback_ended {
            info!(%stream, "push channel back, polling stopped");
            self.stop_polling_if_idle(&poll_target(&stream));
        }
        if let StreamId::Sensor(key) = &stream {
            self.tick(key, now);
        }
    }

    fn on_closed(&mut self, stream: StreamId, connection: u64, code: CloseCode, now: Instant) {
        let policy = self.policy;
        let Some(slot) = self.pushes.get_mut(&stream) else {
            return;
        };
        let outcome = slot.stream.closed(connection, code, now, &policy);
        let state = slot.stream.state().clone();

        let fallback_activated = match outcome {
            CloseOutcome::Stale => return,
            CloseOutcome::Finished => {
                info!(%stream, %code, "push channel closed");
                false
            }
            CloseOutcome::Retry {
                attempt,
                delay,
                fallback_activated,
            } => {
                warn!(
                    %stream,
                    %code,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "push channel lost, reconnecting"
                );
                self.scheduler.schedule(TimerKey::Reconnect(stream.clone()), delay);
                self.push_failed(&stream, code, now);
                fallback_activated
            }
            CloseOutcome::GaveUp { fallback_activated } => {
                warn!(%stream, %code, attempts = state.attempt, "giving up on push for this session");
                self.push_failed(&stream, code, now);
                fallback_activated
            }
        };

        self.shared.publish_channel(&stream, &state);
        if fallback_activated {
            self.fallback_started(&stream);
        } else if !state.polling {
            self.scheduler.ensure_at(
                TimerKey::Stale(stream.clone()),
                now + policy.recent_data_window,
            );
        }
    }

    fn push_failed(&mut self, stream: &StreamId, code: CloseCode, now: Instant) {
        match stream {
            StreamId::Sensor(key) => self.observe(
                key,
                Observation::Error {
                    message: format!("push channel closed ({code})"),
                },
                now,
            ),
            StreamId::Directory => {
                self.directory_errors = self.directory_errors.saturating_add(1);
            }
        }
    }

    fn on_push_message(&mut self, stream: StreamId, text: &str, now: Instant) {
        let message = match PushMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(%stream, error = %e, "dropping malformed push message");
                return;
            }
        };

        match (&stream, message) {
            (
                StreamId::Sensor(key),
                PushMessage::Historical { data } | PushMessage::Update { data },
            ) => {
                let batch = match SampleBatch::try_from(data) {
                    Ok(batch) => batch,
                    Err(e) => {
                        debug!(sensor = %key, error = %e, "dropping malformed sample batch");
                        return;
                    }
                };
                trace!(sensor = %key, samples = batch.len(), "push batch");
                let data_points = u64::try_from(batch.len()).unwrap_or(u64::MAX);
                if batch.is_empty() {
                    self.observe(key, Observation::Empty { data_points }, now);
                    return;
                }
                self.push_fresh(&stream, batch.latest_time(), now);
                self.observe(key, Observation::Sample { at: now, data_points }, now);
            }
            (StreamId::Directory, PushMessage::DeviceListUpdate { devices }) => {
                self.push_fresh(&stream, None, now);
                self.apply_directory(devices, now);
            }
            (_, other) => {
                debug!(%stream, message = ?other, "ignoring push message for another stream kind");
            }
        }
    }

    /// A data-bearing push message arrived: re-arm the stale timer and end
    /// the poll fallback if this push is fresher than the last poll.
    fn push_fresh(&mut self, stream: &StreamId, sample_time: Option<f64>, now: Instant) {
        let window = self.policy.recent_data_window;
        let Some(slot) = self.pushes.get_mut(stream) else {
            return;
        };
        let ended = slot.stream.push_received(now, sample_time);
        self.shared.publish_channel(stream, slot.stream.state());
        if let Some(deadline) = slot.stream.stale_deadline(now, window) {
            self.scheduler.schedule_at(TimerKey::Stale(stream.clone()), deadline);
        }
        if ended {
            info!(%stream, "push delivering fresh data, polling stopped");
            self.stop_polling_if_idle(&poll_target(stream));
        }
    }

    fn fallback_started(&mut self, stream: &StreamId) {
        info!(%stream, "push degraded, falling back to polling");
        self.scheduler.cancel(&TimerKey::Stale(stream.clone()));
        self.ensure_polling(poll_target(stream));
    }

    // ── Timers ───────────────────────────────────────────────────────

    fn on_timer(&mut self, fire: &TimerFire<TimerKey>) {
        if !self.scheduler.accept(fire) {
            return;
        }
        let now = Instant::now();
        match &fire.key {
            TimerKey::Reconnect(stream) => self.reconnect(stream),
            TimerKey::Stale(stream) => self.check_stale(stream, now),
            TimerKey::Liveness(key) => self.tick(key, now),
            TimerKey::Poll(target) => self.start_poll(target.clone(), false),
        }
    }

    fn reconnect(&mut self, stream: &StreamId) {
        let Some(slot) = self.pushes.get_mut(stream) else {
            return;
        };
        if !slot.stream.wants_reconnect() {
            return;
        }
        if let Some(connection) = &slot.connection {
            let id = connection.connect();
            slot.stream.connecting(id);
            debug!(%stream, connection = id, attempt = slot.stream.state().attempt, "reconnecting push channel");
            self.shared.publish_channel(stream, slot.stream.state());
        }
    }

    fn check_stale(&mut self, stream: &StreamId, now: Instant) {
        let window = self.policy.recent_data_window;
        let Some(slot) = self.pushes.get_mut(stream) else {
            return;
        };
        if slot.stream.check_stale(now, window) {
            self.shared.publish_channel(stream, slot.stream.state());
            self.fallback_started(stream);
        } else if let Some(deadline) = slot.stream.stale_deadline(now, window) {
            self.scheduler.schedule_at(TimerKey::Stale(stream.clone()), deadline);
        }
    }

    // ── Polling ──────────────────────────────────────────────────────

    fn poll_needed(&self, target: &PollTarget) -> bool {
        match target {
            PollTarget::Directory => self
                .pushes
                .get(&StreamId::Directory)
                .is_some_and(|slot| slot.stream.is_polling()),
            PollTarget::Device(device) => {
                let Some(feed) = self.feeds.get(device) else {
                    return false;
                };
                feed.learning
                    || feed.sensors.iter().any(|sensor| {
                        self.pushes
                            .get(&StreamId::Sensor(SensorKey::new(device, sensor)))
                            .is_some_and(|slot| slot.stream.is_polling())
                    })
            }
        }
    }

    fn ensure_polling(&mut self, target: PollTarget) {
        if self.pollers.contains_key(&target) {
            return;
        }
        self.pollers.insert(target.clone(), Poller::default());
        self.start_poll(target, false);
    }

    fn stop_polling_if_idle(&mut self, target: &PollTarget) {
        if self.poll_needed(target) {
            return;
        }
        self.scheduler.cancel(&TimerKey::Poll(target.clone()));
        if self.pollers.get(target).is_some_and(|p| !p.in_flight()) {
            self.pollers.remove(target);
            debug!(?target, "poller stopped");
        }
    }

    /// Issue one poll request. `forced` polls run even if nothing is in
    /// fallback (manual refresh).
    fn start_poll(&mut self, target: PollTarget, forced: bool) {
        if !forced && !self.poll_needed(&target) {
            self.pollers.remove(&target);
            return;
        }
        let poller = self.pollers.entry(target.clone()).or_default();
        if poller.in_flight() {
            return;
        }

        let tx = self.inputs.clone();
        let request = match &target {
            PollTarget::Device(device) => {
                let device = device.clone();
                let request = self.transport.device_status(&device);
                tokio::spawn(async move {
                    let result = request.await;
                    let _ = tx.send(Input::DeviceStatus { device, result });
                })
            }
            PollTarget::Directory => {
                let requested_at = Instant::now();
                let request = self.transport.devices();
                tokio::spawn(async move {
                    let result = request.await;
                    let _ = tx.send(Input::Directory {
                        requested_at,
                        result,
                    });
                })
            }
        };
        trace!(?target, "poll issued");
        poller.request = Some(request);
    }

    /// Record a finished poll and schedule the next one if still needed.
    fn poll_finished(&mut self, target: &PollTarget, ok: bool) -> u32 {
        let needed = self.poll_needed(target);
        let Some(poller) = self.pollers.get_mut(target) else {
            return 0;
        };
        poller.request = None;
        if ok {
            poller.failures = 0;
        } else {
            poller.failures = poller.failures.saturating_add(1);
        }
        let failures = poller.failures;

        if needed {
            let delay = if failures == 0 {
                self.poll_interval
            } else {
                self.policy.poll.delay(failures.saturating_add(1))
            };
            self.scheduler.schedule(TimerKey::Poll(target.clone()), delay);
        } else {
            self.pollers.remove(target);
        }
        failures
    }

    fn on_device_status(
        &mut self,
        device: String,
        result: Result<DeviceStatusResponse, sensorwatch_api::Error>,
    ) {
        let now = Instant::now();
        let target = PollTarget::Device(device.clone());
        match result {
            Ok(response) => {
                self.apply_device_status(&device, &response, now);
                self.poll_finished(&target, true);
            }
            Err(e) => {
                let failures = self.poll_finished(&target, false);
                warn!(device, failures, transient = e.is_transient(), error = %e, "status poll failed");
                let message = format!("status poll failed: {e}");
                for key in self.polling_sensors(&device) {
                    self.observe(
                        &key,
                        Observation::Error {
                            message: message.clone(),
                        },
                        now,
                    );
                }
            }
        }
    }

    fn polling_sensors(&self, device: &str) -> Vec<SensorKey> {
        self.feeds.get(device).map_or_else(Vec::new, |feed| {
            feed.sensors
                .iter()
                .map(|sensor| SensorKey::new(device, sensor))
                .filter(|key| {
                    self.pushes
                        .get(&StreamId::Sensor(key.clone()))
                        .is_some_and(|slot| slot.stream.is_polling())
                })
                .collect()
        })
    }

    fn apply_device_status(&mut self, device: &str, response: &DeviceStatusResponse, now: Instant) {
        let Some(feed) = self.feeds.get_mut(device) else {
            return;
        };
        if feed.learning {
            feed.learning = false;
            info!(device, sensors = response.sensors.len(), "learned sensors from status poll");
            let learned: Vec<SensorKey> = response
                .sensors
                .keys()
                .map(|sensor| SensorKey::new(device, sensor))
                .collect();
            for key in learned {
                self.track_sensor(key, now);
            }
        }

        let Some(feed) = self.feeds.get(device) else {
            return;
        };
        for sensor in response.sensors.keys() {
            if !feed.sensors.contains(sensor) {
                warn!(device, sensor, "status poll reported an unconfigured sensor, ignoring");
            }
        }
        let sensors: Vec<String> = feed.sensors.iter().cloned().collect();

        for sensor in sensors {
            let key = SensorKey::new(device, &sensor);
            let (source_time, observation) = match response.sensors.get(&sensor) {
                Some(status) => status_observation(status, now),
                None => (now, Observation::Absent),
            };
            let stream = StreamId::Sensor(key.clone());
            if let Some(slot) = self.pushes.get_mut(&stream) {
                if !slot.stream.accept_poll(source_time) {
                    trace!(sensor = %key, "discarding poll result older than last push");
                    continue;
                }
            }
            self.observe(&key, observation, now);
        }
    }

    // ── Directory ────────────────────────────────────────────────────

    fn on_directory_poll(
        &mut self,
        requested_at: Instant,
        result: Result<HashMap<String, DeviceEntry>, sensorwatch_api::Error>,
    ) {
        let now = Instant::now();
        match result {
            Ok(entries) => {
                self.poll_finished(&PollTarget::Directory, true);
                let accepted = self
                    .pushes
                    .get_mut(&StreamId::Directory)
                    .is_none_or(|slot| slot.stream.accept_poll(requested_at));
                if accepted {
                    self.apply_directory(entries, now);
                } else {
                    trace!("discarding directory poll older than last push");
                }
            }
            Err(e) => {
                let failures = self.poll_finished(&PollTarget::Directory, false);
                self.directory_errors = self.directory_errors.saturating_add(1);
                warn!(failures, transient = e.is_transient(), error = %e, "directory poll failed");
            }
        }
    }

    fn apply_directory(&mut self, entries: HashMap<String, DeviceEntry>, now: Instant) {
        self.directory_errors = 0;
        let first = !self.reconciler.has_snapshot();
        let diff = self.reconciler.reconcile(directory_from_entries(entries));
        if first {
            info!(devices = diff.added.len(), "device directory received");
        } else if !diff.is_empty() {
            info!(
                added = diff.added.len(),
                updated = diff.updated.len(),
                removed = diff.removed.len(),
                "device directory changed"
            );
        }
        self.shared.publish_directory(self.reconciler.current(), &diff);

        let gone: Vec<SensorKey> = self
            .records
            .keys()
            .filter(|key| diff.removed.contains(&key.device))
            .cloned()
            .collect();
        for key in gone {
            debug!(sensor = %key, "device left the directory");
            self.observe(&key, Observation::Absent, now);
        }
    }

    fn directory_available(&self) -> bool {
        self.directory_errors < self.policy.max_consecutive_errors
    }

    // ── Manual refresh ───────────────────────────────────────────────

    fn manual_refresh(&mut self) {
        let now = Instant::now();
        info!("manual refresh requested");
        let request = ClientMessage::RequestUpdate.to_json();
        for slot in self.pushes.values() {
            if let Some(connection) = &slot.connection {
                if slot.stream.state().connected {
                    connection.send(&request);
                }
            }
        }

        let devices: Vec<String> = self.feeds.keys().cloned().collect();
        for device in devices {
            self.start_poll(PollTarget::Device(device), true);
        }
        if self.watch_directory {
            self.start_poll(PollTarget::Directory, true);
        }

        let keys: Vec<SensorKey> = self.records.keys().cloned().collect();
        for key in keys {
            self.tick(&key, now);
        }
    }
}

fn poll_target(stream: &StreamId) -> PollTarget {
    match stream {
        StreamId::Sensor(key) => PollTarget::Device(key.device.clone()),
        StreamId::Directory => PollTarget::Directory,
    }
}

/// Normalise one sensor's status-poll entry. Returns the source time used
/// for race resolution alongside the observation.
fn status_observation(status: &SensorStatus, now: Instant) -> (Instant, Observation) {
    let data_points = status.data_points;
    if !status.has_data {
        return (now, Observation::Empty { data_points });
    }
    let produced_at = status
        .time_since_last_update
        .and_then(|age| Duration::try_from_secs_f64(age).ok())
        .and_then(|age| now.checked_sub(age));
    match produced_at {
        Some(at) => (at, Observation::Sample { at, data_points }),
        None if status.is_recent => (now, Observation::Sample { at: now, data_points }),
        None => (now, Observation::Empty { data_points }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(has_data: bool, age: Option<f64>, is_recent: bool) -> SensorStatus {
        SensorStatus {
            has_data,
            data_points: 42,
            time_since_last_update: age,
            is_recent,
            debug_info: None,
        }
    }

    #[test]
    fn poll_sample_is_dated_by_age() {
        let now = Instant::now() + Duration::from_secs(60);
        let (at, obs) = status_observation(&status(true, Some(2.5), true), now);
        assert_eq!(at, now - Duration::from_millis(2_500));
        assert_eq!(
            obs,
            Observation::Sample {
                at,
                data_points: 42
            }
        );
    }

    #[test]
    fn no_data_is_an_empty_observation() {
        let now = Instant::now();
        let (_, obs) = status_observation(&status(false, None, false), now);
        assert_eq!(obs, Observation::Empty { data_points: 42 });
    }

    #[test]
    fn undated_recent_data_counts_as_now() {
        let now = Instant::now();
        let (at, _) = status_observation(&status(true, None, true), now);
        assert_eq!(at, now);
        let (_, obs) = status_observation(&status(true, Some(f64::NAN), false), now);
        assert_eq!(obs, Observation::Empty { data_points: 42 });
    }
}
