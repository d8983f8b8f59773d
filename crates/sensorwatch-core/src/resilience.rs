// ── Transport resilience ──
//
// Per-stream bookkeeping that decides whether push or poll is trusted,
// when to reconnect, and which poll results to discard. Everything here
// is synchronous and clock-free; the session feeds it instants and acts
// on the returned decisions.

use std::fmt;
use std::time::Duration;

use sensorwatch_api::CloseCode;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::MonitorConfig;
use crate::model::SensorKey;

// ── Stream identity ──────────────────────────────────────────────────

/// One logical data stream: a single sensor feed, or the device directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamId {
    Sensor(SensorKey),
    Directory,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(key) => write!(f, "sensor {key}"),
            Self::Directory => f.write_str("directory"),
        }
    }
}

// ── Backoff ──────────────────────────────────────────────────────────

/// Capped exponential backoff without jitter.
///
/// `delay(n) = min(base * multiplier^(n-1), max)` for attempt `n ≥ 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            multiplier,
            max,
        }
    }

    /// Push reconnect schedule.
    pub fn reconnect(config: &MonitorConfig) -> Self {
        Self::new(
            config.reconnect_base_delay,
            config.reconnect_multiplier,
            config.max_reconnect_delay,
        )
    }

    /// Poll schedule: attempt `k + 1` is the delay after `k` failures.
    pub fn poll(config: &MonitorConfig) -> Self {
        Self::new(
            config.poll_interval,
            config.reconnect_multiplier,
            config.max_poll_interval,
        )
    }

    /// Delay before attempt `attempt`. Attempt 0 is treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::try_from_secs_f64(scaled).map_or(self.max, |d| d.min(self.max))
    }
}

// ── Policy ───────────────────────────────────────────────────────────

/// Resilience tunables shared by every stream of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResiliencePolicy {
    pub reconnect: Backoff,
    pub poll: Backoff,
    pub recent_data_window: Duration,
    pub max_consecutive_errors: u32,
    pub max_reconnect_attempts: u32,
}

impl From<&MonitorConfig> for ResiliencePolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            reconnect: Backoff::reconnect(config),
            poll: Backoff::poll(config),
            recent_data_window: config.recent_data_window,
            max_consecutive_errors: config.max_consecutive_errors,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

// ── Channel state ────────────────────────────────────────────────────

/// Observable connection state of one push stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub connected: bool,
    /// Consecutive failed connection attempts; 0 after a successful open.
    pub attempt: u32,
    pub next_retry_at: Option<Instant>,
    pub closed_intentionally: bool,
    /// Push was abandoned for the rest of the session.
    pub gave_up: bool,
    /// Polling currently supplies this stream.
    pub polling: bool,
}

/// What the owner should do after a connection attempt closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The event belongs to a superseded attempt.
    Stale,
    /// Closed by us, or cleanly by the server. No retry.
    Finished,
    /// Schedule a reconnect after `delay`.
    Retry {
        attempt: u32,
        delay: Duration,
        fallback_activated: bool,
    },
    /// Retry budget exhausted; polling only from now on.
    GaveUp { fallback_activated: bool },
}

// ── Push stream ──────────────────────────────────────────────────────

/// Resilience state for one logical stream.
///
/// Sensor streams are fresh while samples keep arriving. The directory
/// only pushes on change, so for it an open socket is fresh on its own.
#[derive(Debug, Clone, Default)]
pub struct PushStream {
    state: ChannelState,
    connection: Option<u64>,
    open_is_fresh: bool,
    last_push_at: Option<Instant>,
    last_poll_at: Option<Instant>,
    /// Newest embedded sample time on the current connection.
    last_sample_time: Option<f64>,
}

impl PushStream {
    pub fn for_stream(stream: &StreamId) -> Self {
        Self {
            open_is_fresh: matches!(stream, StreamId::Directory),
            ..Self::default()
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn is_polling(&self) -> bool {
        self.state.polling
    }

    /// Whether an open socket counts as fresh without any traffic.
    pub fn open_is_fresh(&self) -> bool {
        self.open_is_fresh
    }

    /// Whether a reconnect timer firing now should open a new attempt.
    pub fn wants_reconnect(&self) -> bool {
        !self.state.connected && !self.state.closed_intentionally && !self.state.gave_up
    }

    /// `true` if `connection` is the attempt currently tracked.
    pub fn is_current(&self, connection: u64) -> bool {
        self.connection == Some(connection)
    }

    /// A new attempt was started.
    pub fn connecting(&mut self, connection: u64) {
        self.connection = Some(connection);
        self.last_sample_time = None;
        self.state.closed_intentionally = false;
        self.state.next_retry_at = None;
    }

    /// Returns `false` for events from a superseded attempt.
    ///
    /// Streams whose open socket is fresh leave the poll fallback here.
    pub fn opened(&mut self, connection: u64) -> bool {
        if !self.is_current(connection) {
            return false;
        }
        self.state.connected = true;
        self.state.attempt = 0;
        self.state.next_retry_at = None;
        if self.open_is_fresh && !self.state.gave_up {
            self.state.polling = false;
        }
        true
    }

    pub fn closed(
        &mut self,
        connection: u64,
        code: CloseCode,
        now: Instant,
        policy: &ResiliencePolicy,
    ) -> CloseOutcome {
        if !self.is_current(connection) {
            return CloseOutcome::Stale;
        }
        self.connection = None;
        self.state.connected = false;

        if self.state.closed_intentionally || code.is_clean() {
            return CloseOutcome::Finished;
        }

        if self.state.attempt >= policy.max_reconnect_attempts {
            self.state.gave_up = true;
            self.state.next_retry_at = None;
            return CloseOutcome::GaveUp {
                fallback_activated: self.activate_fallback(),
            };
        }

        self.state.attempt += 1;
        let delay = policy.reconnect.delay(self.state.attempt);
        self.state.next_retry_at = Some(now + delay);
        let fallback_activated =
            self.state.attempt >= policy.max_consecutive_errors && self.activate_fallback();
        CloseOutcome::Retry {
            attempt: self.state.attempt,
            delay,
            fallback_activated,
        }
    }

    /// Local disconnect. Late events from the closed attempt become stale.
    pub fn disconnect(&mut self) {
        self.connection = None;
        self.state.connected = false;
        self.state.closed_intentionally = true;
        self.state.next_retry_at = None;
    }

    /// Record a data-bearing push message that arrived at `now`.
    /// `sample_time` is the newest timestamp embedded in the message, if
    /// it carries one; it must advance for the message to count as fresh.
    ///
    /// Returns `true` if this message ended the poll fallback.
    pub fn push_received(&mut self, now: Instant, sample_time: Option<f64>) -> bool {
        self.last_push_at = Some(now);
        let advanced = match (sample_time, self.last_sample_time) {
            (Some(time), Some(previous)) => time > previous,
            _ => true,
        };
        if let Some(time) = sample_time {
            self.last_sample_time = Some(self.last_sample_time.map_or(time, |p| p.max(time)));
        }
        let fresher = self.last_poll_at.is_none_or(|poll| now > poll);
        if self.state.polling && !self.state.gave_up && fresher && advanced {
            self.state.polling = false;
            return true;
        }
        false
    }

    /// Race resolution for a poll result produced at `source_time`.
    ///
    /// Returns `false` if the result is strictly older than the last push
    /// and must be discarded.
    pub fn accept_poll(&mut self, source_time: Instant) -> bool {
        if self.last_push_at.is_some_and(|push| source_time < push) {
            return false;
        }
        self.last_poll_at = Some(self.last_poll_at.map_or(source_time, |p| p.max(source_time)));
        true
    }

    /// Stale-timer check. Returns `true` if polling was just activated.
    pub fn check_stale(&mut self, now: Instant, window: Duration) -> bool {
        if self.state.polling || self.push_is_fresh(now, window) {
            return false;
        }
        self.activate_fallback()
    }

    /// When push would next go stale, if it is fresh now. `None` for
    /// streams that only go stale by disconnecting.
    pub fn stale_deadline(&self, now: Instant, window: Duration) -> Option<Instant> {
        if !self.open_is_fresh && self.push_is_fresh(now, window) {
            self.last_push_at.map(|at| at + window)
        } else {
            None
        }
    }

    /// Give up on push without an attempt (the channel could not be
    /// created). Returns `true` if polling was just activated.
    pub fn abandon(&mut self) -> bool {
        self.connection = None;
        self.state.connected = false;
        self.state.gave_up = true;
        self.state.next_retry_at = None;
        self.activate_fallback()
    }

    /// Returns `true` if polling was not already active.
    pub fn activate_fallback(&mut self) -> bool {
        !std::mem::replace(&mut self.state.polling, true)
    }

    fn push_is_fresh(&self, now: Instant, window: Duration) -> bool {
        if !self.state.connected {
            return false;
        }
        self.open_is_fresh
            || self
                .last_push_at
                .is_some_and(|at| now.saturating_duration_since(at) < window)
    }
}
