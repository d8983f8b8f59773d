// ── Named cancellable timers ──
//
// Each timer is a sleeping tokio task that reports its key to a sink when
// it fires. Keys are unique: scheduling an existing key replaces (and
// aborts) the previous timer. Fires are tagged with a generation so a
// fire that raced a cancellation can be recognised and dropped.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Notification that the timer for `key` elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire<K> {
    pub key: K,
    generation: u64,
}

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

type FireSink<K> = Arc<dyn Fn(TimerFire<K>) + Send + Sync>;

/// Owner of every timer of a session.
pub struct Scheduler<K> {
    timers: HashMap<K, Timer>,
    next_generation: u64,
    sink: FireSink<K>,
}

impl<K> Scheduler<K>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
{
    pub fn new(sink: impl Fn(TimerFire<K>) + Send + Sync + 'static) -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 1,
            sink: Arc::new(sink),
        }
    }

    /// Fire `key` after `delay`, replacing any pending timer with that key.
    pub fn schedule(&mut self, key: K, delay: Duration) {
        self.schedule_at(key, Instant::now() + delay);
    }

    /// Fire `key` at `deadline`, replacing any pending timer with that key.
    pub fn schedule_at(&mut self, key: K, deadline: Instant) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let sink = Arc::clone(&self.sink);
        let fire = TimerFire {
            key: key.clone(),
            generation,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            sink(fire);
        });

        tracing::trace!(?key, generation, "timer scheduled");
        if let Some(previous) = self.timers.insert(key, Timer { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Schedule `key` unless a timer for it is already pending.
    pub fn ensure_at(&mut self, key: K, deadline: Instant) {
        if !self.timers.contains_key(&key) {
            self.schedule_at(key, deadline);
        }
    }

    /// Returns `true` if a pending timer was cancelled.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.timers.remove(key).is_some_and(|timer| {
            timer.handle.abort();
            true
        })
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Claim a fire. Returns `false` if the timer was cancelled or
    /// replaced after this fire was sent.
    pub fn accept(&mut self, fire: &TimerFire<K>) -> bool {
        match self.timers.get(&fire.key) {
            Some(timer) if timer.generation == fire.generation => {
                self.timers.remove(&fire.key);
                true
            }
            _ => {
                tracing::debug!(key = ?fire.key, "dropping superseded timer fire");
                false
            }
        }
    }
}

impl<K> Drop for Scheduler<K> {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}
