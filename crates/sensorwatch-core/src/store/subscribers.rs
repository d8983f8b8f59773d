// ── Callback subscriptions ──
//
// Listeners are plain callbacks keyed by a topic. Each registration hands
// back a `Subscription`; dropping it (or calling `unsubscribe`) removes
// the listener. Callbacks run on the session task and must not block.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listener<K, T> {
    topic: K,
    callback: Callback<T>,
}

/// Topic-filtered callback registry.
pub(crate) struct Registry<K, T> {
    next_id: AtomicU64,
    listeners: DashMap<u64, Listener<K, T>>,
}

impl<K, T> Registry<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: 'static,
{
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            listeners: DashMap::new(),
        })
    }

    pub(crate) fn add(
        self: &Arc<Self>,
        topic: K,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(
            id,
            Listener {
                topic,
                callback: Arc::new(callback),
            },
        );

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.listeners.remove(&id);
            }
        })
    }

    /// Invoke every listener of `topic` with `value`.
    ///
    /// Callbacks are collected first and called without holding map
    /// locks, so a callback may drop its own subscription.
    pub(crate) fn notify(&self, topic: &K, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .listeners
            .iter()
            .filter(|entry| entry.topic == *topic)
            .map(|entry| Arc::clone(&entry.callback))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}

/// Disposer handle for a registered callback.
///
/// The listener stays registered for as long as this handle lives.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    /// Keep the listener registered for the rest of the session.
    pub fn detach(mut self) {
        self.dispose = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(&u32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &u32| sink.lock().unwrap().push(*v))
    }

    #[test]
    fn notify_reaches_only_matching_topic() {
        let registry = Registry::<&str, u32>::new();
        let (seen_a, cb_a) = recorder();
        let (seen_b, cb_b) = recorder();
        let _a = registry.add("a", cb_a);
        let _b = registry.add("b", cb_b);

        registry.notify(&"a", &7);
        assert_eq!(*seen_a.lock().unwrap(), vec![7]);
        assert!(seen_b.lock().unwrap().is_empty());
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let registry = Registry::<&str, u32>::new();
        let (seen, cb) = recorder();
        let sub = registry.add("a", cb);
        assert_eq!(registry.len(), 1);
        drop(sub);
        assert_eq!(registry.len(), 0);

        registry.notify(&"a", &1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn detached_subscription_survives() {
        let registry = Registry::<&str, u32>::new();
        let (seen, cb) = recorder();
        registry.add("a", cb).detach();
        registry.notify(&"a", &3);
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let registry = Registry::<&str, u32>::new();
        let sub = registry.add("a", |_| {});
        drop(registry);
        sub.unsubscribe();
    }
}
