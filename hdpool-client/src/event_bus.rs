//! In-process topic-based publish/subscribe
//!
//! The session publishes connection lifecycle events (`websocket/opened`,
//! `websocket/closed`, `websocket/broken`, `debug`, `sessionExpired`) and
//! façades re-expose pool push frames (`bestMiningInfo`, `miningInfo`) on the
//! same bus.
//!
//! # Delivery
//!
//! - Synchronous: `publish` returns after every callback has run
//! - Ordered: callbacks for a topic run in subscription order
//! - Isolated: a panicking callback is logged and skipped, the rest still run
//! - Snapshot: callbacks may subscribe or unsubscribe from inside a callback;
//!   the change applies from the next `publish`
//!
//! # Lifetime
//!
//! Subscriptions survive reconnects. They end through
//! [`Subscription::unsubscribe`] or when the owning session is destroyed
//! completely (which calls [`EventBus::clear`]). Dropping a `Subscription`
//! handle does not unsubscribe.
//!
//! # Examples
//!
//! ```rust
//! use hdpool_client::EventBus;
//! use serde_json::{json, Value};
//!
//! let bus: EventBus<Value> = EventBus::new();
//! let sub = bus.subscribe("miningInfo", |info| {
//!     println!("height {}", info["height"]);
//! });
//!
//! bus.publish("miningInfo", &json!({"height": 120_000}));
//! sub.unsubscribe();
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Callback type stored by the bus
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

type Remover = Arc<dyn Fn(&str, u64) -> bool + Send + Sync>;

struct BusInner<T> {
    next_id: u64,
    topics: HashMap<String, Vec<(u64, Callback<T>)>>,
}

impl<T> BusInner<T> {
    fn remove(&mut self, topic: &str, id: u64) -> bool {
        let Some(callbacks) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }
}

/// Topic → ordered callback list
///
/// Cheap to clone; clones share the same subscriptions.
pub struct EventBus<T = Value> {
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> EventBus<T> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                topics: HashMap::new(),
            })),
        }
    }

    // Callbacks never run under the lock, so a poisoned lock still holds a
    // consistent table.
    fn lock(&self) -> MutexGuard<'_, BusInner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a callback for `topic`
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .topics
                .entry(topic.clone())
                .or_default()
                .push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<BusInner<T>>> = Arc::downgrade(&self.inner);
        let remover: Remover = Arc::new(move |topic, id| match weak.upgrade() {
            Some(inner) => inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(topic, id),
            None => false,
        });

        Subscription {
            topic,
            id,
            remover,
        }
    }

    /// Deliver `payload` to every subscriber of `topic`
    ///
    /// Returns the number of callbacks that completed without panicking.
    pub fn publish(&self, topic: &str, payload: &T) -> usize {
        let snapshot: Vec<Callback<T>> = match self.lock().topics.get(topic) {
            Some(callbacks) => callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for callback in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(topic = %topic, "Event subscriber panicked; continuing delivery");
                }
            }
        }
        delivered
    }

    /// Number of callbacks currently subscribed to `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Topics with at least one subscriber
    pub fn topics(&self) -> Vec<String> {
        self.lock().topics.keys().cloned().collect()
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.lock().topics.clear();
    }
}

impl<T: 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`]
pub struct Subscription {
    topic: String,
    id: u64,
    remover: Remover,
}

impl Subscription {
    /// Topic this subscription listens on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the callback from the bus
    ///
    /// Returns false if it was already gone (unsubscribed, or the bus was
    /// cleared or dropped).
    pub fn unsubscribe(self) -> bool {
        (self.remover)(&self.topic, self.id)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}
