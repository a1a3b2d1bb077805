//! Subscriber Registry
//!
//! Fan-out of [`InboundEvent`]s to every registered callback.
//!
//! # Delivery
//!
//! `publish` snapshots the current callbacks and releases the lock before
//! invoking any of them, so a callback may subscribe or unsubscribe (itself
//! or others) without deadlocking. Changes made during a publish take effect
//! from the next publish. Callbacks run in registration order.
//!
//! A panicking callback is logged and skipped; the remaining callbacks still
//! receive the event.
//!
//! # Thread Safety
//!
//! The map lives behind `Arc<RwLock<>>`. Publishing only takes the read lock
//! long enough to clone the callback handles.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::protocol::event::InboundEvent;

/// Subscriber callback
pub type Callback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Identifier of one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Registry of event subscribers
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<HashMap<SubscriptionId, Callback>>>,
}

impl SubscriberRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    ///
    /// The returned handle unregisters the callback when dropped; call
    /// [`Subscription::detach`] to keep it for the registry's lifetime.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.inner.write().insert(id, Arc::new(callback));
        tracing::debug!(subscription = %id, "Subscriber registered");
        Subscription {
            id,
            registry: self.clone(),
            active: true,
        }
    }

    /// Remove a registration; returns whether it was present
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.write().remove(&id).is_some();
        if removed {
            tracing::debug!(subscription = %id, "Subscriber removed");
        }
        removed
    }

    /// Deliver an event to every current subscriber
    pub fn publish(&self, event: &InboundEvent) {
        let mut snapshot: Vec<(SubscriptionId, Callback)> = {
            let inner = self.inner.read();
            inner.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect()
        };
        snapshot.sort_unstable_by_key(|(id, _)| *id);

        tracing::trace!(
            event = %event.event_type(),
            subscribers = snapshot.len(),
            "Publishing event"
        );

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(
                    subscription = %id,
                    event = %event.event_type(),
                    "Subscriber panicked while handling event"
                );
            }
        }
    }

    /// Number of registered subscribers
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Remove every subscriber
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let removed = inner.len();
        inner.clear();
        if removed > 0 {
            tracing::info!(removed, "Subscribers cleared");
        }
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.count())
            .finish()
    }
}

/// Handle to one registration
///
/// Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    registry: SubscriberRegistry,
    active: bool,
}

impl Subscription {
    /// Identifier of this registration
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the callback registered after this handle is dropped
    ///
    /// Returns the id so the caller can still unsubscribe through the
    /// registry.
    pub fn detach(mut self) -> SubscriptionId {
        self.active = false;
        self.id
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.registry.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn recorder(
        registry: &SubscriberRegistry,
        tag: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Subscription {
        let log = Arc::clone(log);
        registry.subscribe(move |event| {
            log.lock().push(format!("{tag}:{}", event.event_type()));
        })
    }

    #[test]
    fn test_publish_reaches_all_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = recorder(&registry, "a", &log);
        let _b = recorder(&registry, "b", &log);
        let _c = recorder(&registry, "c", &log);

        registry.publish(&InboundEvent::Pong);

        assert_eq!(*log.lock(), vec!["a:PONG", "b:PONG", "c:PONG"]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sub = recorder(&registry, "a", &log);
        assert_eq!(registry.count(), 1);

        drop(sub);
        assert_eq!(registry.count(), 0);

        registry.publish(&InboundEvent::Pong);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe_twice_is_noop() {
        let registry = SubscriberRegistry::new();
        let id = registry.subscribe(|_| {}).detach();
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
    }

    #[test]
    fn test_detach_keeps_subscription() {
        let registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&registry, "a", &log).detach();

        registry.publish(&InboundEvent::Disconnected);
        assert_eq!(*log.lock(), vec!["a:DISCONNECTED"]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_delivery() {
        let registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = registry.subscribe(|_| panic!("subscriber failure"));
        let _b = recorder(&registry, "b", &log);

        registry.publish(&InboundEvent::Pong);
        registry.publish(&InboundEvent::Pong);

        assert_eq!(*log.lock(), vec!["b:PONG", "b:PONG"]);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner_slot = Arc::clone(&slot);
        let inner_log = Arc::clone(&log);
        let sub = registry.subscribe(move |event| {
            inner_log.lock().push(format!("once:{}", event.event_type()));
            inner_slot.lock().take();
        });
        *slot.lock() = Some(sub);
        let _b = recorder(&registry, "b", &log);

        registry.publish(&InboundEvent::Pong);
        registry.publish(&InboundEvent::Pong);

        assert_eq!(*log.lock(), vec!["once:PONG", "b:PONG", "b:PONG"]);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_subscribe_during_publish_applies_next_time() {
        let registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let reg = registry.clone();
        let inner_log = Arc::clone(&log);
        let added = Arc::new(Mutex::new(Vec::new()));
        let inner_added = Arc::clone(&added);
        let _a = registry.subscribe(move |_| {
            if inner_added.lock().is_empty() {
                let late_log = Arc::clone(&inner_log);
                let sub = reg.subscribe(move |event| {
                    late_log.lock().push(format!("late:{}", event.event_type()));
                });
                inner_added.lock().push(sub);
            }
        });

        registry.publish(&InboundEvent::Pong);
        assert!(log.lock().is_empty());

        registry.publish(&InboundEvent::Disconnected);
        assert_eq!(*log.lock(), vec!["late:DISCONNECTED"]);
    }

    #[test]
    fn test_clear() {
        let registry = SubscriberRegistry::new();
        let _a = registry.subscribe(|_| {});
        let _b = registry.subscribe(|_| {});
        assert_eq!(registry.count(), 2);
        registry.clear();
        assert_eq!(registry.count(), 0);
    }
}
