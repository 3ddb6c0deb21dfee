//! Change Notifier Module
//!
//! Observer registry invoked whenever a cached key changes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

use crate::error::CacheError;

/// Key passed to subscribers when the whole cache was cleared.
pub const WILDCARD: &str = "*";

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

// == Notifier ==
/// Fans change notifications out to registered callbacks.
///
/// Callbacks run synchronously on the notifying thread, one after the other,
/// with no internal lock held, so a callback may call back into the cache. A
/// panicking callback is logged and skipped.
#[derive(Clone, Default)]
pub struct Notifier {
    registry: Arc<Registry>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback`. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .subscribers
            .lock()
            .push((id, Arc::new(callback)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invokes every subscriber with `key`.
    ///
    /// Returns how many callbacks completed without panicking.
    pub fn notify(&self, key: &str) -> usize {
        let callbacks: Vec<Callback> = self
            .registry
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        let mut delivered = 0;
        for callback in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(key))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    let err = CacheError::Subscriber(panic_message(payload.as_ref()));
                    error!(key, error = %err, "Change subscriber failed");
                }
            }
        }
        delivered
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.registry.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// == Subscription ==
/// Handle for a registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the callback immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Removes the callback. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.subscribers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |key: &str| sink.lock().push(key.to_string()))
    }

    #[test]
    fn test_fan_out_to_every_subscriber() {
        let notifier = Notifier::new();
        let (first, cb1) = recorder();
        let (second, cb2) = recorder();
        let _s1 = notifier.subscribe(cb1);
        let _s2 = notifier.subscribe(cb2);

        assert_eq!(notifier.notify("k"), 2);

        assert_eq!(*first.lock(), vec!["k"]);
        assert_eq!(*second.lock(), vec!["k"]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let notifier = Notifier::new();
        let _bad = notifier.subscribe(|_| panic!("boom"));
        let (seen, cb) = recorder();
        let _good = notifier.subscribe(cb);

        assert_eq!(notifier.notify("k"), 1);
        assert_eq!(*seen.lock(), vec!["k"]);
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let notifier = Notifier::new();
        let (seen, cb) = recorder();
        let sub = notifier.subscribe(cb);
        assert_eq!(notifier.len(), 1);

        sub.unsubscribe();
        assert!(notifier.is_empty());
        notifier.notify("k");
        assert!(seen.lock().is_empty());

        {
            let _scoped = notifier.subscribe(|_| {});
            assert_eq!(notifier.len(), 1);
        }
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_subscription_outliving_notifier() {
        let notifier = Notifier::new();
        let sub = notifier.subscribe(|_| {});
        drop(notifier);
        drop(sub);
    }

    #[test]
    fn test_callback_may_subscribe_reentrantly() {
        let notifier = Notifier::new();
        let inner = notifier.clone();
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_in_cb = Arc::clone(&held);
        let _sub = notifier.subscribe(move |_| {
            held_in_cb.lock().push(inner.subscribe(|_| {}));
        });

        notifier.notify("k");
        assert_eq!(notifier.len(), 2);
    }
}
