//! Cache Manager Module
//!
//! The public cache API: an in-memory store mirrored into durable storage,
//! with lazy and periodic expiration and change notifications.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
    decode_item, duration_ms, CacheItem, CacheKey, CacheStats, DurableMirror, MemoryStore,
    Notifier, Subscription, WILDCARD,
};
use crate::config::{CacheConfig, CacheConfigPatch};
use crate::error::Result;
use crate::storage::{SharedOrigin, Storage, StorageEvent};
use crate::tasks::{spawn_sync_task, ExpirationManager};

#[derive(Debug, Default)]
struct State {
    store: MemoryStore,
    stats: CacheStats,
}

struct Inner {
    config: RwLock<CacheConfig>,
    state: Mutex<State>,
    mirror: DurableMirror,
    notifier: Notifier,
    expiration: Mutex<ExpirationManager>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

// == Cache Manager ==
/// Shared handle to one cache. Cloning is cheap and every clone sees the same state.
///
/// All operations are synchronous. The sweep timer and the storage change
/// listener run as Tokio tasks when a runtime is available.
///
/// # Example
/// ```ignore
/// let cache = CacheManager::in_memory(CacheConfig::default());
/// cache.set(["reviews", "u1"], &reviews, None)?;
/// let cached: Option<Vec<Review>> = cache.get(["reviews", "u1"]);
/// cache.invalidate_pattern(["reviews"]);
/// ```
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

/// Non-owning reference used by background tasks.
#[derive(Clone)]
pub struct WeakCacheManager {
    inner: Weak<Inner>,
}

impl WeakCacheManager {
    pub fn upgrade(&self) -> Option<CacheManager> {
        self.inner.upgrade().map(|inner| CacheManager { inner })
    }
}

impl CacheManager {
    // == Constructor ==
    /// Creates a cache mirrored into `storage`.
    ///
    /// Live items already in the storage are loaded into memory, and when a
    /// Tokio runtime is available a listener is wired to the storage's change
    /// events. The sweep timer is not started; see
    /// [`start_expiration`](Self::start_expiration).
    pub fn new(storage: Arc<dyn Storage>, config: CacheConfig) -> Self {
        let cache = Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                state: Mutex::new(State::default()),
                mirror: DurableMirror::new(storage),
                notifier: Notifier::new(),
                expiration: Mutex::new(ExpirationManager::new()),
                listener: Mutex::new(None),
            }),
        };

        let warmed = cache.warm_from_mirror();
        cache.listen_for_foreign_changes();
        debug!(warmed, ?config, "Cache manager created");
        cache
    }

    /// A cache backed by a private in-process origin.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(SharedOrigin::new().connect()), config)
    }

    pub fn downgrade(&self) -> WeakCacheManager {
        WeakCacheManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // == Configuration ==
    pub fn config(&self) -> CacheConfig {
        *self.inner.config.read()
    }

    /// Merges `patch` onto the live config.
    ///
    /// A running sweep timer is restarted when the interval changed.
    pub fn configure(&self, patch: &CacheConfigPatch) {
        let (interval_changed, config) = {
            let mut config = self.inner.config.write();
            (config.merge(patch), *config)
        };
        info!(
            default_ttl_ms = duration_ms(config.default_ttl),
            cleanup_interval_ms = duration_ms(config.cleanup_interval),
            "Cache reconfigured"
        );

        if interval_changed && self.is_expiration_running() {
            self.restart_expiration();
        }
    }

    // == Expiration Control ==
    /// Starts the periodic sweep. Idempotent.
    pub fn start_expiration(&self) -> bool {
        let interval = self.config().cleanup_interval;
        self.inner.expiration.lock().start(self.downgrade(), interval)
    }

    pub fn stop_expiration(&self) {
        self.inner.expiration.lock().stop();
    }

    pub fn restart_expiration(&self) -> bool {
        let interval = self.config().cleanup_interval;
        self.inner
            .expiration
            .lock()
            .restart(self.downgrade(), interval)
    }

    pub fn is_expiration_running(&self) -> bool {
        self.inner.expiration.lock().is_running()
    }

    /// Stops the sweep timer and the storage listener.
    pub fn dispose(&self) {
        self.stop_expiration();
        if let Some(handle) = self.inner.listener.lock().take() {
            handle.abort();
        }
        debug!("Cache manager disposed");
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl`, or the configured default TTL.
    ///
    /// Memory is updated first, so a following `get` in this process always
    /// sees the value. The durable write is best-effort.
    ///
    /// # Errors
    /// `CacheError::Serialization` when `value` cannot be represented as JSON.
    pub fn set<T>(&self, key: impl Into<CacheKey>, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let key = key.into().normalize();
        let value = serde_json::to_value(value)?;
        let ttl = ttl.unwrap_or_else(|| self.config().default_ttl);
        let item = CacheItem::new(value, ttl);

        self.inner.state.lock().store.set(key.clone(), item.clone());
        self.persist(&key, &item);
        self.inner.notifier.notify(&key);
        Ok(())
    }

    // == Get ==
    /// Returns the cached value, or `None` when missing, expired, or not a `T`.
    ///
    /// Falls back to the durable mirror on a memory miss and promotes what it
    /// finds.
    pub fn get<T: DeserializeOwned>(&self, key: impl Into<CacheKey>) -> Option<T> {
        let key = key.into().normalize();
        let item = self.resolve(&key);

        let mut state = self.inner.state.lock();
        match item {
            Some(item) => match serde_json::from_value(item.value) {
                Ok(value) => {
                    state.stats.record_hit();
                    Some(value)
                }
                Err(err) => {
                    state.stats.record_miss();
                    warn!(key, error = %err, "Cached value has an unexpected shape");
                    None
                }
            },
            None => {
                state.stats.record_miss();
                None
            }
        }
    }

    // == Has ==
    /// True iff `get` would find a live item. May promote from the mirror.
    pub fn has(&self, key: impl Into<CacheKey>) -> bool {
        self.resolve(&key.into().normalize()).is_some()
    }

    // == Delete ==
    /// Removes `key` from memory and the mirror and notifies subscribers.
    ///
    /// Returns whether either store held the key.
    pub fn delete(&self, key: impl Into<CacheKey>) -> bool {
        let key = key.into().normalize();
        let in_memory = self.inner.state.lock().store.delete(&key).is_some();

        let in_mirror = self.inner.mirror.remove(&key).unwrap_or_else(|err| {
            warn!(key, error = %err, "Failed to remove mirrored item");
            false
        });
        self.inner.notifier.notify(&key);
        in_memory || in_mirror
    }

    // == Invalidate Pattern ==
    /// Deletes every item whose normalized key starts with the normalized `prefix`.
    ///
    /// Subscribers are notified once per removed key. Returns how many keys
    /// were removed across both stores.
    pub fn invalidate_pattern(&self, prefix: impl Into<CacheKey>) -> usize {
        let prefix = prefix.into().normalize();

        let mut removed: BTreeSet<String> = self
            .inner
            .state
            .lock()
            .store
            .delete_with_prefix(&prefix)
            .into_iter()
            .collect();

        match self.inner.mirror.remove_all_with_prefix(&prefix) {
            Ok(keys) => removed.extend(keys),
            Err(err) => warn!(prefix, error = %err, "Failed to invalidate mirrored items"),
        }

        for key in &removed {
            self.inner.notifier.notify(key);
        }
        debug!(prefix, removed = removed.len(), "Invalidated cache pattern");
        removed.len()
    }

    // == Clear ==
    /// Empties both stores and notifies subscribers with the wildcard key.
    pub fn clear(&self) {
        let removed = self.inner.state.lock().store.clear();

        if let Err(err) = self.inner.mirror.clear_all() {
            warn!(error = %err, "Failed to clear mirrored items");
        }
        self.inner.notifier.notify(WILDCARD);
        debug!(removed, "Cache cleared");
    }

    // == TTL Housekeeping ==
    // These change expiry only and do not notify subscribers.

    /// Replaces the TTL of an existing item. `false` if absent.
    pub fn update_ttl(&self, key: impl Into<CacheKey>, ttl: Duration) -> bool {
        self.modify_item(key, |item| item.set_ttl(ttl))
    }

    /// Lengthens the TTL of an existing item by `delta`. `false` if absent.
    pub fn extend_ttl(&self, key: impl Into<CacheKey>, delta: Duration) -> bool {
        self.modify_item(key, |item| item.extend_ttl(delta))
    }

    /// Restarts the TTL window of an existing item from now. `false` if absent.
    pub fn refresh(&self, key: impl Into<CacheKey>) -> bool {
        self.modify_item(key, CacheItem::refresh)
    }

    /// Remaining lifetime of an item, clamped to zero; `None` if absent.
    pub fn time_remaining(&self, key: impl Into<CacheKey>) -> Option<Duration> {
        self.resolve(&key.into().normalize())
            .map(|item| item.time_remaining())
    }

    // == Subscribe ==
    /// Registers `callback` for change notifications.
    ///
    /// It receives the normalized key, or `"*"` after [`clear`](Self::clear).
    /// Keep the returned [`Subscription`] alive for as long as the callback
    /// should fire.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.notifier.subscribe(callback)
    }

    // == Introspection ==
    /// Normalized keys of live in-memory items, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.lock().store.keys()
    }

    /// Number of live in-memory items.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalized keys present in the durable mirror. Empty if storage fails.
    pub fn mirror_keys(&self) -> Vec<String> {
        self.inner.mirror.keys().unwrap_or_else(|err| {
            warn!(error = %err, "Failed to list mirrored items");
            Vec::new()
        })
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            expirations: state.store.expirations(),
            total_entries: state.store.len(),
            ..state.stats.clone()
        }
    }

    // == Sweep ==
    /// Removes expired items from memory and from the mirror.
    ///
    /// Returns the number of removed items across both stores.
    pub fn sweep(&self) -> usize {
        let from_memory = self.inner.state.lock().store.cleanup_expired();
        let from_mirror = self.inner.mirror.cleanup_expired().unwrap_or_else(|err| {
            warn!(error = %err, "Failed to sweep mirrored items");
            0
        });

        let removed = from_memory + from_mirror;
        if removed > 0 {
            info!(from_memory, from_mirror, "Expiration sweep removed {} items", removed);
        } else {
            debug!("Expiration sweep: no expired items found");
        }
        removed
    }

    // == Mirror Sync ==
    /// Loads every live mirrored item into memory.
    ///
    /// An in-memory item is replaced only by a mirrored copy that is at least
    /// as recent. Returns how many items were loaded.
    pub fn warm_from_mirror(&self) -> usize {
        let keys = match self.inner.mirror.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "Failed to read durable mirror");
                return 0;
            }
        };

        let mut loaded = 0;
        for key in keys {
            let Some(item) = self.load_from_mirror(&key) else {
                continue;
            };

            let mut state = self.inner.state.lock();
            let newer = state
                .store
                .get(&key)
                .map_or(true, |current| item.created_at >= current.created_at);
            if newer {
                state.store.set(key, item);
                loaded += 1;
            }
        }
        loaded
    }

    /// Brings memory back in line with the mirror after change events were missed.
    ///
    /// Items missing from the mirror are dropped, newer mirrored copies replace
    /// their in-memory counterparts, and subscribers are notified once per
    /// changed key. Returns the number of changed keys.
    pub fn resync_from_mirror(&self) -> usize {
        let mirrored: BTreeSet<String> = match self.inner.mirror.keys() {
            Ok(keys) => keys.into_iter().collect(),
            Err(err) => {
                warn!(error = %err, "Failed to read durable mirror");
                return 0;
            }
        };

        let mut changed = BTreeSet::new();
        {
            let mut state = self.inner.state.lock();
            for key in state.store.keys() {
                if !mirrored.contains(&key) {
                    state.store.delete(&key);
                    changed.insert(key);
                }
            }
        }

        for key in mirrored {
            let loaded = self.load_from_mirror(&key);
            let mut state = self.inner.state.lock();
            match loaded {
                Some(item) => {
                    let stale = state.store.get(&key).map_or(true, |current| {
                        item.created_at >= current.created_at && *current != item
                    });
                    if stale {
                        state.store.set(key.clone(), item);
                        changed.insert(key);
                    }
                }
                None => {
                    if state.store.delete(&key).is_some() {
                        changed.insert(key);
                    }
                }
            }
        }

        for key in &changed {
            self.inner.notifier.notify(key);
        }
        info!(changed = changed.len(), "Resynchronized with durable mirror");
        changed.len()
    }

    /// Applies a change another process made to the shared storage.
    ///
    /// Events outside the cache namespace are ignored, as are payloads that
    /// fail to parse.
    pub fn apply_storage_event(&self, event: &StorageEvent) {
        let Some(storage_key) = event.key.as_deref() else {
            let removed = self.inner.state.lock().store.clear();
            debug!(removed, "Shared storage cleared by another process");
            self.inner.notifier.notify(WILDCARD);
            return;
        };

        let Some(key) = self.inner.mirror.cache_key(storage_key) else {
            return;
        };

        match event.new_value.as_deref() {
            None | Some("") => {
                self.inner.state.lock().store.delete(key);
                debug!(key, "Cache item removed by another process");
            }
            Some(raw) => match decode_item(raw) {
                Ok(item) => {
                    self.inner.state.lock().store.set(key.to_string(), item);
                    debug!(key, "Cache item updated by another process");
                }
                Err(err) => {
                    warn!(key, error = %err, "Ignoring malformed cache payload from another process");
                    return;
                }
            },
        }
        self.inner.notifier.notify(key);
    }

    /// Wires the storage change listener if the storage emits events and a
    /// runtime is available. Returns whether a listener is active.
    pub fn listen_for_foreign_changes(&self) -> bool {
        let mut listener = self.inner.listener.lock();
        if listener.as_ref().is_some_and(|h| !h.is_finished()) {
            return true;
        }

        let Some(events) = self.inner.mirror.subscribe() else {
            return false;
        };
        if Handle::try_current().is_err() {
            debug!("No async runtime available, foreign storage changes will not be observed");
            return false;
        }

        *listener = Some(spawn_sync_task(self.downgrade(), events));
        true
    }

    // == Internals ==
    /// Live item for a normalized key: memory first, then the mirror.
    fn resolve(&self, key: &str) -> Option<CacheItem> {
        if let Some(item) = self.inner.state.lock().store.get(key) {
            return Some(item.clone());
        }

        let loaded = self.load_from_mirror(key)?;
        let mut state = self.inner.state.lock();
        // Another thread may have written meanwhile; keep its item
        if !state.store.has(key) {
            state.store.set(key.to_string(), loaded);
        }
        state.store.get(key).cloned()
    }

    /// Mirrored item for `key` if present and live. Expired copies are removed.
    fn load_from_mirror(&self, key: &str) -> Option<CacheItem> {
        match self.inner.mirror.load(key) {
            Ok(Some(item)) if item.is_expired() => {
                if let Err(err) = self.inner.mirror.remove(key) {
                    warn!(key, error = %err, "Failed to remove expired mirrored item");
                }
                None
            }
            Ok(item) => item,
            Err(err) => {
                warn!(key, error = %err, "Failed to read mirrored item");
                None
            }
        }
    }

    fn persist(&self, key: &str, item: &CacheItem) {
        if let Err(err) = self.inner.mirror.save(key, item) {
            warn!(key, error = %err, "Failed to mirror cache item, keeping in-memory copy only");
        }
    }

    fn modify_item<F>(&self, key: impl Into<CacheKey>, change: F) -> bool
    where
        F: FnOnce(&mut CacheItem),
    {
        let key = key.into().normalize();
        if self.resolve(&key).is_none() {
            return false;
        }

        let updated = {
            let mut state = self.inner.state.lock();
            let Some(item) = state.store.get_mut(&key) else {
                return false;
            };
            change(item);
            item.clone()
        };
        self.persist(&key, &updated);
        true
    }

    #[cfg(test)]
    pub(crate) fn insert_item(&self, key: impl Into<CacheKey>, item: CacheItem) {
        self.inner
            .state
            .lock()
            .store
            .set(key.into().normalize(), item);
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config())
            .field("entries", &self.inner.state.lock().store.len())
            .finish()
    }
}
