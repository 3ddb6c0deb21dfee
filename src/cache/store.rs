//! Memory Store Module
//!
//! Process-local map of normalized keys to cache items with lazy expiration.

use std::collections::HashMap;

use crate::cache::CacheItem;

// == Memory Store ==
/// In-memory cache storage. Never performs I/O.
///
/// Every read path checks the item's TTL first and drops it when expired, so
/// callers never observe stale values regardless of when the sweep last ran.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Items by normalized key
    entries: HashMap<String, CacheItem>,
    /// Items dropped because their TTL elapsed
    expirations: u64,
}

impl MemoryStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Set ==
    /// Stores an item, replacing any existing item for the key.
    pub fn set(&mut self, key: String, item: CacheItem) {
        self.entries.insert(key, item);
    }

    // == Get ==
    /// Returns the item for `key` unless it is missing or expired.
    ///
    /// Expired items are removed before returning.
    pub fn get(&mut self, key: &str) -> Option<&CacheItem> {
        self.evict_if_expired(key);
        self.entries.get(key)
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheItem> {
        self.evict_if_expired(key);
        self.entries.get_mut(key)
    }

    // == Has ==
    pub fn has(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    // == Delete ==
    /// Removes an entry by key, returning it if it was present.
    pub fn delete(&mut self, key: &str) -> Option<CacheItem> {
        self.entries.remove(key)
    }

    /// Removes every entry whose key starts with `prefix`, returning the removed keys.
    pub fn delete_with_prefix(&mut self, prefix: &str) -> Vec<String> {
        let matching: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &matching {
            self.entries.remove(key);
        }
        matching
    }

    /// Removes everything, returning how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    // == Keys ==
    /// Keys of all live (non-expired) entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, item)| !item.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the store.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, item| !item.is_expired());

        let removed = before - self.entries.len();
        self.expirations += removed as u64;
        removed
    }

    // == Length ==
    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total entries dropped by lazy or periodic expiration.
    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    fn evict_if_expired(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(CacheItem::is_expired) {
            self.entries.remove(key);
            self.expirations += 1;
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::current_timestamp_ms;
    use serde_json::json;
    use std::time::Duration;

    fn fresh(value: serde_json::Value) -> CacheItem {
        CacheItem::new(value, Duration::from_secs(300))
    }

    fn stale(value: serde_json::Value) -> CacheItem {
        CacheItem {
            value,
            created_at: current_timestamp_ms() - 10_000,
            ttl: 1_000,
        }
    }

    #[test]
    fn test_store_new() {
        let store = MemoryStore::new();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = MemoryStore::new();

        store.set("key1".to_string(), fresh(json!("value1")));
        let item = store.get("key1").unwrap();

        assert_eq!(item.value, json!("value1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = MemoryStore::new();
        assert!(store.get("nonexistent").is_none());
        assert!(!store.has("nonexistent"));
    }

    #[test]
    fn test_store_overwrite_keeps_single_entry() {
        let mut store = MemoryStore::new();

        store.set("key1".to_string(), fresh(json!(1)));
        store.set("key1".to_string(), fresh(json!(2)));

        assert_eq!(store.get("key1").unwrap().value, json!(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_delete() {
        let mut store = MemoryStore::new();

        store.set("key1".to_string(), fresh(json!("value1")));
        assert!(store.delete("key1").is_some());

        assert!(store.is_empty());
        assert!(store.delete("key1").is_none());
    }

    #[test]
    fn test_lazy_expiration_on_get() {
        let mut store = MemoryStore::new();
        store.set("old".to_string(), stale(json!("v")));

        assert_eq!(store.len(), 1);
        assert!(store.get("old").is_none());
        assert_eq!(store.len(), 0, "expired entry should be removed on read");
        assert_eq!(store.expirations(), 1);
    }

    #[test]
    fn test_lazy_expiration_on_has_and_get_mut() {
        let mut store = MemoryStore::new();
        store.set("a".to_string(), stale(json!(1)));
        store.set("b".to_string(), stale(json!(2)));

        assert!(!store.has("a"));
        assert!(store.get_mut("b").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_skip_expired() {
        let mut store = MemoryStore::new();
        store.set("b".to_string(), fresh(json!(1)));
        store.set("a".to_string(), fresh(json!(1)));
        store.set("stale".to_string(), stale(json!(1)));

        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_delete_with_prefix() {
        let mut store = MemoryStore::new();
        store.set("reviews:u1".to_string(), fresh(json!(1)));
        store.set("reviews:u1:page1".to_string(), fresh(json!(2)));
        store.set("reviews:u2".to_string(), fresh(json!(3)));

        let mut removed = store.delete_with_prefix("reviews:u1");
        removed.sort();

        assert_eq!(removed, vec!["reviews:u1", "reviews:u1:page1"]);
        assert_eq!(store.keys(), vec!["reviews:u2".to_string()]);
    }

    #[test]
    fn test_store_cleanup_expired() {
        let mut store = MemoryStore::new();
        store.set("key1".to_string(), stale(json!(1)));
        store.set("key2".to_string(), fresh(json!(2)));

        let removed = store.cleanup_expired();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("key2").is_some());
        assert_eq!(store.expirations(), 1);
    }

    #[test]
    fn test_clear() {
        let mut store = MemoryStore::new();
        store.set("a".to_string(), fresh(json!(1)));
        store.set("b".to_string(), fresh(json!(2)));

        assert_eq!(store.clear(), 2);
        assert_eq!(store.clear(), 0);
        assert!(store.is_empty());
    }
}
