//! Durable Mirror Module
//!
//! Replicates cache items into the shared durable storage under a fixed
//! namespace. Every operation returns a `Result`; the manager decides how to
//! degrade when storage misbehaves.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::cache::{canonical_json, CacheItem};
use crate::error::Result;
use crate::storage::{Storage, StorageEvent};

/// Prefix of every storage key owned by the cache.
pub const NAMESPACE: &str = "tabcache:";

// == Durable Mirror ==
#[derive(Clone)]
pub struct DurableMirror {
    storage: Arc<dyn Storage>,
    namespace: String,
}

impl DurableMirror {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_namespace(storage, NAMESPACE)
    }

    pub fn with_namespace(storage: Arc<dyn Storage>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Physical storage key for a normalized cache key.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Normalized cache key for a physical storage key, if it is ours.
    pub fn cache_key<'a>(&self, storage_key: &'a str) -> Option<&'a str> {
        storage_key.strip_prefix(self.namespace.as_str())
    }

    // == Save ==
    pub fn save(&self, key: &str, item: &CacheItem) -> Result<()> {
        let payload = encode_item(item)?;
        self.storage.set_item(&self.storage_key(key), &payload)?;
        Ok(())
    }

    // == Load ==
    /// Reads the mirrored item. Expiry is not checked here.
    pub fn load(&self, key: &str) -> Result<Option<CacheItem>> {
        match self.storage.get_item(&self.storage_key(key))? {
            Some(raw) => Ok(Some(decode_item(&raw)?)),
            None => Ok(None),
        }
    }

    // == Remove ==
    /// Removes the mirrored item. Returns whether it was stored.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let storage_key = self.storage_key(key);
        if self.storage.get_item(&storage_key)?.is_none() {
            return Ok(false);
        }
        self.storage.remove_item(&storage_key)?;
        Ok(true)
    }

    /// Normalized keys of every mirrored item.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .storage
            .keys()?
            .iter()
            .filter_map(|k| self.cache_key(k))
            .map(str::to_string)
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Removes every mirrored item whose normalized key starts with `prefix`.
    ///
    /// Returns the keys that were removed. A key that fails to remove is
    /// logged and skipped.
    pub fn remove_all_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for key in self.keys()? {
            if !key.starts_with(prefix) {
                continue;
            }
            match self.remove(&key) {
                Ok(true) => removed.push(key),
                Ok(false) => {}
                Err(err) => warn!(key, error = %err, "Failed to remove mirrored item"),
            }
        }
        Ok(removed)
    }

    /// Removes every item in the namespace, leaving foreign keys alone.
    pub fn clear_all(&self) -> Result<usize> {
        Ok(self.remove_all_with_prefix("")?.len())
    }

    // == Cleanup Expired ==
    /// Removes mirrored items that are expired or cannot be decoded.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.keys()? {
            let stale = match self.load(&key) {
                Ok(Some(item)) => item.is_expired(),
                Ok(None) => false,
                Err(err) => {
                    warn!(key, error = %err, "Dropping unreadable mirrored item");
                    true
                }
            };

            if stale {
                self.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Changes made to the storage by other processes.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        self.storage.subscribe()
    }
}

/// Serializes an item with sorted keys.
pub fn encode_item(item: &CacheItem) -> Result<String> {
    Ok(canonical_json(&serde_json::to_value(item)?))
}

pub fn decode_item(raw: &str) -> Result<CacheItem> {
    Ok(serde_json::from_str(raw)?)
}
