//! Origin-scoped shared storage
//!
//! One [`SharedOrigin`] holds the data; each [`OriginStorage`] handle is one
//! process attached to it. A write through a handle is broadcast to every
//! other handle, never echoed back to the writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use super::{Storage, StorageEvent};
use crate::error::StorageError;

/// Pending events each handle can buffer before it starts lagging.
const EVENT_CAPACITY: usize = 256;

struct OriginState {
    entries: RwLock<HashMap<String, String>>,
    /// Event sender of every attached handle
    handles: Mutex<Vec<(u64, broadcast::Sender<StorageEvent>)>>,
    next_handle: AtomicU64,
    quota_bytes: Option<usize>,
    available: AtomicBool,
}

impl OriginState {
    fn check_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("storage is disabled".to_string()))
        }
    }

    fn publish(&self, source: u64, event: StorageEvent) {
        for (id, tx) in self.handles.lock().iter() {
            if *id != source {
                // No receiver just means that handle is not listening
                let _ = tx.send(event.clone());
            }
        }
    }
}

// == Shared Origin ==
/// Storage shared by every handle connected to it.
#[derive(Clone)]
pub struct SharedOrigin {
    state: Arc<OriginState>,
}

impl SharedOrigin {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// An origin that rejects writes once keys plus values exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self::build(Some(bytes))
    }

    fn build(quota_bytes: Option<usize>) -> Self {
        Self {
            state: Arc::new(OriginState {
                entries: RwLock::new(HashMap::new()),
                handles: Mutex::new(Vec::new()),
                next_handle: AtomicU64::new(0),
                quota_bytes,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Attaches a new handle.
    pub fn connect(&self) -> OriginStorage {
        let id = self.state.next_handle.fetch_add(1, Ordering::Relaxed);
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        self.state.handles.lock().push((id, tx.clone()));
        debug!(handle = id, "Connected storage handle");

        OriginStorage {
            state: Arc::clone(&self.state),
            id,
            events: tx,
        }
    }

    /// Enables or disables the storage for every handle.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::Release);
    }

    /// Raw value under `key`, bypassing every handle.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.state.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SharedOrigin {
    fn default() -> Self {
        Self::new()
    }
}

// == Origin Storage ==
/// One process's view of a [`SharedOrigin`].
pub struct OriginStorage {
    state: Arc<OriginState>,
    id: u64,
    events: broadcast::Sender<StorageEvent>,
}

impl OriginStorage {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Storage for OriginStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.state.check_available()?;
        Ok(self.state.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.state.check_available()?;
        {
            let mut entries = self.state.entries.write();

            if let Some(quota) = self.state.quota_bytes {
                let used: usize = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                let needed = used + key.len() + value.len();
                if needed > quota {
                    return Err(StorageError::QuotaExceeded { needed, quota });
                }
            }

            entries.insert(key.to_string(), value.to_string());
        }

        self.state.publish(self.id, StorageEvent::set(key, value));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.state.check_available()?;
        if self.state.entries.write().remove(key).is_some() {
            self.state.publish(self.id, StorageEvent::removed(key));
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.state.check_available()?;
        Ok(self.state.entries.read().keys().cloned().collect())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.state.check_available()?;
        self.state.entries.write().clear();
        self.state.publish(self.id, StorageEvent::cleared());
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        Some(self.events.subscribe())
    }
}

impl Drop for OriginStorage {
    fn drop(&mut self) {
        self.state.handles.lock().retain(|(id, _)| *id != self.id);
    }
}
