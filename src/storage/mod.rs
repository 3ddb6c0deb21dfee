//! Durable Storage Module
//!
//! The host-provided key-value store that the cache mirrors into.
//!
//! # Backends
//! - [`SharedOrigin`] / [`OriginStorage`]: an origin-scoped store shared by
//!   several handles, each standing in for one process. Writes made through
//!   one handle are announced to every other handle.
//! - [`FileStorage`]: a JSON file on disk that survives process restarts.

mod file;
mod origin;

use tokio::sync::broadcast;

use crate::error::StorageError;

pub use file::FileStorage;
pub use origin::{OriginStorage, SharedOrigin};

// == Storage Event ==
/// A change made to the shared storage by another handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Affected storage key; `None` when the whole storage was cleared
    pub key: Option<String>,
    /// Value after the change; `None` when the key was removed
    pub new_value: Option<String>,
}

impl StorageEvent {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            new_value: Some(value.into()),
        }
    }

    pub fn removed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            new_value: None,
        }
    }

    pub fn cleared() -> Self {
        Self {
            key: None,
            new_value: None,
        }
    }
}

// == Storage Trait ==
/// A string key-value store shared by every process of one origin.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Every key currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Removes every key, including ones the cache does not own.
    ///
    /// The cache never calls this; it only removes its own namespaced keys.
    /// It is the host's way to wipe the whole origin, which other handles
    /// observe as [`StorageEvent::cleared`].
    fn clear(&self) -> Result<(), StorageError>;

    /// Changes made by other processes. `None` when the backend cannot observe them.
    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        None
    }
}
