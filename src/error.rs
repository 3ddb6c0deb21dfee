//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Only `ConfigurationAfterInit` and a `Serialization` failure while storing a
/// value ever reach callers. The remaining variants describe failures that the
/// cache logs and degrades around.
#[derive(Error, Debug)]
pub enum CacheError {
    /// `get_instance` was handed a config after the shared cache already exists
    #[error("cache is already initialized; use configure() to change a live instance")]
    ConfigurationAfterInit,

    /// A value or a mirrored payload could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The durable storage rejected a read or write
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A change subscriber panicked while being notified
    #[error("subscriber callback panicked: {0}")]
    Subscriber(String),
}

// == Storage Error Enum ==
/// Failures raised by a durable storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Writing would exceed the storage quota
    #[error("storage quota exceeded: {needed} bytes needed, {quota} bytes allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    /// The storage is disabled or cannot be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Filesystem failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file exists but does not hold a string map
    #[error("storage file is corrupt: {0}")]
    Corrupt(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
