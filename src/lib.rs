//! Tabcache - a time-bound cache shared between processes
//!
//! Keeps cached values in memory with per-item TTLs, mirrors them into shared
//! durable storage so other processes of the same origin see them, and
//! notifies subscribers whenever a key changes locally or elsewhere.

pub mod cache;
pub mod config;
pub mod error;
pub mod registry;
pub mod storage;
pub mod tasks;

pub use cache::{CacheKey, CacheManager, CacheStats, Subscription, WILDCARD};
pub use config::{CacheConfig, CacheConfigPatch};
pub use error::{CacheError, Result, StorageError};
pub use registry::CacheRegistry;
pub use storage::{FileStorage, OriginStorage, SharedOrigin, Storage, StorageEvent};
