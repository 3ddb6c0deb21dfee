//! Cache Module
//!
//! TTL cache kept in memory and mirrored into shared durable storage, with
//! change notifications and cross-process sync.

mod entry;
mod key;
mod manager;
mod mirror;
mod notifier;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{current_timestamp_ms, CacheItem};
pub(crate) use entry::duration_ms;
pub use key::{canonical_json, normalize, CacheKey, KEY_SEPARATOR};
pub use manager::{CacheManager, WeakCacheManager};
pub use mirror::{decode_item, encode_item, DurableMirror, NAMESPACE};
pub use notifier::{Notifier, Subscription, WILDCARD};
pub use stats::CacheStats;
pub use store::MemoryStore;
