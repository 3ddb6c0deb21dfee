//! Cache Item Module
//!
//! Defines the structure for individual cache items with TTL support.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Cache Item ==
/// A single cached value with its creation time and time-to-live.
///
/// This is also the payload written to durable storage, so the field names
/// are fixed: `{"createdAt": .., "ttl": .., "value": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem<T = Value> {
    /// The stored value
    pub value: T,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Time-to-live in milliseconds
    pub ttl: u64,
}

impl<T> CacheItem<T> {
    // == Constructor ==
    /// Creates an item stamped with the current time.
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            created_at: current_timestamp_ms(),
            ttl: duration_ms(ttl),
        }
    }

    // == Is Expired ==
    /// Checks if the item has outlived its TTL.
    ///
    /// An item whose age equals its TTL is still valid; it expires once the
    /// age is strictly greater.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Expiry check against an explicit clock reading.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.age_ms(now_ms) > self.ttl
    }

    /// Milliseconds elapsed since creation. Timestamps from the future count as age zero.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }

    // == Time Remaining ==
    /// Remaining lifetime, clamped to zero once expired.
    pub fn time_remaining(&self) -> Duration {
        let age = self.age_ms(current_timestamp_ms());
        Duration::from_millis(self.ttl.saturating_sub(age))
    }

    /// Replaces the TTL, keeping the creation time.
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = duration_ms(ttl);
    }

    /// Adds `delta` to the TTL.
    pub fn extend_ttl(&mut self, delta: Duration) {
        self.ttl = self.ttl.saturating_add(duration_ms(delta));
    }

    /// Restarts the TTL window from now.
    pub fn refresh(&mut self) {
        self.created_at = current_timestamp_ms();
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
