//! Configuration Module
//!
//! Handles the cache configuration, its partial overrides and loading from
//! environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// TTL applied when `set` is called without one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Interval between periodic expiration sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL for entries stored without an explicit TTL
    pub default_ttl: Duration,
    /// Background sweep interval
    pub cleanup_interval: Duration,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `TABCACHE_DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 300000)
    /// - `TABCACHE_CLEANUP_INTERVAL_MS` - Sweep frequency in milliseconds (default: 60000)
    pub fn from_env() -> Self {
        Self {
            default_ttl: env::var("TABCACHE_DEFAULT_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TTL),
            cleanup_interval: env::var("TABCACHE_CLEANUP_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL),
        }
    }

    /// Applies the fields set in `patch`.
    ///
    /// Returns `true` when the cleanup interval changed, which is the signal to
    /// restart the sweep timer.
    pub fn merge(&mut self, patch: &CacheConfigPatch) -> bool {
        if let Some(ttl) = patch.default_ttl {
            self.default_ttl = ttl;
        }

        match patch.cleanup_interval {
            Some(interval) if interval != self.cleanup_interval => {
                self.cleanup_interval = interval;
                true
            }
            _ => false,
        }
    }

    /// Consuming variant of [`merge`](Self::merge).
    pub fn merged(mut self, patch: &CacheConfigPatch) -> Self {
        self.merge(patch);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

/// Partial configuration merged onto a [`CacheConfig`].
///
/// Deserializes from JSON such as `{"defaultTtlMs": 1000, "cleanupIntervalMs": 250}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct CacheConfigPatch {
    #[serde(
        default,
        rename = "defaultTtlMs",
        deserialize_with = "deserialize_opt_millis"
    )]
    pub default_ttl: Option<Duration>,
    #[serde(
        default,
        rename = "cleanupIntervalMs",
        deserialize_with = "deserialize_opt_millis"
    )]
    pub cleanup_interval: Option<Duration>,
}

impl CacheConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// True when the patch would not change any setting.
    pub fn is_empty(&self) -> bool {
        self.default_ttl.is_none() && self.cleanup_interval.is_none()
    }
}

fn deserialize_opt_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

/// Location of the file-backed storage, from `TABCACHE_STORAGE_PATH`.
pub fn storage_path_from_env() -> Option<PathBuf> {
    env::var_os("TABCACHE_STORAGE_PATH")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
