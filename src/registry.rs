//! Shared Cache Registry
//!
//! Owns the one cache instance of a process and enforces the two-phase
//! configuration contract:
//!
//! - before creation, [`configure`](CacheRegistry::configure) edits the pending
//!   defaults and [`get_instance`](CacheRegistry::get_instance) may pass a
//!   final patch;
//! - after creation, only `configure` may change the live instance, and
//!   `get_instance` with a non-empty patch is an error.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::cache::{duration_ms, CacheManager};
use crate::config::{storage_path_from_env, CacheConfig, CacheConfigPatch};
use crate::error::{CacheError, Result};
use crate::storage::{FileStorage, SharedOrigin, Storage};

/// Lifecycle phase of a [`CacheRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unconfigured,
    Configured,
    Instantiated,
}

enum RegistryState {
    Unconfigured,
    Configured(CacheConfig),
    Instantiated(CacheManager),
}

// == Cache Registry ==
pub struct CacheRegistry {
    storage: Arc<dyn Storage>,
    defaults: CacheConfig,
    state: Mutex<RegistryState>,
}

impl CacheRegistry {
    /// A registry whose instance will mirror into `storage`, starting from built-in defaults.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_defaults(storage, CacheConfig::default())
    }

    pub fn with_defaults(storage: Arc<dyn Storage>, defaults: CacheConfig) -> Self {
        Self {
            storage,
            defaults,
            state: Mutex::new(RegistryState::Unconfigured),
        }
    }

    pub fn phase(&self) -> Phase {
        match &*self.state.lock() {
            RegistryState::Unconfigured => Phase::Unconfigured,
            RegistryState::Configured(_) => Phase::Configured,
            RegistryState::Instantiated(_) => Phase::Instantiated,
        }
    }

    /// Merges `patch` onto the pending config, or onto the live instance
    /// once one exists.
    pub fn configure(&self, patch: &CacheConfigPatch) {
        let mut state = self.state.lock();
        match &mut *state {
            RegistryState::Instantiated(cache) => cache.configure(patch),
            RegistryState::Configured(pending) => {
                pending.merge(patch);
            }
            RegistryState::Unconfigured => {
                *state = RegistryState::Configured(self.defaults.merged(patch));
            }
        }
    }

    /// Returns the shared cache, creating it and starting its sweep timer on first use.
    ///
    /// # Errors
    /// `CacheError::ConfigurationAfterInit` when the instance already exists
    /// and `patch` is non-empty.
    pub fn get_instance(&self, patch: Option<&CacheConfigPatch>) -> Result<CacheManager> {
        let mut state = self.state.lock();

        if let RegistryState::Instantiated(cache) = &*state {
            if patch.is_some_and(|p| !p.is_empty()) {
                return Err(CacheError::ConfigurationAfterInit);
            }
            return Ok(cache.clone());
        }

        let mut config = match &*state {
            RegistryState::Configured(pending) => *pending,
            _ => self.defaults,
        };
        if let Some(patch) = patch {
            config.merge(patch);
        }

        let cache = CacheManager::new(Arc::clone(&self.storage), config);
        cache.start_expiration();
        info!(
            default_ttl_ms = duration_ms(config.default_ttl),
            cleanup_interval_ms = duration_ms(config.cleanup_interval),
            "Shared cache created"
        );

        *state = RegistryState::Instantiated(cache.clone());
        Ok(cache)
    }

    /// Disposes the instance, if any, and returns to the unconfigured phase.
    pub fn reset(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), RegistryState::Unconfigured);
        if let RegistryState::Instantiated(cache) = previous {
            cache.dispose();
        }
    }
}

// == Process-wide Registry ==
/// The registry shared by the whole process.
///
/// Its storage is a file at `TABCACHE_STORAGE_PATH` when set, otherwise a
/// process-private in-memory origin. Defaults come from the environment.
pub fn global() -> &'static CacheRegistry {
    static REGISTRY: OnceLock<CacheRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| CacheRegistry::with_defaults(default_storage(), CacheConfig::from_env()))
}

/// [`CacheRegistry::configure`] on the [`global`] registry.
pub fn configure(patch: &CacheConfigPatch) {
    global().configure(patch);
}

/// [`CacheRegistry::get_instance`] on the [`global`] registry.
pub fn get_instance(patch: Option<&CacheConfigPatch>) -> Result<CacheManager> {
    global().get_instance(patch)
}

fn default_storage() -> Arc<dyn Storage> {
    if let Some(path) = storage_path_from_env() {
        match FileStorage::open(&path) {
            Ok(storage) => return Arc::new(storage),
            Err(err) => warn!(
                path = %path.display(),
                error = %err,
                "Cannot open cache storage file, falling back to memory"
            ),
        }
    }
    Arc::new(SharedOrigin::new().connect())
}
