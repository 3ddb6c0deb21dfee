//! Expiration Sweep Task
//!
//! Background task that periodically removes expired items from memory and
//! from the durable mirror.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::WeakCacheManager;

/// Spawns a task that calls [`sweep`](crate::cache::CacheManager::sweep) every `interval`.
///
/// The task holds only a weak reference and exits on its own once the cache
/// is dropped. Must be called from within a Tokio runtime.
///
/// # Example
/// ```ignore
/// let handle = spawn_expiration_task(cache.downgrade(), Duration::from_secs(60));
/// // Later:
/// handle.abort();
/// ```
pub fn spawn_expiration_task(cache: WeakCacheManager, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting expiration sweep task with interval of {} ms",
            interval.as_millis()
        );

        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(cache) = cache.upgrade() else {
                debug!("Cache dropped, stopping expiration sweep task");
                break;
            };
            cache.sweep();
        }
    })
}

// == Expiration Manager ==
/// Owns the sweep task of one cache.
#[derive(Debug, Default)]
pub struct ExpirationManager {
    handle: Option<JoinHandle<()>>,
}

impl ExpirationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Starts the sweep timer. A no-op when it is already running.
    ///
    /// Returns whether a timer is running afterwards. Without a Tokio runtime
    /// there is nothing to schedule on, so the timer stays off and expiry
    /// relies on the lazy check alone.
    pub fn start(&mut self, cache: WeakCacheManager, interval: Duration) -> bool {
        if self.is_running() {
            return true;
        }

        if interval.is_zero() {
            warn!("Cleanup interval is zero, periodic expiration disabled");
            return false;
        }

        if Handle::try_current().is_err() {
            debug!("No async runtime available, periodic expiration disabled");
            return false;
        }

        self.handle = Some(spawn_expiration_task(cache, interval));
        true
    }

    /// Cancels the pending timer.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Expiration sweep task stopped");
        }
    }

    pub fn restart(&mut self, cache: WeakCacheManager, interval: Duration) -> bool {
        self.stop();
        self.start(cache, interval)
    }
}

impl Drop for ExpirationManager {
    fn drop(&mut self) {
        self.stop();
    }
}
