//! Storage Sync Task
//!
//! Applies changes that other processes make to the shared storage.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::WeakCacheManager;
use crate::storage::StorageEvent;

/// Spawns the listener that feeds storage change events into the cache.
///
/// Exits when the event channel closes or the cache is dropped.
pub fn spawn_sync_task(
    cache: WeakCacheManager,
    mut events: broadcast::Receiver<StorageEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Listening for storage changes from other processes");

        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed storage change events, resyncing with durable mirror");
                    let Some(cache) = cache.upgrade() else { break };
                    cache.resync_from_mirror();
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let Some(cache) = cache.upgrade() else { break };
            cache.apply_storage_event(&event);
        }

        debug!("Storage change listener stopped");
    })
}
