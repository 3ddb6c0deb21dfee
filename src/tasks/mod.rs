//! Background Tasks Module
//!
//! Contains the background tasks a cache runs while a Tokio runtime is available.
//!
//! # Tasks
//! - Expiration sweep: removes expired items at the configured interval
//! - Storage sync: applies changes other processes make to the shared storage

mod expiration;
mod sync;

pub use expiration::{spawn_expiration_task, ExpirationManager};
pub use sync::spawn_sync_task;
