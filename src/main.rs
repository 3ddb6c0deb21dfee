//! Tabcache - a time-bound cache shared between processes
//!
//! Command-line access to a file-backed cache namespace: read, write,
//! invalidate and sweep the items other processes share through it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabcache::{CacheConfig, CacheConfigPatch, CacheKey, CacheManager, FileStorage};

/// Inspect and edit a tabcache storage file
#[derive(Parser)]
#[command(name = "tabcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Storage file holding the cache namespace
    #[arg(
        long,
        global = true,
        env = "TABCACHE_STORAGE_PATH",
        default_value = "tabcache.json"
    )]
    storage: PathBuf,

    /// JSON file with config overrides, e.g. {"defaultTtlMs": 60000}
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a value (JSON, or taken as a plain string)
    Set {
        key: String,
        value: String,
        /// TTL in milliseconds (defaults to the configured TTL)
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
    /// Print a value
    Get { key: String },
    /// Delete a key
    Del { key: String },
    /// Delete every key starting with a prefix
    Invalidate { prefix: String },
    /// Delete every cached item
    Clear,
    /// List live keys with their remaining TTL
    Keys,
    /// Show the remaining TTL of a key
    Ttl { key: String },
    /// Restart the TTL window of a key
    Touch { key: String },
    /// Remove expired items once
    Sweep,
    /// Print cache statistics
    Stats,
    /// Remove expired items periodically until interrupted
    Watch,
}

/// Main entry point for the tabcache CLI.
///
/// Keys given as a JSON array or object (e.g. `'["reviews","u1"]'`) are used
/// structurally; anything else is a plain string key.
#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabcache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let storage = FileStorage::open(&cli.storage)
        .with_context(|| format!("failed to open storage {}", cli.storage.display()))?;
    let cache = CacheManager::new(Arc::new(storage), config);

    match cli.command {
        Command::Set { key, value, ttl_ms } => {
            let key = parse_key(&key);
            cache.set(&key, &parse_value(&value), ttl_ms.map(Duration::from_millis))?;
            println!("{}", key.normalize());
        }
        Command::Get { key } => {
            let key = parse_key(&key);
            let Some(value) = cache.get::<Value>(&key) else {
                bail!("key not found: {}", key.normalize());
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Del { key } => {
            if !cache.delete(parse_key(&key)) {
                warn!("Key was not cached");
            }
        }
        Command::Invalidate { prefix } => {
            let removed = cache.invalidate_pattern(parse_key(&prefix));
            println!("{removed}");
        }
        Command::Clear => cache.clear(),
        Command::Keys => {
            for key in cache.keys() {
                match cache.time_remaining(key.as_str()) {
                    Some(remaining) => println!("{key}\t{}", remaining.as_millis()),
                    None => println!("{key}\t-"),
                }
            }
        }
        Command::Ttl { key } => {
            let key = parse_key(&key);
            let Some(remaining) = cache.time_remaining(&key) else {
                bail!("key not found: {}", key.normalize());
            };
            let expires_at = chrono::Utc::now() + chrono::Duration::from_std(remaining)?;
            println!("{} ms (expires {})", remaining.as_millis(), expires_at.to_rfc3339());
        }
        Command::Touch { key } => {
            let key = parse_key(&key);
            if !cache.refresh(&key) {
                bail!("key not found: {}", key.normalize());
            }
        }
        Command::Sweep => {
            let removed = cache.sweep();
            println!("{removed}");
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&cache.stats())?);
        }
        Command::Watch => {
            info!(
                "Sweeping {} every {} ms",
                cli.storage.display(),
                config.cleanup_interval.as_millis()
            );
            if !cache.start_expiration() {
                bail!("cleanup interval must be greater than zero");
            }
            shutdown_signal().await;
            cache.dispose();
            info!("Watch stopped");
        }
    }

    Ok(())
}

/// Environment config with the overrides from `path` merged on top.
fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    let config = CacheConfig::from_env();
    let Some(path) = path else {
        return Ok(config);
    };

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let patch: CacheConfigPatch = serde_json::from_str(&raw)
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config.merged(&patch))
}

fn parse_key(raw: &str) -> CacheKey {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Array(_) | Value::Object(_))) => CacheKey::from(value),
        _ => CacheKey::from(raw),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("plain").normalize(), "plain");
        assert_eq!(parse_key(r#"["reviews","u1"]"#).normalize(), "reviews:u1");
        assert_eq!(parse_key(r#"{"b":1,"a":2}"#).normalize(), r#"{"a":2,"b":1}"#);
        // Scalars parse as JSON but stay string keys
        assert_eq!(parse_key("42").normalize(), "42");
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), serde_json::json!(42));
        assert_eq!(parse_value("hello"), serde_json::json!("hello"));
        assert_eq!(parse_value(r#"{"a":1}"#), serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "tabcache", "--storage", "x.json", "set", "k", "v", "--ttl-ms", "10",
        ])
        .unwrap();
        assert_eq!(cli.storage, PathBuf::from("x.json"));
        assert!(matches!(
            cli.command,
            Command::Set { ttl_ms: Some(10), .. }
        ));

        let cli = Cli::try_parse_from(["tabcache", "stats"]).unwrap();
        assert!(matches!(cli.command, Command::Stats));
    }
}
