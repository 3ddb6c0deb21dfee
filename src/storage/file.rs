//! File-backed storage
//!
//! Keeps the whole key-value map in a single JSON file. Every operation reads
//! the file afresh, and every mutation is applied to the current contents and
//! written back through a temporary file and an atomic rename, so several
//! processes can share one file with per-key last-writer-wins.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use super::Storage;
use crate::error::StorageError;

/// Distinguishes temp files of writers within one process
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

// == File Storage ==
/// Durable storage persisted to a JSON file.
///
/// This backend cannot observe writes made by other processes, so
/// [`Storage::subscribe`] returns `None`. Reads still see them.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles of this handle
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Opens `path`, starting empty when the file does not exist yet.
    ///
    /// # Errors
    /// `StorageError::Corrupt` when the file exists but is not a JSON map.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let storage = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };

        let entries = storage.load()?;
        debug!(path = %storage.path.display(), entries = entries.len(), "Opened file storage");
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents of the file. A missing or blank file is an empty map.
    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| StorageError::Corrupt(format!("{}: {err}", self.path.display()))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Applies `change` to the current file contents and writes them back
    /// when `change` reports a modification.
    fn mutate<F>(&self, change: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.write_lock.lock();
        let mut entries = self.load()?;
        if !change(&mut entries) {
            return Ok(());
        }
        self.persist(&entries)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let raw = serde_json::to_string_pretty(entries)
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        let tmp = self.tmp_path();
        if let Err(err) = fs::write(&tmp, raw).and_then(|()| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}.{seq}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.mutate(|entries| entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.load()?.into_keys().collect())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.mutate(|entries| {
            let changed = !entries.is_empty();
            entries.clear();
            changed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("cache.json")).unwrap();

        assert!(storage.keys().unwrap().is_empty());
        assert_eq!(storage.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.set_item("a", "1").unwrap();
        storage.set_item("b", "2").unwrap();
        storage.remove_item("a").unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get_item("a").unwrap(), None);
        assert_eq!(reopened.get_item("b").unwrap(), Some("2".to_string()));
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn test_clear_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let storage = FileStorage::open(&path).unwrap();
        storage.set_item("a", "1").unwrap();
        storage.clear().unwrap();

        let reopened = FileStorage::open(&path).unwrap();
        assert!(reopened.keys().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "not json").unwrap();

        let result = FileStorage::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_handles_on_one_file_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let a = FileStorage::open(&path).unwrap();
        let b = FileStorage::open(&path).unwrap();

        a.set_item("from_a", "1").unwrap();
        b.set_item("from_b", "2").unwrap();

        assert_eq!(b.get_item("from_a").unwrap(), Some("1".to_string()));
        assert_eq!(a.keys().unwrap(), vec!["from_a", "from_b"]);

        a.remove_item("from_b").unwrap();
        assert_eq!(b.keys().unwrap(), vec!["from_a"]);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("cache.json")).unwrap();
        storage.set_item("a", "1").unwrap();
        storage.set_item("b", "2").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("cache.json")]);
    }

    #[test]
    fn test_no_change_events() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("cache.json")).unwrap();
        assert!(storage.subscribe().is_none());
    }
}
