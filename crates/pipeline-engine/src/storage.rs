//! Key-value persistence used by the history log and the pipeline library.
//!
//! The engine only ever stores opaque serialized blobs under string keys.
//! `FileStore` keeps one JSON file per key in a directory; `MemoryStore`
//! is the in-process equivalent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{PipelineError, Result};

/// Bytes escaped in file names. `%` and `_` are escaped too, so the mapping
/// from key to file name is one-to-one.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.');

/// Durable key-value capability consumed by the engine
pub trait KeyValueStore: Send + Sync {
    /// Read the blob stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Directory-backed store, one `<key>.json` file per key.
///
/// Keys are percent-encoded into file names. The directory is created on
/// first write.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory the store writes into
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key == "." || key == ".." {
            return Err(PipelineError::Storage(format!("Invalid storage key '{}'", key)));
        }
        let file_name = utf8_percent_encode(key, KEY_ENCODE_SET);
        Ok(self.root.join(format!("{}.json", file_name)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(content))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(&path, value)?;
        log::debug!("Stored '{}' at {:?}", key, path);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::debug!("Removed '{}' from {:?}", key, path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.get("k").unwrap().is_none());

        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(store.len(), 1);

        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("store");

        {
            let store = FileStore::new(&root);
            store.set("pipeline-execution-history", "[]").unwrap();
        }

        {
            let store = FileStore::new(&root);
            assert_eq!(
                store.get("pipeline-execution-history").unwrap().as_deref(),
                Some("[]")
            );
            store.remove("pipeline-execution-history").unwrap();
            assert!(store.get("pipeline-execution-history").unwrap().is_none());
        }
    }

    #[test]
    fn test_file_store_encodes_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path());

        store.set("pipeline-definition:Monthly report", "{}").unwrap();
        assert!(temp_dir
            .path()
            .join("pipeline-definition%3AMonthly%20report.json")
            .exists());

        // Separators are encoded, so the key stays inside the root
        store.set("../escape", "{}").unwrap();
        assert!(temp_dir.path().join("..%2Fescape.json").exists());
        assert!(store.set("..", "{}").is_err());
    }

    #[test]
    fn test_file_store_keys_do_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path());

        let keys = ["Monthly report", "Monthly_report", "Monthly%20report", "Monthly/report"];
        for key in keys {
            store.set(key, key).unwrap();
        }
        for key in keys {
            assert_eq!(store.get(key).unwrap().as_deref(), Some(key));
        }
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 4);
    }
}
