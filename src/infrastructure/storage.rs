//! Persistence adapters for the synchronized document
//!
//! A storage medium is a set of named slots holding one serialized document
//! each. Every client opened on the same medium sees the same slots.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub trait DocumentStorage: Send + Sync {
    /// Contents of `key`, `None` if the slot was never written or was cleared
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, document: &str) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
}

/// One `<key>.json` file per slot in a directory
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl DocumentStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn save(&self, key: &str, document: &str) -> Result<()> {
        let path = self.path_for(key);
        // Readers must never see a half-written document
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, document)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!(path = %path.display(), bytes = document.len(), "document flushed");
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// In-process medium; clones share the same slots
#[derive(Clone, Default)]
pub struct MemoryStorage {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(key).cloned())
    }

    fn save(&self, key: &str, document: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(key.to_string(), document.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested")).unwrap();

        assert_eq!(storage.load("sync-state").unwrap(), None);
        storage.save("sync-state", "{\"time\":1}").unwrap();
        assert_eq!(
            storage.load("sync-state").unwrap().as_deref(),
            Some("{\"time\":1}")
        );
        assert!(storage.dir().join("sync-state.json").exists());
        assert!(!storage.dir().join("sync-state.json.tmp").exists());

        storage.clear("sync-state").unwrap();
        assert_eq!(storage.load("sync-state").unwrap(), None);
        storage.clear("sync-state").unwrap();
    }

    #[test]
    fn test_file_storage_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.save("../escape", "x").unwrap();
        assert!(dir.path().join("___escape.json").exists());
    }

    #[test]
    fn test_memory_storage_clones_share_slots() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage.save("k", "v").unwrap();
        assert_eq!(other.load("k").unwrap().as_deref(), Some("v"));
        other.clear("k").unwrap();
        assert_eq!(storage.load("k").unwrap(), None);
    }
}
