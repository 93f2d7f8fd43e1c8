//! Key/value settings stores.
//!
//! Keys are dotted and namespaced: `user.*` in a per-user store, `system.*`
//! in the global one. Values are strings; integers are stored in decimal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::history::HistoryError;

/// Errors from settings stores and user storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse store: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize store: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("log error: {0}")]
    History(#[from] HistoryError),
}

/// Read/write access to one namespace of settings.
pub trait ConfigStore {
    /// String value of `key`, if set.
    fn read_string(&self, key: &str) -> Option<String>;

    /// Integer value of `key`, if set and numeric.
    fn read_integer(&self, key: &str) -> Option<i64> {
        self.read_string(key).and_then(|v| v.trim().parse().ok())
    }

    /// Set or (with `None`) remove `key`.
    fn write_string(&mut self, key: &str, value: Option<&str>) -> Result<(), StoreError>;

    /// Store an integer.
    fn write_integer(&mut self, key: &str, value: i64) -> Result<(), StoreError> {
        self.write_string(key, Some(&value.to_string()))
    }
}

/// Store that lives only as long as the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn read_string(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn write_string(&mut self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        match value {
            Some(v) => self.values.insert(key.to_string(), v.to_string()),
            None => self.values.remove(key),
        };
        Ok(())
    }
}

/// Store persisted as a flat TOML table, rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileStore {
    /// Open `path`; a missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string(&self.values)?)?;
        Ok(())
    }
}

impl ConfigStore for FileStore {
    fn read_string(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn write_string(&mut self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let changed = match value {
            Some(v) => self.values.insert(key.to_string(), v.to_string()).as_deref() != Some(v),
            None => self.values.remove(key).is_some(),
        };
        if changed {
            self.persist()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_reads_back() {
        let mut store = MemoryStore::new();
        store.write_string("user.nick", Some("bob")).unwrap();
        store.write_integer("user.port", 6667).unwrap();
        assert_eq!(store.read_string("user.nick").as_deref(), Some("bob"));
        assert_eq!(store.read_integer("user.port"), Some(6667));
        assert_eq!(store.read_integer("user.nick"), None);
        store.write_string("user.nick", None).unwrap();
        assert_eq!(store.read_string("user.nick"), None);
    }

    #[test]
    fn file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users").join("bob.toml");
        {
            let mut store = FileStore::open(&path).unwrap();
            store.write_string("user.realname", Some("Bob Builder")).unwrap();
            store.write_integer("user.admin", 1).unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.read_string("user.realname").as_deref(), Some("Bob Builder"));
        assert_eq!(store.read_integer("user.admin"), Some(1));
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Parse(_))));
    }
}
