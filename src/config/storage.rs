//! Where users, their logs and the global settings are kept.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::store::{ConfigStore, FileStore, MemoryStore, StoreError};
use crate::history::MessageLog;

/// A user's persisted state as handed to the bouncer.
pub struct UserRecord {
    pub store: Box<dyn ConfigStore>,
    pub log: MessageLog,
}

/// Backing storage for the bouncer.
pub trait Storage {
    /// Global `system.*` settings.
    fn system_store(&mut self) -> Result<Box<dyn ConfigStore>, StoreError>;

    /// Bouncer-wide log.
    fn main_log(&mut self) -> Result<MessageLog, StoreError>;

    /// Names of all known users.
    fn user_names(&self) -> Result<Vec<String>, StoreError>;

    /// Open (creating if needed) a user's store and log.
    fn open_user(&mut self, name: &str) -> Result<UserRecord, StoreError>;

    /// Delete a user's store and log.
    fn remove_user(&mut self, name: &str) -> Result<(), StoreError>;
}

/// Directory layout:
///
/// ```text
/// <root>/system.toml
/// <root>/users/<name>.toml
/// <root>/logs/<name>.log
/// <root>/logs/main.log
/// ```
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// Use `root`, creating the directory tree if it is missing.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("users"))?;
        std::fs::create_dir_all(root.join("logs"))?;
        Ok(Self { root })
    }

    fn user_path(&self, name: &str) -> PathBuf {
        self.root.join("users").join(format!("{name}.toml"))
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.root.join("logs").join(format!("{name}.log"))
    }
}

impl Storage for DirStorage {
    fn system_store(&mut self) -> Result<Box<dyn ConfigStore>, StoreError> {
        Ok(Box::new(FileStore::open(self.root.join("system.toml"))?))
    }

    fn main_log(&mut self) -> Result<MessageLog, StoreError> {
        Ok(MessageLog::open(self.root.join("logs").join("main.log")))
    }

    fn user_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.root.join("users"))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn open_user(&mut self, name: &str) -> Result<UserRecord, StoreError> {
        Ok(UserRecord {
            store: Box::new(FileStore::open(self.user_path(name))?),
            log: MessageLog::open(self.log_path(name)),
        })
    }

    fn remove_user(&mut self, name: &str) -> Result<(), StoreError> {
        for path in [self.user_path(name), self.log_path(name)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Storage that forgets everything on exit.
#[derive(Default)]
pub struct MemoryStorage {
    users: BTreeSet<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn system_store(&mut self) -> Result<Box<dyn ConfigStore>, StoreError> {
        Ok(Box::new(MemoryStore::new()))
    }

    fn main_log(&mut self) -> Result<MessageLog, StoreError> {
        Ok(MessageLog::memory())
    }

    fn user_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.users.iter().cloned().collect())
    }

    fn open_user(&mut self, name: &str) -> Result<UserRecord, StoreError> {
        self.users.insert(name.to_string());
        Ok(UserRecord {
            store: Box::new(MemoryStore::new()),
            log: MessageLog::memory(),
        })
    }

    fn remove_user(&mut self, name: &str) -> Result<(), StoreError> {
        self.users.remove(name);
        Ok(())
    }
}
