//! Append-only, timestamped text log.

use super::HistoryError;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A log kept in a file, or in memory when no path is given.
#[derive(Debug, Default)]
pub struct MessageLog {
    path: Option<PathBuf>,
    memory: Vec<String>,
}

impl MessageLog {
    /// Log backed by `path`; the file is created on first append.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            memory: Vec::new(),
        }
    }

    /// Log kept in memory only.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Append one entry, prefixed with the local time.
    pub fn append(&mut self, text: &str) -> Result<(), HistoryError> {
        let entry = format!("[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), text);
        match &self.path {
            Some(path) => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                writeln!(file, "{entry}")?;
            }
            None => self.memory.push(entry),
        }
        Ok(())
    }

    /// All entries, oldest first.
    pub fn lines(&self) -> Result<Vec<String>, HistoryError> {
        match &self.path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(content) => Ok(content.lines().map(str::to_owned).collect()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            },
            None => Ok(self.memory.clone()),
        }
    }

    /// Whether there is anything to play back.
    pub fn is_empty(&self) -> bool {
        match &self.path {
            Some(path) => std::fs::metadata(path).map_or(true, |m| m.len() == 0),
            None => self.memory.is_empty(),
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) -> Result<(), HistoryError> {
        match &self.path {
            Some(path) => match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            None => {
                self.memory.clear();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log() {
        let mut log = MessageLog::memory();
        assert!(log.is_empty());
        log.append("alice: hi").unwrap();
        let lines = log.lines().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("] alice: hi"));
        log.clear().unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn file_log_appends_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = MessageLog::open(dir.path().join("bob.log"));
        assert!(log.is_empty());
        assert!(log.lines().unwrap().is_empty());
        log.append("one").unwrap();
        log.append("two").unwrap();
        let lines = log.lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("two"));
        log.clear().unwrap();
        assert!(log.is_empty());
        log.clear().unwrap();
    }
}
