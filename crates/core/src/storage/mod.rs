//! Pluggable persistence backends
//!
//! A backend moves opaque payload text in and out of a per-user slot; it
//! never interprets the JSON. The file backend is the durable default, the
//! memory backend backs tests and embedders that persist elsewhere.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::{Error, Result};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Payload transport for one persistence slot per user.
pub trait StateStore: Send + Sync {
    /// Read the stored payload, `None` when the slot has never been written.
    fn load(&self, user_id: &str) -> Result<Option<String>>;

    /// Replace the slot contents atomically.
    fn save(&self, user_id: &str, payload: &str) -> Result<()>;

    /// Human-readable description of where the data lives.
    fn location_hint(&self) -> String;
}

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    File,
    Memory,
}

impl StorageMode {
    /// Lenient parse of configuration strings. Unknown values fall back to
    /// the durable file backend so a typo never silently drops persistence.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "filesystem" | "file" | "local" => StorageMode::File,
            "memory" | "ephemeral" => StorageMode::Memory,
            other => {
                tracing::warn!(mode = %other, "Unknown storage mode, using file backend");
                StorageMode::File
            }
        }
    }
}

/// Backend selection plus the file backend's directory override.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub mode: Option<StorageMode>,
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn file_in(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: Some(StorageMode::File),
            data_dir: Some(data_dir.into()),
        }
    }

    pub fn memory() -> Self {
        Self {
            mode: Some(StorageMode::Memory),
            data_dir: None,
        }
    }
}

/// Platform data directory used when no override is configured.
pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("dev", "rollcall", "rollcall").ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine data directory",
        ))
    })?;
    Ok(dirs.data_dir().join("users"))
}

/// Open the backend described by the config.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn StateStore>> {
    match config.mode.unwrap_or(StorageMode::File) {
        StorageMode::File => {
            let dir = match &config.data_dir {
                Some(dir) => dir.clone(),
                None => default_data_dir()?,
            };
            Ok(Box::new(FileStore::new(dir)?))
        }
        StorageMode::Memory => Ok(Box::new(MemoryStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(StorageMode::parse("filesystem"), StorageMode::File);
        assert_eq!(StorageMode::parse(" File "), StorageMode::File);
        assert_eq!(StorageMode::parse("local"), StorageMode::File);
        assert_eq!(StorageMode::parse("memory"), StorageMode::Memory);
        assert_eq!(StorageMode::parse("ephemeral"), StorageMode::Memory);
        // a misspelled mode must never lose persistence
        assert_eq!(StorageMode::parse("fileystem"), StorageMode::File);
        assert_eq!(StorageMode::parse(""), StorageMode::File);
    }

    #[test]
    fn test_open_store_respects_mode() {
        let store = open_store(&StorageConfig::memory()).unwrap();
        assert_eq!(store.location_hint(), "memory");

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&StorageConfig::file_in(dir.path())).unwrap();
        assert!(store.location_hint().contains(dir.path().to_str().unwrap()));
    }
}
