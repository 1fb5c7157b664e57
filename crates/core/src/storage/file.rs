//! Filesystem backend
//!
//! One JSON file per user under the configured data directory. Writes go
//! through a sibling temp file and a rename so a crash mid-write leaves the
//! previous payload intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ErrorCode, Result};
use crate::user_data::sanitize_user_id;

use super::StateStore;

/// Suffix of per-user data files; the version tag changes only when the
/// on-disk envelope becomes incompatible.
pub const DATAFILE_SUFFIX: &str = ".rollcall.v2.json";

pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    /// Path of a user's data file. The id must survive sanitation since it
    /// becomes part of the filename.
    pub fn resolve_path(&self, user_id: &str) -> Result<PathBuf> {
        let normalized = sanitize_user_id(user_id).ok_or(ErrorCode::IdRequired)?;
        Ok(self.data_dir.join(format!("{normalized}{DATAFILE_SUFFIX}")))
    }

    fn write_atomic(path: &Path, payload: &str) -> std::io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(payload.as_bytes())?;
        // best effort; rename still keeps the old payload on failure
        let _ = file.sync_all();
        drop(file);
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        Ok(())
    }
}

impl StateStore for FileStore {
    fn load(&self, user_id: &str) -> Result<Option<String>> {
        let path = self.resolve_path(user_id)?;
        match fs::read_to_string(&path) {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, user_id: &str, payload: &str) -> Result<()> {
        let path = self.resolve_path(user_id)?;
        fs::create_dir_all(&self.data_dir)?;
        Self::write_atomic(&path, payload)?;
        Ok(())
    }

    fn location_hint(&self) -> String {
        self.data_dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_load_missing_slot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert_eq!(store.load("nobody").unwrap(), None);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.save("alice", r#"{"version":2}"#).unwrap();
        assert_eq!(store.load("alice").unwrap().unwrap(), r#"{"version":2}"#);

        // overwrite replaces, not appends
        store.save("alice", r#"{"version":3}"#).unwrap();
        assert_eq!(store.load("alice").unwrap().unwrap(), r#"{"version":3}"#);
    }

    #[test]
    fn test_filename_uses_sanitized_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.save("Alice-01", "{}").unwrap();
        assert!(dir.path().join(format!("alice-01{DATAFILE_SUFFIX}")).exists());
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let err = store.save("../escape", "{}").unwrap_err();
        assert!(matches!(err, Error::Fault(ErrorCode::IdRequired)));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.save("bob", "{}").unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
