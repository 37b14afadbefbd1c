//! The `file` backend: each value is persisted as a single file named by
//! its key inside a root directory, with the file's content being
//! exactly the value's wire form (`[tag][len][payload]`). Durations are
//! not persisted — a value read back from disk is treated as static
//! (`∞` remaining) until the next `set` or `del`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use super::{Storage, StorageError};
use crate::cache::DURATION_INF;
use crate::value::Value;

pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStorage { root: root.into() }
    }

    /// Keys become file names directly under `root`; reject anything
    /// that could escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains('/') || key.contains('\0') || key == "." || key == ".." {
            return Err(StorageError::OperationFailed(format!("invalid key for file backend: {key}")));
        }
        Ok(self.root.join(key))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<(Value, Duration), StorageError> {
        let path = self.path_for(key)?;
        let bytes = fs::read(&path)?;
        let value = Value::decode(&bytes)
            .map_err(|e| StorageError::OperationFailed(format!("corrupt file value: {e}")))?;
        Ok((value, DURATION_INF))
    }

    fn set(&self, key: &str, value: &Value, _duration: Duration) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, value.encode())?;
        Ok(())
    }

    fn del(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::remove_file(&path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.set("x", &Value::U32(42), Duration::ZERO).unwrap();
        let (value, duration) = storage.get("x").unwrap();
        assert_eq!(value, Value::U32(42));
        assert_eq!(duration, DURATION_INF);
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(matches!(storage.get("missing"), Err(StorageError::NotFound)));
    }

    #[test]
    fn del_removes_file() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.set("x", &Value::U32(1), Duration::ZERO).unwrap();
        storage.del("x").unwrap();
        assert!(matches!(storage.get("x"), Err(StorageError::NotFound)));
    }

    #[test]
    fn keys_with_path_separators_are_rejected() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(storage.set("../escape", &Value::U32(1), Duration::ZERO).is_err());
        assert!(storage.set("a/b", &Value::U32(1), Duration::ZERO).is_err());
    }
}
