//! Storage backend abstraction: the uniform contract every route item's
//! backing store honors, plus the concrete backends shipped with the
//! crate.
//!
//! A backend's capability set is `get`/`set`/`del`/`close`, expressed here
//! as a trait object rather than four raw function pointers. Any method
//! may be left at its default (`NotSupported`) — a backend is free to
//! implement only the subset of operations that make sense for it.

pub mod file;
pub mod nested_unix;
pub mod null;

use std::time::Duration;

use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("operation not supported")]
    NotSupported,
    #[error("not found")]
    NotFound,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound,
            _ => StorageError::Io(err.to_string()),
        }
    }
}

/// A backing store for properties, named by the route item that owns it.
///
/// Implementations must never block forever; a backend that talks to
/// another process or device should apply its own timeout. Concurrent
/// calls touching different keys must be safe — per-key serialization,
/// where it is needed at all, is the caller's (the node's) job via the
/// named-mutex namespace, not the backend's.
pub trait Storage: Send + Sync {
    /// Fetch `key`. Returns the value and its remaining duration (`∞`
    /// for inherently static sources).
    fn get(&self, _key: &str) -> Result<(Value, Duration), StorageError> {
        Err(StorageError::NotSupported)
    }

    /// Store `value` for `key` with the given duration hint.
    fn set(&self, _key: &str, _value: &Value, _duration: Duration) -> Result<(), StorageError> {
        Err(StorageError::NotSupported)
    }

    /// Remove `key`.
    fn del(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Mute;
    impl Storage for Mute {}

    #[test]
    fn default_methods_report_not_supported() {
        let s = Mute;
        assert!(matches!(s.get("x"), Err(StorageError::NotSupported)));
        assert!(matches!(
            s.set("x", &Value::Undef, Duration::ZERO),
            Err(StorageError::NotSupported)
        ));
        assert!(matches!(s.del("x"), Err(StorageError::NotSupported)));
    }
}
