//! The `nested-unix` backend: forwards `get`/`set`/`del` to another
//! node's I/O socket, so nodes can compose into a tree.
//!
//! In *temporary* mode each call opens and closes its own connection
//! ([`PropClient::new`]). In *long* mode a single connection is kept open
//! and reused across calls ([`PropClient::new_shared`]), avoiding a
//! connect/accept round trip on every call at the cost of needing to
//! reconnect on the next call after any I/O error.

use std::path::PathBuf;
use std::time::Duration;

use super::{Storage, StorageError};
use crate::client::PropClient;
use crate::error::PropError;
use crate::value::Value;

fn to_storage_error(err: PropError) -> StorageError {
    match err {
        PropError::NotFound => StorageError::NotFound,
        PropError::NotSupported => StorageError::NotSupported,
        PropError::Io(msg) => StorageError::Io(msg),
        other => StorageError::OperationFailed(other.to_string()),
    }
}

pub struct NestedUnixStorage {
    client: PropClient,
}

impl NestedUnixStorage {
    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        NestedUnixStorage {
            client: PropClient::new(path),
        }
    }

    pub fn shared(path: impl Into<PathBuf>) -> Self {
        NestedUnixStorage {
            client: PropClient::new_shared(path),
        }
    }
}

impl Storage for NestedUnixStorage {
    fn get(&self, key: &str) -> Result<(Value, Duration), StorageError> {
        self.client.get(key).map_err(to_storage_error)
    }

    fn set(&self, key: &str, value: &Value, duration: Duration) -> Result<(), StorageError> {
        self.client.set(key, value, duration).map_err(to_storage_error)
    }

    fn del(&self, key: &str) -> Result<(), StorageError> {
        self.client.del(key).map_err(to_storage_error)
    }
}
