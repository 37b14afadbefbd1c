//! The `null` backend: `set`/`del` succeed without effect, `get` stays
//! unimplemented. Useful for write-discard routes and for tests that
//! only care about route matching.

use std::time::Duration;

use super::{Storage, StorageError};
use crate::value::Value;

#[derive(Debug, Default)]
pub struct NullStorage;

impl Storage for NullStorage {
    fn set(&self, _key: &str, _value: &Value, _duration: Duration) -> Result<(), StorageError> {
        Ok(())
    }

    fn del(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_del_are_no_ops() {
        let s = NullStorage;
        assert!(s.set("x", &Value::U32(1), Duration::ZERO).is_ok());
        assert!(s.del("x").is_ok());
    }

    #[test]
    fn get_is_not_supported() {
        let s = NullStorage;
        assert!(matches!(s.get("x"), Err(StorageError::NotSupported)));
    }
}
