//! Crate-wide error type and the small positive error codes it maps to on
//! the wire.
//!
//! Every subsystem (value codec, storage, route table, worker pool, cache)
//! has its own error enum; each converts into [`PropError`] so that callers
//! at the protocol boundary only ever deal with one type and one
//! [`PropError::code`] mapping.

use thiserror::Error;

use crate::cache::CacheError;
use crate::nmutex::NamedMutexError;
use crate::pool::PoolError;
use crate::route::RouteError;
use crate::storage::StorageError;
use crate::value::ValueError;

/// Errors surfaced to clients through the trailing `result_code` of either
/// protocol, or returned directly by library calls.
#[derive(Error, Debug)]
pub enum PropError {
    /// The backend does not implement the requested operation.
    #[error("operation not supported")]
    NotSupported,

    /// No cache entry, no route match, or no such named item.
    #[error("not found")]
    NotFound,

    /// A route item (or similar) with this name already exists.
    #[error("already exists")]
    Exists,

    /// The item is still referenced and cannot be removed yet.
    #[error("busy")]
    Busy,

    /// Allocation failure.
    #[error("no memory")]
    NoMemory,

    /// Short read/write, or any other I/O failure on a socket or file.
    #[error("I/O error: {0}")]
    Io(String),

    /// Malformed frame or argument.
    #[error("invalid argument or frame")]
    Invalid,

    /// Backend-specific failure not covered by the above.
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl PropError {
    /// The positive error code sent on the wire. `0` is reserved for
    /// success and is never produced here.
    pub fn code(&self) -> i32 {
        match self {
            PropError::NotSupported => 1,
            PropError::NotFound => 2,
            PropError::Exists => 3,
            PropError::Busy => 4,
            PropError::NoMemory => 5,
            PropError::Io(_) => 6,
            PropError::Invalid => 7,
            PropError::OperationFailed(_) => 8,
        }
    }

    /// Reconstruct a [`PropError`] from a wire result code. Used by the
    /// client library to turn a reply's `result_code` back into an error
    /// when it is non-zero.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => PropError::NotSupported,
            2 => PropError::NotFound,
            3 => PropError::Exists,
            4 => PropError::Busy,
            5 => PropError::NoMemory,
            6 => PropError::Io("remote I/O error".to_string()),
            7 => PropError::Invalid,
            _ => PropError::OperationFailed(format!("remote error code {code}")),
        }
    }
}

impl From<std::io::Error> for PropError {
    fn from(err: std::io::Error) -> Self {
        PropError::Io(err.to_string())
    }
}

impl From<ValueError> for PropError {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::Invalid(_) => PropError::Invalid,
        }
    }
}

impl From<StorageError> for PropError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotSupported => PropError::NotSupported,
            StorageError::NotFound => PropError::NotFound,
            StorageError::Io(msg) => PropError::Io(msg),
            StorageError::OperationFailed(msg) => PropError::OperationFailed(msg),
        }
    }
}

impl From<RouteError> for PropError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NotFound => PropError::NotFound,
            RouteError::Exists => PropError::Exists,
            RouteError::Busy => PropError::Busy,
        }
    }
}

impl From<CacheError> for PropError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound => PropError::NotFound,
        }
    }
}

impl From<NamedMutexError> for PropError {
    fn from(_err: NamedMutexError) -> Self {
        PropError::OperationFailed("named mutex namespace poisoned".to_string())
    }
}

impl From<PoolError> for PropError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::ShuttingDown => PropError::OperationFailed("worker pool shutting down".to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type PropResult<T> = Result<T, PropError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrips_through_from_code() {
        for err in [
            PropError::NotSupported,
            PropError::NotFound,
            PropError::Exists,
            PropError::Busy,
            PropError::NoMemory,
            PropError::Invalid,
        ] {
            let code = err.code();
            let rebuilt = PropError::from_code(code);
            assert_eq!(rebuilt.code(), code);
        }
    }

    #[test]
    fn success_code_is_never_produced() {
        for err in [
            PropError::NotSupported,
            PropError::NotFound,
            PropError::Exists,
            PropError::Busy,
            PropError::NoMemory,
            PropError::Io("x".into()),
            PropError::Invalid,
            PropError::OperationFailed("x".into()),
        ] {
            assert_ne!(err.code(), 0);
        }
    }
}
