//! Lock manager error types.

use std::time::Duration;

use thiserror::Error;

/// Errors reported synchronously to lock callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The key is held by a live lock and the caller did not ask to wait.
    #[error("Lock '{key}' is already held")]
    LockHeld { key: String },

    /// No live lock exists for the key.
    #[error("Lock '{key}' not found")]
    LockNotFound { key: String },

    /// The presented fencing token or owner does not match the live lock.
    #[error("Lock '{key}' is not owned by the requester")]
    NotOwner { key: String },

    /// The caller's wait deadline passed before the lock was handed over.
    #[error("Timed out after {waited:?} waiting for lock '{key}'")]
    WaitTimeout { key: String, waited: Duration },

    /// Requested TTL is zero or above the configured ceiling.
    #[error("Invalid TTL {ttl:?} (must be between 1ms and {max:?})")]
    InvalidTtl { ttl: Duration, max: Duration },
}

impl LockError {
    /// Short, stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LockError::LockHeld { .. } => "LockHeld",
            LockError::LockNotFound { .. } => "LockNotFound",
            LockError::NotOwner { .. } => "NotOwner",
            LockError::WaitTimeout { .. } => "WaitTimeout",
            LockError::InvalidTtl { .. } => "InvalidTtl",
        }
    }
}

/// Convenience type alias for lock results.
pub type Result<T> = std::result::Result<T, LockError>;
