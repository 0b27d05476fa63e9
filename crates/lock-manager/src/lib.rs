//! Fenced mutual-exclusion locks for the coordination kernel.
//!
//! A [`LockManager`] owns a sharded table of keys. Each key has at most one
//! live holder, identified by a strictly increasing fencing token
//! ([`common::LockId`]), plus a FIFO queue of callers willing to wait.
//!
//! Locks are released explicitly or expire after their TTL. Either way the
//! key is handed straight to the oldest waiter that is still interested.
//! The [`ExpirySweeper`] performs TTL eviction in the background so waiters
//! are never starved by a holder that went away.

pub mod error;
pub mod lock;
pub mod manager;
mod queue;
pub mod sweeper;
mod table;

pub use error::LockError;
pub use lock::{AcquireRequest, LockGrant, LockInfo, LockStatus};
pub use manager::{DEFAULT_MAX_TTL, LockManager, SweepStats};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, ExpirySweeper};
