//! Shared primitives for the coordination kernel.
//!
//! Provides the injectable [`Clock`], typed identifiers for sagas and lock
//! fencing tokens, and the retry/timeout helpers used by the saga executor.

pub mod clock;
pub mod retry;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, deadline_after};
pub use retry::{BackoffStrategy, Elapsed, RetryPolicy, run_with_timeout};
pub use types::{LockId, SagaId};
