//! Lock records, grants and request types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{LockId, deadline_after};
use serde::Serialize;
use tokio::time::Instant;

/// Parameters of an acquire call.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    /// Resource being protected.
    pub key: String,
    /// Caller identity, opaque to the manager.
    pub owner: String,
    /// Lifetime of the lock once granted.
    pub ttl: Duration,
    /// Opaque caller data stored alongside the lock.
    pub metadata: Option<String>,
    /// If set, queue behind the current holder for at most this long.
    pub wait_timeout: Option<Duration>,
}

impl AcquireRequest {
    /// Creates a non-waiting acquire request.
    pub fn new(key: impl Into<String>, owner: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            ttl,
            metadata: None,
            wait_timeout: None,
        }
    }

    /// Attaches opaque metadata.
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Waits up to `timeout` if the key is currently held.
    pub fn wait_up_to(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

/// Result of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// Fencing token that must be presented on release.
    pub lock_id: LockId,
    /// Key the lock protects.
    pub key: String,
    /// Monotonic expiry instant.
    pub expires_at: Instant,
    /// Wall-clock expiry, for display.
    pub expires_at_utc: DateTime<Utc>,
}

/// A held lock as stored in the table.
#[derive(Debug, Clone)]
pub(crate) struct LockRecord {
    pub(crate) lock_id: LockId,
    pub(crate) key: String,
    pub(crate) owner: String,
    pub(crate) metadata: Option<String>,
    pub(crate) acquired_at: DateTime<Utc>,
    pub(crate) ttl: Duration,
    pub(crate) expires_at: Instant,
}

impl LockRecord {
    pub(crate) fn new(
        lock_id: LockId,
        key: &str,
        owner: String,
        ttl: Duration,
        metadata: Option<String>,
        now: Instant,
        acquired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            lock_id,
            key: key.to_string(),
            owner,
            metadata,
            acquired_at,
            ttl,
            expires_at: deadline_after(now, ttl),
        }
    }

    /// Live means not yet expired at `now`.
    pub(crate) fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }

    pub(crate) fn expires_at_utc(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.acquired_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub(crate) fn grant(&self) -> LockGrant {
        LockGrant {
            lock_id: self.lock_id,
            key: self.key.clone(),
            expires_at: self.expires_at,
            expires_at_utc: self.expires_at_utc(),
        }
    }

    pub(crate) fn info(&self, now: Instant) -> LockInfo {
        LockInfo {
            lock_id: self.lock_id,
            owner: self.owner.clone(),
            metadata: self.metadata.clone(),
            acquired_at: self.acquired_at,
            expires_at: self.expires_at_utc(),
            remaining_ttl: self.expires_at.saturating_duration_since(now),
        }
    }
}

/// Public view of a live lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub lock_id: LockId,
    pub owner: String,
    pub metadata: Option<String>,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_ttl: Duration,
}

/// Snapshot returned by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub key: String,
    /// The live holder, if any.
    pub holder: Option<LockInfo>,
    /// Number of callers currently queued for the key.
    pub waiters: usize,
}

impl LockStatus {
    /// Returns true if a live lock exists.
    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }

    /// Owner of the live lock.
    pub fn owner(&self) -> Option<&str> {
        self.holder.as_ref().map(|h| h.owner.as_str())
    }
}
