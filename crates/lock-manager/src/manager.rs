//! The lock manager service.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use common::{LockId, SharedClock, SystemClock, deadline_after};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{LockError, Result};
use crate::lock::{AcquireRequest, LockGrant, LockStatus};
use crate::queue::Waiter;
use crate::table::{HandOff, LockTable, SharedSlot};

/// Default ceiling on a single lock's TTL.
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(3600);

/// Counters from one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Keys inspected.
    pub keys_visited: usize,
    /// Locks evicted because their TTL ran out.
    pub expired: usize,
    /// Expired locks whose key went straight to a waiter.
    pub handed_off: usize,
    /// Waiters dropped because they had timed out or gone away.
    pub purged_waiters: usize,
    /// Keys that could not be processed this cycle.
    pub failed_keys: usize,
}

struct Inner {
    table: LockTable,
    clock: SharedClock,
    max_ttl: Duration,
    /// Key whose sweep is forced to fail.
    #[cfg(test)]
    sweep_fault: parking_lot::Mutex<Option<String>>,
}

/// Grants fenced, TTL-bounded locks with per-key FIFO waiting.
///
/// Cheap to clone; all clones share the same lock table.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("keys", &self.inner.table.len())
            .field("max_ttl", &self.inner.max_ttl)
            .finish()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(SystemClock::shared())
    }
}

impl LockManager {
    /// Creates a lock manager measuring time with `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Self::with_max_ttl(clock, DEFAULT_MAX_TTL)
    }

    /// Creates a lock manager with a custom TTL ceiling.
    pub fn with_max_ttl(clock: SharedClock, max_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: LockTable::new(Arc::clone(&clock)),
                clock,
                max_ttl,
                #[cfg(test)]
                sweep_fault: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Acquires the lock for `request.key`.
    ///
    /// Without a wait timeout this fails with [`LockError::LockHeld`] as soon
    /// as a live holder is found. With one, the caller is queued and parked
    /// until the key is handed to it or the deadline passes.
    #[tracing::instrument(skip(self, request), fields(key = %request.key, owner = %request.owner))]
    pub async fn acquire(&self, request: AcquireRequest) -> Result<LockGrant> {
        self.validate_ttl(request.ttl)?;

        let AcquireRequest {
            key,
            owner,
            ttl,
            metadata,
            wait_timeout,
        } = request;

        let now = self.inner.clock.now();
        let slot = self.inner.table.slot(&key);

        let (ticket, wait_timeout) = {
            let mut guard = slot.lock();
            if let Some((evicted, hand_off)) = guard.evict_expired(&key, now, &self.inner.table.issuer)
            {
                record_expiry(&key, evicted.lock_id, &hand_off);
            }

            if guard.live_holder(now).is_none() {
                let grant = guard.grant(&key, owner, ttl, metadata, now, &self.inner.table.issuer);
                metrics::counter!("locks_acquired_total").increment(1);
                tracing::debug!(lock_id = %grant.lock_id, "lock acquired");
                return Ok(grant);
            }

            let Some(wait_timeout) = wait_timeout else {
                metrics::counter!("lock_contention_total").increment(1);
                return Err(LockError::LockHeld { key });
            };

            let waiter_id = self.inner.table.next_waiter_id();
            let (waiter, grant_rx) =
                Waiter::new(waiter_id, owner, ttl, metadata, deadline_after(now, wait_timeout));
            guard.enqueue(waiter);
            tracing::debug!(waiter_id, queued = guard.queue_len(), "waiting for lock");

            let ticket = WaitTicket {
                manager: self.clone(),
                key,
                slot: Arc::clone(&slot),
                waiter_id,
                grant_rx,
                settled: false,
            };
            (ticket, wait_timeout)
        };
        drop(slot);

        self.wait(ticket, now, wait_timeout).await
    }

    async fn wait(
        &self,
        mut ticket: WaitTicket,
        started: Instant,
        wait_timeout: Duration,
    ) -> Result<LockGrant> {
        let deadline = deadline_after(started, wait_timeout);

        let outcome = tokio::select! {
            biased;
            grant = &mut ticket.grant_rx => grant.ok(),
            () = self.inner.clock.sleep_until(deadline) => None,
        };

        let grant = match outcome {
            Some(grant) => {
                ticket.settled = true;
                Some(grant)
            }
            // Deadline hit, or the waiter was discarded by a hand-off that saw it as expired.
            None => ticket.withdraw(),
        };

        let waited = self.inner.clock.now().saturating_duration_since(started);
        metrics::histogram!("lock_wait_seconds").record(waited.as_secs_f64());

        match grant {
            Some(grant) => {
                metrics::counter!("locks_acquired_total").increment(1);
                tracing::debug!(lock_id = %grant.lock_id, ?waited, "lock handed over");
                Ok(grant)
            }
            None => {
                metrics::counter!("lock_wait_timeouts_total").increment(1);
                tracing::info!(?waited, "gave up waiting for lock");
                let key = ticket.key.clone();
                drop(ticket);
                self.inner.table.prune(&key);
                Err(LockError::WaitTimeout {
                    key,
                    waited: wait_timeout,
                })
            }
        }
    }

    /// Releases the lock on `key` held under `lock_id` by `owner`.
    ///
    /// The key then goes to the head of its wait queue, if anyone is waiting.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, key: &str, lock_id: LockId, owner: &str) -> Result<()> {
        let now = self.inner.clock.now();
        let Some(slot) = self.inner.table.existing(key) else {
            return Err(LockError::LockNotFound {
                key: key.to_string(),
            });
        };

        {
            let mut guard = slot.lock();
            if let Some((evicted, hand_off)) = guard.evict_expired(key, now, &self.inner.table.issuer) {
                record_expiry(key, evicted.lock_id, &hand_off);
            }

            match guard.live_holder(now) {
                None => {
                    return Err(LockError::LockNotFound {
                        key: key.to_string(),
                    });
                }
                Some(holder) if holder.lock_id != lock_id || holder.owner != owner => {
                    tracing::warn!(
                        presented = %lock_id,
                        holder = %holder.lock_id,
                        "release rejected: not owner"
                    );
                    return Err(LockError::NotOwner {
                        key: key.to_string(),
                    });
                }
                Some(_) => {}
            }

            guard.take_holder();
            let hand_off = guard.hand_off(key, now, &self.inner.table.issuer);
            if let Some((next_id, next_owner)) = &hand_off.granted {
                tracing::debug!(%next_id, %next_owner, "lock handed to waiter");
            }
        }

        metrics::counter!("locks_released_total").increment(1);
        tracing::debug!("lock released");
        drop(slot);
        self.inner.table.prune(key);
        Ok(())
    }

    /// Reports the live holder of `key`, if any. Never mutates the table.
    pub fn status(&self, key: &str) -> LockStatus {
        let now = self.inner.clock.now();
        let (holder, waiters) = match self.inner.table.existing(key) {
            Some(slot) => {
                let guard = slot.lock();
                (guard.live_holder(now).map(|h| h.info(now)), guard.queue_len())
            }
            None => (None, 0),
        };
        LockStatus {
            key: key.to_string(),
            holder,
            waiters,
        }
    }

    /// Number of callers queued on `key`.
    pub fn queue_len(&self, key: &str) -> usize {
        self.inner
            .table
            .existing(key)
            .map(|slot| slot.lock().queue_len())
            .unwrap_or(0)
    }

    /// Evicts every expired lock and hands each freed key to its next waiter.
    ///
    /// A failure while processing one key is logged and counted; the
    /// remaining keys are still processed.
    pub fn sweep_expired(&self) -> SweepStats {
        let now = self.inner.clock.now();
        let mut stats = SweepStats::default();

        for (key, slot) in self.inner.table.snapshot() {
            stats.keys_visited += 1;
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.sweep_slot(&key, &slot, now)
            }));
            match outcome {
                Ok((expired, handed_off, purged)) => {
                    stats.expired += usize::from(expired);
                    stats.handed_off += usize::from(handed_off);
                    stats.purged_waiters += purged;
                }
                Err(_) => {
                    stats.failed_keys += 1;
                    tracing::error!(%key, "expiry sweep failed for key");
                }
            }
            drop(slot);
            self.inner.table.prune(&key);
        }

        metrics::gauge!("locks_tracked_keys").set(self.inner.table.len() as f64);
        stats
    }

    fn sweep_slot(&self, key: &str, slot: &SharedSlot, now: Instant) -> (bool, bool, usize) {
        self.check_sweep_fault(key);
        let mut guard = slot.lock();
        let mut purged = 0;
        let (expired, handed_off) = match guard.evict_expired(key, now, &self.inner.table.issuer) {
            Some((evicted, hand_off)) => {
                record_expiry(key, evicted.lock_id, &hand_off);
                purged += hand_off.skipped;
                (true, hand_off.granted.is_some())
            }
            None => (false, false),
        };
        purged += guard.purge_abandoned(now);
        (expired, handed_off, purged)
    }

    #[cfg(test)]
    fn check_sweep_fault(&self, key: &str) {
        if self.inner.sweep_fault.lock().as_deref() == Some(key) {
            panic!("sweep fault injected for {key}");
        }
    }

    #[cfg(not(test))]
    fn check_sweep_fault(&self, _key: &str) {}

    fn validate_ttl(&self, ttl: Duration) -> Result<()> {
        if ttl.is_zero() || ttl > self.inner.max_ttl {
            return Err(LockError::InvalidTtl {
                ttl,
                max: self.inner.max_ttl,
            });
        }
        Ok(())
    }
}

fn record_expiry(key: &str, lock_id: LockId, hand_off: &HandOff) {
    metrics::counter!("locks_expired_total").increment(1);
    match &hand_off.granted {
        Some((next_id, next_owner)) => {
            tracing::info!(%key, %lock_id, %next_id, %next_owner, "lock expired, handed to waiter");
        }
        None => tracing::info!(%key, %lock_id, "lock expired"),
    }
}

/// A queued acquirer's claim on a slot.
///
/// Dropping an unsettled ticket (for example when the caller's future is
/// cancelled) removes the waiter, and if a grant already reached it, releases
/// that lock again so the key moves on to the next waiter.
struct WaitTicket {
    manager: LockManager,
    key: String,
    slot: SharedSlot,
    waiter_id: u64,
    grant_rx: oneshot::Receiver<LockGrant>,
    settled: bool,
}

impl WaitTicket {
    /// Leaves the queue. Returns a grant that raced in before the withdrawal.
    fn withdraw(&mut self) -> Option<LockGrant> {
        self.settled = true;
        let mut guard = self.slot.lock();
        if guard.withdraw(self.waiter_id) {
            return None;
        }
        self.grant_rx.try_recv().ok()
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;

        let inner = &self.manager.inner;
        let mut guard = self.slot.lock();
        if guard.withdraw(self.waiter_id) {
            return;
        }
        if let Ok(grant) = self.grant_rx.try_recv() {
            let now = inner.clock.now();
            if guard.take_if(grant.lock_id).is_some() {
                tracing::debug!(key = %self.key, lock_id = %grant.lock_id, "waiter cancelled after hand-off, releasing");
                guard.hand_off(&self.key, now, &inner.table.issuer);
            }
        }
    }
}
