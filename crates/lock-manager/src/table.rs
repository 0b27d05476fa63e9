//! Keyed lock registry.
//!
//! Each key owns a [`KeySlot`] (current holder plus wait queue) behind its own
//! mutex. The outer map is sharded, so operations on different keys never
//! contend on a registry-wide lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{LockId, SharedClock};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::lock::{LockGrant, LockRecord};
use crate::queue::{WaitQueue, Waiter};

/// Strictly increasing source of fencing tokens.
#[derive(Debug, Default)]
pub(crate) struct TokenSequence(AtomicU64);

impl TokenSequence {
    pub(crate) fn next(&self) -> LockId {
        LockId::from_raw(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Mints lock records: a fresh fencing token plus wall-clock timestamps
/// read off the manager's clock.
#[derive(Debug)]
pub(crate) struct GrantIssuer {
    tokens: TokenSequence,
    clock: SharedClock,
}

impl GrantIssuer {
    pub(crate) fn new(clock: SharedClock) -> Self {
        Self {
            tokens: TokenSequence::default(),
            clock,
        }
    }

    fn utc_at(&self, instant: Instant) -> DateTime<Utc> {
        self.clock.utc_at(instant)
    }

    fn record(
        &self,
        key: &str,
        owner: String,
        ttl: Duration,
        metadata: Option<String>,
        now: Instant,
    ) -> LockRecord {
        LockRecord::new(self.tokens.next(), key, owner, ttl, metadata, now, self.utc_at(now))
    }
}

/// Outcome of handing a freed key to the wait queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct HandOff {
    /// Token and owner of the lock created for the woken waiter.
    pub(crate) granted: Option<(LockId, String)>,
    /// Waiters dropped because they had already given up.
    pub(crate) skipped: usize,
}

#[derive(Debug, Default)]
pub(crate) struct KeySlot {
    holder: Option<LockRecord>,
    queue: WaitQueue,
}

impl KeySlot {
    pub(crate) fn live_holder(&self, now: Instant) -> Option<&LockRecord> {
        self.holder.as_ref().filter(|h| h.is_live(now))
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.holder.is_none() && self.queue.is_empty()
    }

    /// Installs a new holder. The slot must be free.
    pub(crate) fn grant(
        &mut self,
        key: &str,
        owner: String,
        ttl: Duration,
        metadata: Option<String>,
        now: Instant,
        issuer: &GrantIssuer,
    ) -> LockGrant {
        debug_assert!(self.live_holder(now).is_none());
        let record = issuer.record(key, owner, ttl, metadata, now);
        let grant = record.grant();
        self.holder = Some(record);
        grant
    }

    pub(crate) fn enqueue(&mut self, waiter: Waiter) {
        self.queue.push_back(waiter);
    }

    pub(crate) fn withdraw(&mut self, waiter_id: u64) -> bool {
        self.queue.remove(waiter_id)
    }

    /// Removes the holder if it carries `lock_id`.
    pub(crate) fn take_if(&mut self, lock_id: LockId) -> Option<LockRecord> {
        if self.holder.as_ref().is_some_and(|h| h.lock_id == lock_id) {
            self.holder.take()
        } else {
            None
        }
    }

    pub(crate) fn take_holder(&mut self) -> Option<LockRecord> {
        self.holder.take()
    }

    /// Evicts the holder if its TTL has run out, then hands the key on.
    pub(crate) fn evict_expired(
        &mut self,
        key: &str,
        now: Instant,
        issuer: &GrantIssuer,
    ) -> Option<(LockRecord, HandOff)> {
        if self.holder.as_ref().is_some_and(|h| !h.is_live(now)) {
            let evicted = self.holder.take()?;
            let hand_off = self.hand_off(key, now, issuer);
            Some((evicted, hand_off))
        } else {
            None
        }
    }

    /// Gives a free key to the first waiter still interested in it.
    ///
    /// Abandoned waiters at the head are discarded. A grant that bounces
    /// because its receiver disappeared between the check and the send is
    /// rolled back before moving to the next waiter.
    pub(crate) fn hand_off(&mut self, key: &str, now: Instant, issuer: &GrantIssuer) -> HandOff {
        let mut outcome = HandOff::default();
        if self.holder.is_some() {
            return outcome;
        }
        while let Some(waiter) = self.queue.pop_front() {
            if waiter.is_abandoned(now) {
                outcome.skipped += 1;
                continue;
            }
            let record = issuer.record(
                key,
                waiter.owner.clone(),
                waiter.ttl,
                waiter.metadata.clone(),
                now,
            );
            let lock_id = record.lock_id;
            let owner = record.owner.clone();
            match waiter.notify(record.grant()) {
                Ok(()) => {
                    self.holder = Some(record);
                    outcome.granted = Some((lock_id, owner));
                    return outcome;
                }
                Err(_) => outcome.skipped += 1,
            }
        }
        outcome
    }

    pub(crate) fn purge_abandoned(&mut self, now: Instant) -> usize {
        self.queue.purge_abandoned(now)
    }
}

pub(crate) type SharedSlot = Arc<Mutex<KeySlot>>;

#[derive(Debug)]
pub(crate) struct LockTable {
    slots: DashMap<String, SharedSlot>,
    pub(crate) issuer: GrantIssuer,
    waiter_ids: AtomicU64,
}

impl LockTable {
    pub(crate) fn new(clock: SharedClock) -> Self {
        Self {
            slots: DashMap::new(),
            issuer: GrantIssuer::new(clock),
            waiter_ids: AtomicU64::new(0),
        }
    }

    /// Returns the slot for `key`, creating an empty one if needed.
    pub(crate) fn slot(&self, key: &str) -> SharedSlot {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(key.to_string()).or_default().value())
    }

    pub(crate) fn existing(&self, key: &str) -> Option<SharedSlot> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    pub(crate) fn next_waiter_id(&self) -> u64 {
        self.waiter_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Drops the slot for `key` if it is idle and nobody else holds a handle.
    ///
    /// The reference count is checked under the shard lock, which is also
    /// required to hand out new handles, so a concurrent caller can never
    /// end up mutating a detached slot.
    pub(crate) fn prune(&self, key: &str) -> bool {
        self.slots
            .remove_if(key, |_, slot| {
                Arc::strong_count(slot) == 1 && slot.lock().is_idle()
            })
            .is_some()
    }

    /// Point-in-time list of all slots.
    pub(crate) fn snapshot(&self) -> Vec<(String, SharedSlot)> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
