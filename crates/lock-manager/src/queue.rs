//! Per-key FIFO queue of callers waiting for a held lock.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::lock::LockGrant;

/// A parked acquirer.
///
/// The waiting task holds the receiving half of `grant_tx`; handing the lock
/// over is a single send on that channel.
#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) id: u64,
    pub(crate) owner: String,
    pub(crate) ttl: Duration,
    pub(crate) metadata: Option<String>,
    pub(crate) deadline: Instant,
    grant_tx: oneshot::Sender<LockGrant>,
}

impl Waiter {
    pub(crate) fn new(
        id: u64,
        owner: String,
        ttl: Duration,
        metadata: Option<String>,
        deadline: Instant,
    ) -> (Self, oneshot::Receiver<LockGrant>) {
        let (grant_tx, grant_rx) = oneshot::channel();
        let waiter = Self {
            id,
            owner,
            ttl,
            metadata,
            deadline,
            grant_tx,
        };
        (waiter, grant_rx)
    }

    /// A waiter is abandoned once its deadline passed or its task went away.
    pub(crate) fn is_abandoned(&self, now: Instant) -> bool {
        self.deadline <= now || self.grant_tx.is_closed()
    }

    /// Delivers the grant. Gives it back if the waiting task is gone.
    pub(crate) fn notify(self, grant: LockGrant) -> Result<(), LockGrant> {
        self.grant_tx.send(grant)
    }
}

#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    waiters: VecDeque<Waiter>,
}

impl WaitQueue {
    pub(crate) fn push_back(&mut self, waiter: Waiter) {
        self.waiters.push_back(waiter);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Waiter> {
        self.waiters.pop_front()
    }

    /// Removes the waiter with `id`. Returns false if it was already dequeued.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drops every abandoned waiter, preserving the order of the rest.
    pub(crate) fn purge_abandoned(&mut self, now: Instant) -> usize {
        let before = self.waiters.len();
        self.waiters.retain(|w| !w.is_abandoned(now));
        before - self.waiters.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
