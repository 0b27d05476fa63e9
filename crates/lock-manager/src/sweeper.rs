//! Background task that evicts expired locks on a fixed interval.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::manager::LockManager;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a running expiry sweeper.
///
/// The sweeper runs until [`ExpirySweeper::shutdown`] is called or the
/// handle is dropped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Spawns a sweeper for `manager` on the current tokio runtime.
    pub fn spawn(manager: LockManager, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(?interval, "lock expiry sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = manager.sweep_expired();
                        if stats.expired > 0 || stats.purged_waiters > 0 || stats.failed_keys > 0 {
                            tracing::debug!(
                                keys = stats.keys_visited,
                                expired = stats.expired,
                                handed_off = stats.handed_off,
                                purged_waiters = stats.purged_waiters,
                                failed_keys = stats.failed_keys,
                                "expiry sweep finished"
                            );
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("lock expiry sweeper stopped");
        });

        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Stops the sweeper and waits for the task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "lock expiry sweeper task failed");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
