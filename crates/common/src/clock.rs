//! Monotonic time sources.
//!
//! Every TTL, wait deadline and step timeout in the kernel is measured
//! against a [`Clock`]. Production code uses [`SystemClock`]; tests that need
//! to step time by hand use [`ManualClock`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

/// A monotonic time source that can also park a task until a deadline.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Wall-clock time corresponding to `instant` on this clock's timeline.
    fn utc_at(&self, instant: Instant) -> DateTime<Utc>;

    /// Suspends the calling task until `deadline` has been reached.
    async fn sleep_until(&self, deadline: Instant);

    /// Suspends the calling task for `duration`.
    async fn sleep(&self, duration: Duration) {
        let deadline = deadline_after(self.now(), duration);
        self.sleep_until(deadline).await;
    }
}

/// Roughly thirty years; far enough to never fire, near enough to be representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + duration`, saturating at a far-future instant instead of overflowing.
pub fn deadline_after(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Maps `instant` onto the wall clock, given that `base` corresponds to `base_utc`.
fn shift_utc(base_utc: DateTime<Utc>, base: Instant, instant: Instant) -> DateTime<Utc> {
    let shifted = if instant >= base {
        chrono::Duration::from_std(instant - base)
            .ok()
            .and_then(|ahead| base_utc.checked_add_signed(ahead))
    } else {
        chrono::Duration::from_std(base - instant)
            .ok()
            .and_then(|behind| base_utc.checked_sub_signed(behind))
    };
    shifted.unwrap_or(if instant >= base {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

/// Shared, dynamically dispatched clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Returns a shared handle to the system clock.
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_at(&self, instant: Instant) -> DateTime<Utc> {
        shift_utc(Utc::now(), Instant::now(), instant)
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Clock that only moves when [`ManualClock::advance`] is called.
///
/// Sleepers are woken as soon as an advance carries the clock past their
/// deadline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    origin_utc: DateTime<Utc>,
    offset: Arc<watch::Sender<Duration>>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        let (offset, _) = watch::channel(Duration::ZERO);
        Self {
            origin: Instant::now(),
            origin_utc: Utc::now(),
            offset: Arc::new(offset),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.offset.send_modify(|offset| *offset = offset.saturating_add(by));
    }

    /// Total time the clock has been advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.borrow()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        deadline_after(self.origin, *self.offset.borrow())
    }

    fn utc_at(&self, instant: Instant) -> DateTime<Utc> {
        shift_utc(self.origin_utc, self.origin, instant)
    }

    async fn sleep_until(&self, deadline: Instant) {
        let mut offset = self.offset.subscribe();
        loop {
            if deadline_after(self.origin, *offset.borrow_and_update()) >= deadline {
                return;
            }
            if offset.changed().await.is_err() {
                // Sender is owned by self, so this is unreachable while we are borrowed.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_on_advance() {
        let clock = ManualClock::new();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), start + Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn clones_share_the_same_timeline() {
        let clock = ManualClock::new();
        let other = clock.clone();
        other.advance(Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn deadline_after_saturates_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_secs(5)),
            now + Duration::from_secs(5)
        );
        assert!(deadline_after(now, Duration::MAX) > now + Duration::from_secs(86_400 * 365));
    }

    #[test]
    fn manual_wall_time_follows_advances() {
        let clock = ManualClock::new();
        let start = clock.utc_at(clock.now());
        clock.advance(Duration::from_secs(90));
        assert_eq!(
            clock.utc_at(clock.now()) - start,
            chrono::Duration::seconds(90)
        );
        let earlier = clock.utc_at(clock.now() - Duration::from_secs(30));
        assert_eq!(earlier - start, chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn manual_sleep_wakes_after_advance() {
        let clock = ManualClock::new();
        let deadline = clock.now() + Duration::from_secs(10);

        let sleeper = {
            let clock = clock.clone();
            tokio::spawn(async move { clock.sleep_until(deadline).await })
        };

        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::from_secs(4));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::from_secs(6));
        sleeper.await.unwrap();
    }

    #[tokio::test]
    async fn manual_sleep_for_past_deadline_returns_immediately() {
        let clock = ManualClock::new();
        let deadline = clock.now();
        clock.advance(Duration::from_secs(1));
        clock.sleep_until(deadline).await;
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_sleep_uses_tokio_time() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(3)).await;
        assert!(clock.now() - start >= Duration::from_secs(3));
    }
}
