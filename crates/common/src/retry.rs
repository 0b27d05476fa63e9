//! Retry policies and clock-driven timeouts.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, deadline_after};

/// Upper bound applied to every computed backoff delay unless overridden.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Shape of the delay between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay grows by `initial_delay` per failed attempt.
    Linear,
    /// Delay doubles after every failed attempt.
    Exponential,
}

impl BackoffStrategy {
    /// Returns the strategy name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
        }
    }
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown backoff strategy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown backoff strategy: {0}")]
pub struct UnknownBackoffStrategy(pub String);

impl FromStr for BackoffStrategy {
    type Err = UnknownBackoffStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            other => Err(UnknownBackoffStrategy(other.to_string())),
        }
    }
}

/// How many times an operation may be attempted and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never zero.
    pub max_attempts: u32,
    /// Delay shape between attempts.
    pub backoff: BackoffStrategy,
    /// Base delay fed into the backoff shape.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that allows exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::Fixed,
            initial_delay: Duration::ZERO,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Builds a policy from a retry count (attempts after the first).
    pub fn with_retries(max_retries: u32, backoff: BackoffStrategy, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            backoff,
            initial_delay,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Overrides the delay cap.
    pub fn capped_at(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Returns true if another attempt may follow `attempts_made` failed attempts.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    /// Delay to wait after the `failed_attempt`-th failure (1-based).
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);
        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(n),
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(n - 1).unwrap_or(u32::MAX);
                self.initial_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// The future did not finish before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {timeout:?} elapsed")]
pub struct Elapsed {
    /// The timeout that was exceeded.
    pub timeout: Duration,
}

/// Runs `future` until it completes or `timeout` elapses on `clock`.
///
/// On timeout the future is dropped before this function returns.
pub async fn run_with_timeout<F, T>(
    clock: &dyn Clock,
    timeout: Duration,
    future: F,
) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    let deadline = deadline_after(clock.now(), timeout);
    tokio::select! {
        biased;
        output = future => Ok(output),
        () = clock.sleep_until(deadline) => Err(Elapsed { timeout }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    #[test]
    fn none_allows_single_attempt() {
        let policy = RetryPolicy::none();
        assert!(policy.allows_retry(0));
        assert!(!policy.allows_retry(1));
    }

    #[test]
    fn with_retries_counts_first_attempt() {
        let policy = RetryPolicy::with_retries(2, BackoffStrategy::Fixed, Duration::ZERO);
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy =
            RetryPolicy::with_retries(5, BackoffStrategy::Fixed, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(4), Duration::from_millis(100));
    }

    #[test]
    fn linear_backoff_grows_by_base() {
        let policy =
            RetryPolicy::with_retries(5, BackoffStrategy::Linear, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy =
            RetryPolicy::with_retries(10, BackoffStrategy::Exponential, Duration::from_millis(100))
                .capped_at(Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(40), Duration::from_secs(1));
    }

    #[test]
    fn parse_backoff_strategy() {
        assert_eq!(
            "Exponential".parse::<BackoffStrategy>().unwrap(),
            BackoffStrategy::Exponential
        );
        assert_eq!("linear".parse::<BackoffStrategy>().unwrap(), BackoffStrategy::Linear);
        assert!("random".parse::<BackoffStrategy>().is_err());
    }

    #[tokio::test]
    async fn timeout_returns_output_when_future_is_ready() {
        let clock = ManualClock::new();
        let result = run_with_timeout(&clock, Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn timeout_fires_when_manual_clock_passes_deadline() {
        let clock = ManualClock::new();
        let driver = clock.clone();

        let pending = tokio::spawn(async move {
            run_with_timeout(
                &clock,
                Duration::from_secs(2),
                std::future::pending::<()>(),
            )
            .await
        });

        tokio::task::yield_now().await;
        driver.advance(Duration::from_secs(2));

        let result = pending.await.unwrap();
        assert_eq!(
            result,
            Err(Elapsed {
                timeout: Duration::from_secs(2)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_does_not_overflow() {
        let result = run_with_timeout(&SystemClock, Duration::MAX, async { "done" }).await;
        assert_eq!(result, Ok("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_with_system_clock() {
        let result = run_with_timeout(
            &SystemClock,
            Duration::from_millis(50),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert!(result.is_err());
    }
}
