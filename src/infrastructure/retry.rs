//! Retry policy with jittered exponential backoff
//!
//! One policy object carries the attempt budget, the backoff schedule and the
//! predicate that decides which errors are worth another attempt. The store
//! and the model client both run their remote calls through it.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::models::RetryConfig;

/// Retry policy for transient errors of type `E`
pub struct RetryPolicy<E> {
    /// Total attempts, including the first one
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    /// Randomization factor applied to every delay (0.0 = none)
    jitter: f64,
    retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            jitter: self.jitter,
            retryable: self.retryable,
        }
    }
}

impl<E: Display> RetryPolicy<E> {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts including the first (at least 1)
    /// * `initial_backoff` - Delay before the second attempt
    /// * `max_backoff` - Upper bound for any single delay
    /// * `jitter` - Randomization factor in [0, 1]
    /// * `retryable` - Predicate selecting errors that may be retried
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        jitter: f64,
        retryable: fn(&E) -> bool,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            jitter: jitter.clamp(0.0, 1.0),
            retryable,
        }
    }

    pub fn from_config(config: &RetryConfig, retryable: fn(&E) -> bool) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.jitter,
            retryable,
        )
    }

    /// Same schedule with a different attempt budget
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(self.jitter)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Execute an async operation, retrying errors the predicate accepts
    ///
    /// Permanent errors and the error of the final attempt are returned as-is.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut schedule = self.schedule();
        let mut attempt = 1;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(err) if attempt < self.max_attempts && (self.retryable)(&err) => {
                    let delay = schedule.next_backoff().unwrap_or(self.max_backoff);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if (self.retryable)(&err) {
                        warn!(operation, attempts = attempt, error = %err, "retries exhausted");
                    } else {
                        debug!(operation, error = %err, "permanent error, not retrying");
                    }
                    return Err(err);
                }
            }
        }
    }
}
