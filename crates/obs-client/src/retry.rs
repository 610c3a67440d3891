//! Bounded retry with exponential backoff for remote calls.
//!
//! OBS regularly drops connections or answers with SQL errors under load, so
//! reads and idempotent writes are retried a few times before giving up.

use crate::error::ObsError;
use crate::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Retry policy for remote calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (1 = no retry)
    pub max_attempts: usize,

    /// Backoff before the second attempt
    pub initial_backoff: Duration,

    /// Upper bound for a single backoff
    pub max_backoff: Duration,

    /// Backoff multiplier per attempt
    pub backoff_multiplier: f64,

    /// Retry every error, not only transient ones
    pub retry_all_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            retry_all_errors: false,
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Retry any error. Used for meta writes, where OBS sometimes fails with
    /// internal errors that do not look transient.
    pub fn any_error(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            retry_all_errors: true,
            ..Default::default()
        }
    }

    pub fn should_retry(&self, error: &ObsError) -> bool {
        self.retry_all_errors || error.is_transient()
    }

    /// Backoff before attempt number `attempt` (0-indexed).
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_millis = self.initial_backoff.as_millis() as f64;
        let multiplier = self.backoff_multiplier.powi((attempt - 1) as i32);
        let backoff = Duration::from_millis((base_millis * multiplier) as u64);
        backoff.min(self.max_backoff)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error or the
    /// attempts are exhausted. The last error is returned in the latter cases.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.backoff_duration(attempt)).await;
            }

            match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            "{} succeeded on attempt {}/{}",
                            operation,
                            attempt + 1,
                            attempts
                        );
                    }
                    return Ok(value);
                }
                Err(err) if attempt + 1 < attempts && self.should_retry(&err) => {
                    warn!(
                        "{} failed, retrying in {:?} (attempt {}/{}): {}",
                        operation,
                        self.backoff_duration(attempt + 1),
                        attempt + 2,
                        attempts,
                        err
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
