// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Two flavours live here:
//! - [`retry`] wraps an async operation and retries it in place. The store
//!   uses it only to open the SQLite file at startup.
//! - [`backoff_delay`] computes when a failed sync queue item may be tried
//!   again. Queue items are not retried in place; the sync engine reschedules
//!   them and picks them up on a later tick.
//!
//! # Example
//!
//! ```
//! use birch_offline::resilience::retry::{backoff_delay, RetryConfig};
//! use std::time::Duration;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // base 1s, multiplier 2, third failure -> 8s
//! assert_eq!(backoff_delay(Duration::from_secs(1), 2.0, 3), Duration::from_secs(8));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Upper bound for a single queue-item backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Configuration for connection retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryConfig {
    /// Fast-fail retry for opening the local database.
    /// 5 attempts, failing after roughly 3 seconds, so a broken path falls
    /// back to the key-value store quickly.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if let Some(max) = config.max_retries {
                    if attempts >= max {
                        return Err(err);
                    }
                    warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempts, max, err, delay
                    );
                } else {
                    warn!(
                        "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, attempts, err, delay
                    );
                }

                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}

/// Delay before retry number `retry_count` of a queue item:
/// `base * multiplier^retry_count`, capped at [`MAX_BACKOFF`].
#[must_use]
pub fn backoff_delay(base: Duration, multiplier: f64, retry_count: u32) -> Duration {
    let factor = multiplier.max(1.0).powi(retry_count.min(64) as i32);
    let secs = base.as_secs_f64() * factor;
    if !secs.is_finite() || secs >= MAX_BACKOFF.as_secs_f64() {
        MAX_BACKOFF
    } else {
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || async { Ok(42) },
        ).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(TestError(format!("fail {}", count)))
                    } else {
                        Ok(42)
                    }
                }
            },
        ).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError("always fail".to_string()))
                }
            },
        ).await;

        assert!(result.unwrap_err().0.contains("always fail"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 2.0, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2.0, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 2.0, 2), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        assert_eq!(backoff_delay(Duration::from_secs(10), 10.0, 30), MAX_BACKOFF);
    }

    #[test]
    fn test_backoff_zero_base_is_immediate() {
        assert_eq!(backoff_delay(Duration::ZERO, 2.0, 5), Duration::ZERO);
    }

    #[test]
    fn test_multiplier_below_one_treated_as_one() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0.5, 4), base);
    }
}
