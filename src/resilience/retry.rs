// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff and jitter.
//!
//! Every operation runs under a bounded number of attempts. Each attempt gets
//! its own timeout and a child of the caller's cancellation token; backoff
//! sleeps race the caller's token so cancellation is observed immediately.
//!
//! # Example
//!
//! ```
//! use event_index_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Index writes: 3 attempts, 1s base, capped at 60s
//! let indexing = RetryConfig::indexing();
//! assert_eq!(indexing.max_retries, 3);
//! assert_eq!(indexing.attempt_timeout, Duration::from_secs(30));
//!
//! // Startup: fail fast on bad connection strings
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, 5);
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics;

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::indexing()`] - Index writes (bulk chunks, single documents)
/// - [`RetryConfig::startup()`] - Fast-fail for initial connections
/// - [`RetryConfig::query()`] - Quick retry for reads
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts, including the first one
    pub max_retries: usize,
    /// Symmetric jitter fraction applied to each delay (0.25 = ±25%)
    pub jitter: f64,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::indexing()
    }
}

impl From<&SyncConfig> for RetryConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            factor: config.retry_backoff_factor,
            max_retries: config.retry_max_attempts.max(1),
            jitter: config.retry_jitter.clamp(0.0, 1.0),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }
}

impl RetryConfig {
    /// Retry for index writes.
    /// 3 attempts, 1s doubling to a 60s cap with ±25% jitter, 30s per attempt.
    #[must_use]
    pub fn indexing() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.25,
            attempt_timeout: Duration::from_secs(30),
        }
    }

    /// Fast-fail retry for initial startup connection.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: 0.25,
            attempt_timeout: Duration::from_secs(10),
        }
    }

    /// Quick retry for individual reads (don't block forever).
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: 0.25,
            attempt_timeout: Duration::from_secs(10),
        }
    }

    /// Fast retry for tests (minimal delays, no jitter)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            jitter: 0.0,
            attempt_timeout: Duration::from_secs(1),
        }
    }

    /// Delay after failed attempt `attempt` (1-based) for a jitter sample in `[-1, 1]`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize, sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let base = self.initial_delay.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        let jittered = base * (1.0 + self.jitter * sample.clamp(-1.0, 1.0));
        let capped = jittered.max(0.0).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Delay after failed attempt `attempt` with a random jitter sample.
    #[must_use]
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let sample = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay_for_attempt(attempt, sample)
    }
}

/// Run `operation` under `config`, observing `cancel`.
///
/// The operation receives a per-attempt child token. Non-retryable errors
/// (cancellation, validation, not-found, undecodable data) are returned as-is; other failures
/// are retried until attempts run out, then wrapped in
/// [`SyncError::RetriesExhausted`].
pub async fn retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, SyncError>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    if cancel.is_cancelled() {
        debug!(operation = operation_name, "Cancelled before first attempt");
        return Err(SyncError::Cancelled);
    }

    let max_attempts = config.max_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let attempt_token = cancel.child_token();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            res = tokio::time::timeout(config.attempt_timeout, operation(attempt_token.clone())) => {
                res.unwrap_or(Err(SyncError::AttemptTimedOut(config.attempt_timeout)))
            }
        };
        // Release anything the attempt left running on its token
        attempt_token.cancel();

        match outcome {
            Ok(value) => {
                metrics::record_retry_attempt(operation_name, "success");
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                let outcome = if err.is_cancelled() { "cancelled" } else { "fatal" };
                metrics::record_retry_attempt(operation_name, outcome);
                debug!(operation = operation_name, attempt, error = %err, "Not retrying");
                return Err(err);
            }
            Err(err) => {
                metrics::record_retry_attempt(operation_name, "error");

                if attempt >= max_attempts {
                    metrics::record_retry_exhausted(operation_name);
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "Operation failed after all attempts"
                    );
                    return Err(SyncError::RetriesExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }

                let delay = config.backoff_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(operation = operation_name, attempt, "Cancelled during backoff");
                        return Err(SyncError::Cancelled);
                    }
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::StorageError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn transient(msg: &str) -> SyncError {
        SyncError::storage("test_op", StorageError::Connection(msg.to_string()))
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result = retry("test_op", &RetryConfig::test(), &CancellationToken::new(), |_| async {
            Ok(42)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result = retry("test_op", &RetryConfig::test(), &CancellationToken::new(), |_| {
            let a = attempts_clone.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(transient(&format!("fail {}", count)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<(), _> =
            retry("test_op", &RetryConfig::test(), &CancellationToken::new(), |_| {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(transient("always fail"))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));
        assert!(err.to_string().contains("always fail"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempts = AtomicUsize::new(0);

        let result: Result<(), _> = retry("test_op", &RetryConfig::test(), &cancel, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let attempts = AtomicUsize::new(0);

        let result: Result<(), _> =
            retry("test_op", &RetryConfig::test(), &CancellationToken::new(), |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::storage("get", StorageError::NotFound(5))) }
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_aborts_sleep() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(600),
            max_delay: Duration::from_secs(600),
            ..RetryConfig::test()
        };
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let a = attempts.clone();
        let result: Result<(), _> = retry("test_op", &config, &cancel, |_| {
            a.fetch_add(1, Ordering::SeqCst);
            async { Err(transient("down")) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out_and_retries() {
        let config = RetryConfig {
            attempt_timeout: Duration::from_secs(30),
            ..RetryConfig::test()
        };
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();

        let result = retry("test_op", &config, &CancellationToken::new(), |_| {
            let a = a.clone();
            async move {
                if a.fetch_add(1, Ordering::SeqCst) == 0 {
                    sleep(Duration::from_secs(3600)).await;
                }
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_token_cancelled_after_attempt() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let s = seen.clone();

        retry("test_op", &RetryConfig::test(), &CancellationToken::new(), |token| {
            *s.lock() = Some(token);
            async { Ok(()) }
        })
        .await
        .unwrap();

        let token = seen.lock().take().unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_retry_config_presets() {
        let indexing = RetryConfig::indexing();
        assert_eq!(indexing.max_retries, 3);
        assert_eq!(indexing.initial_delay, Duration::from_secs(1));
        assert_eq!(indexing.max_delay, Duration::from_secs(60));
        assert_eq!(indexing.jitter, 0.25);

        assert_eq!(RetryConfig::startup().max_retries, 5);
        assert_eq!(RetryConfig::query().max_retries, 3);
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let config = RetryConfig::indexing();

        assert_eq!(config.delay_for_attempt(1, 0.0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2, 0.0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3, 0.0), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_jitter_bounds() {
        let config = RetryConfig::indexing();

        assert_eq!(config.delay_for_attempt(3, 1.0), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(3, -1.0), Duration::from_secs(3));

        for _ in 0..100 {
            let delay = config.backoff_delay(2);
            assert!(delay >= Duration::from_millis(1500) && delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_delay_caps_at_max() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 10.0,
            ..RetryConfig::indexing()
        };

        assert_eq!(config.delay_for_attempt(2, 1.0), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(40, 0.0), Duration::from_secs(5));
    }
}
