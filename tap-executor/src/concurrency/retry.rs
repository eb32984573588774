use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tap_config::shared::RetryConfig;
use tracing::warn;

use crate::error::TapResult;

/// Maximum share of the computed delay added as random jitter.
const JITTER_RATIO: f64 = 0.25;

/// Computes the delay to wait after failed attempt number `attempt` (starting at 1).
///
/// The delay grows by `backoff_factor` after each attempt and never exceeds `max_delay_ms`.
/// Jitter, when enabled, adds up to a quarter of the delay.
pub fn delay_for_attempt(config: &RetryConfig, attempt: u32, jitter: bool) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base_ms = config.initial_delay_ms as f64 * f64::from(config.backoff_factor).powi(exponent);
    let capped_ms = base_ms.min(config.max_delay_ms as f64).max(0.0);

    let delay_ms = if jitter && capped_ms > 0.0 {
        let jitter_factor = rand::rng().random_range(0.0..=JITTER_RATIO);
        capped_ms * (1.0 + jitter_factor)
    } else {
        capped_ms
    };

    Duration::from_micros((delay_ms * 1_000.0).round() as u64)
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or has been attempted
/// `max_attempts` times.
///
/// The error of the last attempt is returned when attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &'static str,
    mut operation: F,
) -> TapResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TapResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if !err.is_retryable() || attempt >= max_attempts => return Err(err),
            Err(err) => {
                let delay = delay_for_attempt(config, attempt, true);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::tap_error;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 4,
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn delays_grow_and_are_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_factor: 3.0,
        };

        assert_eq!(delay_for_attempt(&config, 1, false), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(&config, 2, false), Duration::from_millis(300));
        assert_eq!(delay_for_attempt(&config, 3, false), Duration::from_millis(900));
        assert_eq!(delay_for_attempt(&config, 4, false), Duration::from_millis(1_000));
        assert_eq!(delay_for_attempt(&config, 40, false), Duration::from_millis(1_000));

        let jittered = delay_for_attempt(&config, 1, true);
        assert!(jittered >= Duration::from_millis(100));
        assert!(jittered <= Duration::from_millis(126));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&config(5), "test", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(tap_error!(ErrorKind::SinkError, "Sink unavailable"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: TapResult<()> = retry_with_backoff(&config(3), "test", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(tap_error!(ErrorKind::StoreError, "Store unavailable"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::StoreError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failures() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: TapResult<()> = retry_with_backoff(&config(5), "test", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(tap_error!(ErrorKind::StoreConflict, "Run is terminal"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::StoreConflict);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
