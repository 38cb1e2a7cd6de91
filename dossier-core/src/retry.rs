//! Retry with exponential backoff for oracle calls.

use crate::config::RetryConfig;
use crate::error::OracleError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Execute an oracle call with retries.
///
/// A reply rejected by `accept` (an empty source list, for instance) is retried
/// like a transient error; once attempts run out the last reply is returned
/// as-is. Aborted and fatal errors return immediately.
pub async fn with_retry<F, Fut, T, A>(
    config: &RetryConfig,
    accept: A,
    operation: F,
) -> Result<T, OracleError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, OracleError>>,
    A: Fn(&T) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let last = attempt + 1 == attempts;
        let backoff_ms = match operation().await {
            Ok(value) if last || accept(&value) => return Ok(value),
            Ok(_) => {
                let backoff_ms = compute_exponential_backoff(config, attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    max = attempts,
                    backoff_ms,
                    "Retrying after empty reply"
                );
                backoff_ms
            }
            Err(e) => {
                if last || !should_retry(&e) {
                    return Err(e);
                }
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = attempts,
                    backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                backoff_ms
            }
        };
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        attempt += 1;
    }
}

fn should_retry(err: &OracleError) -> bool {
    !err.is_aborted() && !err.is_fatal()
}

/// Backoff delay, respecting a rate limit's retry-after.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &OracleError) -> u64 {
    if let OracleError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs.saturating_mul(1000);
        return server_ms.max(compute_exponential_backoff(config, attempt));
    }
    compute_exponential_backoff(config, attempt)
}

/// Exponential backoff with up to 25% random jitter.
pub fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        let jitter = (capped as f64 * 0.25 * rand::thread_rng().r#gen::<f64>()) as u64;
        capped + jitter
    } else {
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let config = no_jitter();
        assert_eq!(compute_exponential_backoff(&config, 0), 500);
        assert_eq!(compute_exponential_backoff(&config, 1), 1000);
        assert_eq!(compute_exponential_backoff(&config, 2), 2000);
        assert_eq!(compute_exponential_backoff(&config, 10), 8000);
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let delay = compute_exponential_backoff(&config, 1);
            assert!((1000..=1250).contains(&delay));
        }
    }

    #[test]
    fn test_rate_limit_respects_retry_after() {
        let config = no_jitter();
        let err = OracleError::RateLimited {
            retry_after_secs: 3,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(&no_jitter(), |_: &u32| true, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(OracleError::Timeout { timeout_secs: 5 })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_reply_retried_until_attempts_run_out() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(&no_jitter(), |v: &Vec<u32>| !v.is_empty(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
        })
        .await;
        assert!(result.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_and_aborted_not_retried() {
        for error in [
            OracleError::AuthFailed {
                provider: "mock".into(),
            },
            OracleError::Aborted,
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let expected = error.clone();
            let result: Result<u32, _> = with_retry(&no_jitter(), |_| true, || {
                let counter = counter.clone();
                let error = error.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(error)
                }
            })
            .await;
            assert_eq!(result.unwrap_err(), expected);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
