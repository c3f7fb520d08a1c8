//! Bounded exponential-backoff retry for transient remote failures.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Classification hook for errors passed through [`retry_async`].
pub trait Retryable {
    fn retryable(&self) -> bool;

    /// Server-provided wait hint, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Retry policy configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations, including the first one.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Compute the wait after the `failures`-th consecutive failure (0-based).
/// A server hint replaces the computed backoff but is capped at `max_delay`.
pub fn compute_backoff_delay(
    policy: &RetryPolicy,
    failures: usize,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(retry_after) = retry_after {
        return retry_after.min(policy.max_delay);
    }

    let raw = policy.initial_delay.as_secs_f64() * policy.backoff_multiplier.powi(failures as i32);
    let capped = raw.min(policy.max_delay.as_secs_f64());
    let secs = if policy.jitter {
        capped * jitter_factor(failures)
    } else {
        capped
    };
    Duration::from_secs_f64(secs)
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` invocations have failed. The last error is returned.
pub async fn retry_async<T, E, Op, Fut>(policy: &RetryPolicy, mut operation: Op) -> Result<T, E>
where
    E: Retryable + fmt::Display,
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.retryable() || attempt >= policy.max_attempts {
                    return Err(error);
                }
                let delay = compute_backoff_delay(policy, attempt - 1, error.retry_after());

                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn jitter_factor(attempt: usize) -> f64 {
    // Deterministic +/-50% jitter derived from attempt.
    let mut x = (attempt as u64).wrapping_add(0x9e3779b97f4a7c15);
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    let normalized = (x % 10_000) as f64 / 10_000.0;
    0.5 + normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    enum TestError {
        Reset,
        RateLimited(Duration),
        Rejected,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn retryable(&self) -> bool {
            !matches!(self, TestError::Rejected)
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                TestError::RateLimited(after) => Some(*after),
                _ => None,
            }
        }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        let delays: Vec<_> = (0..5)
            .map(|n| compute_backoff_delay(&policy, n, None))
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn jitter_stays_within_half_band() {
        let policy = RetryPolicy {
            jitter: true,
            ..RetryPolicy::default()
        };
        for n in 0..4 {
            let base = 2f64.powi(n as i32);
            let delay = compute_backoff_delay(&policy, n, None).as_secs_f64();
            assert!(delay >= base * 0.5 && delay <= base * 1.5, "attempt {n}: {delay}");
        }
    }

    #[test]
    fn retry_after_overrides_backoff_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(
            compute_backoff_delay(&policy, 3, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            compute_backoff_delay(&policy, 0, Some(Duration::from_secs(120))),
            policy.max_delay
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result: Result<&str, TestError> = retry_async(&RetryPolicy::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(TestError::Reset) } else { Ok("ok") } }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_fails_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), TestError> = retry_async(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Rejected) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Rejected)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), TestError> = retry_async(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Reset) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Reset)));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // 1 + 2 + 4 + 8 seconds of backoff between five attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_is_honored() {
        let calls = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<u8, TestError> = retry_async(&RetryPolicy::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TestError::RateLimited(Duration::from_secs(7)))
                } else {
                    Ok(1)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn long_rate_limit_hint_waits_max_delay_and_keeps_retrying() {
        let calls = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), TestError> = retry_async(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::RateLimited(Duration::from_secs(60))) }
        })
        .await;

        assert!(matches!(result, Err(TestError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // Four waits, each clamped to the 30s cap.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(120) && elapsed < Duration::from_secs(121));
    }
}
