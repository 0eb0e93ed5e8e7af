//! Random exponential backoff for rate-limited endpoints.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that can tell whether another attempt might succeed.
pub trait Retryable {
    /// `true` for throttling, transient server failures, and transport errors.
    fn is_retryable(&self) -> bool;

    /// Minimum wait requested by the server, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Bounded retry with random exponential backoff.
///
/// Attempt `n` (1-based) sleeps for a random duration in `[min_delay, ceiling]`, where the
/// ceiling is `base_delay * 2^(n-1)` clamped to `[min_delay, max_delay]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Exponential base.
    pub base_delay: Duration,
    /// Lower bound of every sleep.
    pub min_delay: Duration,
    /// Upper bound of every sleep.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            base_delay: Duration::from_secs(1),
            min_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sleep before the attempt following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let ceiling = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .clamp(self.min_delay, self.max_delay.max(self.min_delay));
        if ceiling <= self.min_delay {
            return self.min_delay;
        }
        let low = self.min_delay.as_millis() as u64;
        let high = ceiling.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && err.is_retryable() => {
                    let delay = match err.retry_after() {
                        Some(hint) => self.delay_for(attempt).max(hint),
                        None => self.delay_for(attempt),
                    };
                    tracing::info!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Rate limited or transient failure; sleeping before retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky (retryable: {})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[derive(Debug)]
    struct Throttled(Duration);

    impl Display for Throttled {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "throttled for {:?}", self.0)
        }
    }

    impl Retryable for Throttled {
        fn is_retryable(&self) -> bool {
            true
        }

        fn retry_after(&self) -> Option<Duration> {
            Some(self.0)
        }
    }

    #[tokio::test]
    async fn server_hint_bounds_the_sleep_from_below() {
        let calls = &AtomicU32::new(0);
        let started = std::time::Instant::now();
        let result = RetryPolicy::immediate(2)
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Throttled(Duration::from_millis(50)))
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = &AtomicU32::new(0);
        let result = RetryPolicy::immediate(5)
            .run(move || async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call < 3 { Err(Flaky(true)) } else { Ok(call) }
            })
            .await;
        assert_eq!(result.expect("eventual success"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), Flaky> = RetryPolicy::immediate(4)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(true))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), Flaky> = RetryPolicy::immediate(10)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(false))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_delays_stay_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=15 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_secs(15), "attempt {attempt}: {delay:?}");
            assert!(delay <= Duration::from_secs(60), "attempt {attempt}: {delay:?}");
        }
    }
}
