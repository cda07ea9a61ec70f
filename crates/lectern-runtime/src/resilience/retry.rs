//! Bounded retries with exponential backoff.
//!
//! Attempt 1 runs immediately. The delay before attempt `k + 1` is
//! `delay * backoff_multiplier^(k - 1)`, capped at `max_delay`. Backoff
//! sleeps are cooperative, so other invocations keep running meanwhile.

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::duration_str;

/// Errors that know whether another attempt could succeed.
pub trait RetryableError {
    /// True for transient failures, false for fatal ones.
    fn is_retryable(&self) -> bool;
}

/// Retry policy for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "duration_str")]
    pub delay: Duration,

    /// Growth factor applied to each subsequent delay (at least 1.0)
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay
    #[serde(with = "duration_str")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default delay cap.
    pub fn new(max_attempts: u32, delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff_multiplier: backoff_multiplier.max(1.0),
            ..Default::default()
        }
    }

    /// Same policy with a different attempt budget (clamped to at least 1).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.backoff_multiplier.max(1.0) as f32)
            .with_max_times(self.max_attempts.max(1) as usize - 1)
    }
}

/// Run `work` until it succeeds, fails fatally, or the policy is exhausted.
///
/// `work` receives the 1-based attempt number. `on_retry` is called with the
/// attempt number before every attempt after the first. On exhaustion the
/// error from the last attempt is returned.
pub async fn with_retry<T, E, W, Fut, R>(
    policy: &RetryPolicy,
    mut on_retry: R,
    mut work: W,
) -> Result<T, E>
where
    E: RetryableError + Display,
    W: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32),
{
    let mut attempt = 0u32;
    let max_attempts = policy.max_attempts.max(1);

    (|| {
        attempt += 1;
        if attempt > 1 {
            on_retry(attempt);
        }
        work(attempt)
    })
    .retry(policy.backoff())
    .sleep(tokio::time::sleep)
    .when(|e: &E| e.is_retryable())
    .notify(|e: &E, delay: Duration| {
        tracing::warn!(
            error = %e,
            delay = ?delay,
            max_attempts,
            "Attempt failed, backing off before retry"
        );
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Transient(u32),
        Fatal(u32),
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient(_))
        }
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), 2.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let result: Result<(), TestError> = with_retry(
            &fast_policy(3),
            |attempt| retries.push(attempt),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(TestError::Transient(attempt)) }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(TestError::Transient(3)));
        assert_eq!(retries, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let mut retries = 0;

        let result: Result<(), TestError> = with_retry(
            &fast_policy(5),
            |_| retries += 1,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(TestError::Fatal(attempt)) }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries, 0);
        assert_eq!(result, Err(TestError::Fatal(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let mut retries = 0;

        let result = with_retry(
            &fast_policy(3),
            |_| retries += 1,
            |attempt| async move {
                if attempt < 3 {
                    Err(TestError::Transient(attempt))
                } else {
                    Ok(attempt * 10)
                }
            },
        )
        .await;

        assert_eq!(result, Ok(30));
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry(
            &fast_policy(1),
            |_| {},
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(TestError::Transient(attempt)) }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result, Err(TestError::Transient(1)));
    }

    /// Gaps between the starts of consecutive attempts.
    async fn attempt_gaps(policy: &RetryPolicy) -> Vec<Duration> {
        let mut starts = Vec::new();

        let _: Result<(), TestError> = with_retry(policy, |_| {}, |attempt| {
            starts.push(tokio::time::Instant::now());
            async move { Err(TestError::Transient(attempt)) }
        })
        .await;

        starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn assert_gaps(actual: &[Duration], expected_ms: &[u64]) {
        assert_eq!(actual.len(), expected_ms.len(), "gaps: {actual:?}");
        for (gap, ms) in actual.iter().zip(expected_ms) {
            let expected = Duration::from_millis(*ms);
            // Float backoff math and millisecond timer ticks blur the edges
            assert!(
                *gap + Duration::from_millis(1) >= expected
                    && *gap < expected + Duration::from_millis(5),
                "gaps {actual:?}, expected {expected_ms:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_by_multiplier() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), 3.0);
        let gaps = attempt_gaps(&policy).await;
        assert_gaps(&gaps, &[100, 300, 900]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped_by_max_delay() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(250),
            ..RetryPolicy::new(4, Duration::from_millis(100), 3.0)
        };
        let gaps = attempt_gaps(&policy).await;
        assert_gaps(&gaps, &[100, 250, 250]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiplier_of_one_keeps_delay_constant() {
        let policy = RetryPolicy::new(3, Duration::from_millis(40), 1.0);
        let gaps = attempt_gaps(&policy).await;
        assert_gaps(&gaps, &[40, 40]);
    }

    #[test]
    fn test_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, 0.5).backoff_multiplier, 1.0);
    }
}
