//! Bounded retry with exponential backoff for single external calls.
//!
//! Applies to one request at a time (a completion call, a fleet lookup).
//! The workflow-level revision loop is a separate construct and never goes
//! through this module.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryPolicy;

/// Run `op`, retrying transient failures with exponential backoff.
///
/// `is_retryable` decides per error whether another attempt is worthwhile;
/// non-retryable errors surface immediately. The final error is returned
/// unchanged once the attempt budget is spent.
pub(crate) async fn with_backoff<T, E, F, Fut>(
    op_name: &str,
    policy: &RetryPolicy,
    is_retryable: fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= policy.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                let delay = backoff_delay(policy, attempt);
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Compute the backoff delay for the given attempt (1-based), with jitter.
///
/// Doubles from `base_delay`, capped at `max_delay`; jitter scales the
/// result into the 50–100% range so parallel runs don't retry in lockstep.
fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy
        .base_delay
        .saturating_mul(1u32 << (attempt - 1).min(16));
    let capped = exp.min(policy.max_delay);
    let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
    capped.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
    }

    fn retryable(e: &TestError) -> bool {
        matches!(e, TestError::Transient)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let policy = RetryPolicy::default();
        let result = with_backoff("test", &policy, retryable, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let policy = RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        };
        let result: Result<u32, TestError> =
            with_backoff("test", &policy, retryable, move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let policy = RetryPolicy::default();
        let result: Result<u32, TestError> =
            with_backoff("test", &policy, retryable, move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        // Jitter scales into [0.5, 1.0] of the capped delay.
        let d1 = backoff_delay(&policy, 1);
        assert!(d1 >= Duration::from_millis(50) && d1 <= Duration::from_millis(100));
        let d2 = backoff_delay(&policy, 2);
        assert!(d2 >= Duration::from_millis(100) && d2 <= Duration::from_millis(200));
        // Attempt 3 would be 400ms uncapped; cap applies before jitter.
        let d3 = backoff_delay(&policy, 3);
        assert!(d3 <= Duration::from_millis(350));
    }
}
