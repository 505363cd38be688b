//! Exponential backoff with jitter, shared by every stage of the worker
//! pipeline.
//!
//! `delay(n) = min(maxDelay, initialDelay * backoff^(n-1) * U(0.8, 1.2))`

use std::time::Duration;

use rand::Rng;

use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_factor: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_factor,
            max_delay,
        }
    }

    /// Delay before attempt `n` (1-indexed: the wait that precedes the
    /// n-th retry, so `n == 1` is the wait before the first retry).
    #[must_use]
    pub fn delay_for_attempt(&self, n: u32, jitter: f64) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(n as i32 - 1);
        let jittered = base * jitter;
        let capped = jittered.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Draws jitter in `[0.8, 1.2)`. Exposed for callers wiring their own
/// seeded RNG; `run` below uses the thread RNG.
#[must_use]
pub fn jitter<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(0.8..1.2)
}

/// Classifies an error as worth retrying: network errors,
/// timeouts, HTTP 429/503/504 and other 5xx, and a couple of known
/// upstream-unavailable message patterns. Anything else (4xx other than
/// 429, malformed payloads, unknown tenant, ...) is permanent.
#[must_use]
pub fn is_transient(error: &AppError) -> bool {
    if error.is_transient() {
        return true;
    }
    match error {
        AppError::DataUnavailable(msg) => msg.contains("not available") || msg.contains("Database connection"),
        _ => false,
    }
}

/// Classifies a raw HTTP status code from an upstream call.
#[must_use]
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 503 | 504) || (500..600).contains(&status)
}

/// Run `operation`, retrying on transient failures per `policy`, sleeping
/// between attempts using real wall-clock time and the thread RNG.
///
/// Returns the last error once `max_attempts` is exhausted or a permanent
/// error is hit.
pub async fn run<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_transient(&err) => {
                let j = jitter(&mut rand::thread_rng());
                let delay = policy.delay_for_attempt(attempt, j);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(500), 2.0, Duration::from_secs(10))
    }

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let p = policy();
        assert_eq!(p.delay_for_attempt(1, 1.0), Duration::from_millis(500));
        assert_eq!(p.delay_for_attempt(2, 1.0), Duration::from_millis(1000));
        assert_eq!(p.delay_for_attempt(3, 1.0), Duration::from_millis(2000));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let p = policy();
        assert_eq!(p.delay_for_attempt(10, 1.0), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let j = jitter(&mut rng);
            assert!(j >= 0.8 && j < 1.2);
        }
    }

    #[test]
    fn network_and_timeout_errors_are_transient() {
        assert!(is_transient(&AppError::TransientNetwork("boom".into())));
        assert!(is_transient(&AppError::Timeout));
        assert!(is_transient(&AppError::TransientUpstream("503".into())));
    }

    #[test]
    fn permanent_upstream_is_not_transient() {
        assert!(!is_transient(&AppError::PermanentUpstream("400 bad request".into())));
        assert!(!is_transient(&AppError::MalformedPayload("bad json".into())));
    }

    #[test]
    fn data_unavailable_with_connection_message_is_transient() {
        assert!(is_transient(&AppError::DataUnavailable(
            "Database connection refused".into()
        )));
        assert!(!is_transient(&AppError::DataUnavailable("row not found".into())));
    }

    #[test]
    fn status_classification_matches_spec() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(503));
        assert!(is_transient_status(504));
        assert!(is_transient_status(500));
        assert!(!is_transient_status(400));
        assert!(!is_transient_status(404));
    }

    #[tokio::test]
    async fn run_retries_until_success() {
        let p = RetryPolicy::new(3, Duration::from_millis(1), 2.0, Duration::from_millis(5));
        let mut calls = 0;
        let result = run(&p, || {
            calls += 1;
            let call = calls;
            async move {
                if call < 3 {
                    Err(AppError::TransientNetwork("retry me".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn run_stops_immediately_on_permanent_error() {
        let p = RetryPolicy::new(5, Duration::from_millis(1), 2.0, Duration::from_millis(5));
        let mut calls = 0;
        let result: Result<(), AppError> = run(&p, || {
            calls += 1;
            async { Err(AppError::PermanentUpstream("400".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn run_gives_up_after_max_attempts() {
        let p = RetryPolicy::new(3, Duration::from_millis(1), 2.0, Duration::from_millis(5));
        let mut calls = 0;
        let result: Result<(), AppError> = run(&p, || {
            calls += 1;
            async { Err(AppError::TransientNetwork("always fails".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
