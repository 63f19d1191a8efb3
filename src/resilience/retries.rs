//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a request is retryable (idempotent methods only)
//! - Execute bounded retries with a caller-supplied backoff function
//!
//! # Design Decisions
//! - Never retry POST/PUT/DELETE/PATCH (non-idempotent)
//! - Attempt budgets are small and fixed so a caller's worst case is known

use axum::http::Method;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Only GET and HEAD are replayed against the origin.
pub fn is_idempotent(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Run `op` up to `attempts` times.
///
/// `op` receives the 0-based attempt index. A failure for which `retryable`
/// returns false ends the loop immediately; otherwise the helper sleeps for
/// `backoff(attempt)` before the next try. No sleep follows the final attempt.
pub async fn retry<T, E, F, Fut, B, P>(
    operation: &str,
    attempts: u32,
    backoff: B,
    retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: Fn(u32) -> Duration,
    P: Fn(&E) -> bool,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let last = attempt + 1 >= attempts;
                if last || !retryable(&e) {
                    tracing::debug!(operation, attempt, error = %e, "Giving up");
                    return Err(e);
                }
                let delay = backoff(attempt);
                tracing::debug!(operation, attempt, delay = ?delay, error = %e, "Retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_idempotent_methods() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::HEAD));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PUT));
        assert!(!is_idempotent(&Method::DELETE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(
            "test",
            3,
            |_| Duration::from_millis(10),
            |_| true,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err("flaky".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(
            "test",
            3,
            |_| Duration::from_millis(10),
            |_| true,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_early() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(
            "test",
            5,
            |_| Duration::from_millis(10),
            |e: &String| e != "fatal",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
