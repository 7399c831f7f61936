//! Error classification, backoff scheduling, and bounded attempts (C8).

use crate::error::ServiceError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Whether a failure should be retried. A pure function over the error
/// text, per the design notes' "retry classification is a pure function"
/// rule.
pub fn is_retriable(message: &str) -> bool {
    const RETRIABLE_PATTERNS: &[&str] = &[
        "http error 5",
        "connection reset",
        "timeout",
        "timed out",
        "too many requests",
    ];
    let lower = message.to_ascii_lowercase();
    RETRIABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Runs `attempt` up to `max_attempts` times, sleeping the next element of
/// `backoff_schedule` between retriable failures. Non-retriable failures
/// bypass all remaining attempts. Returns the successful value, or the
/// last error once attempts are exhausted.
///
/// `on_retry` is invoked (and awaited) with the 1-based attempt index that
/// just failed and the classified error, before the backoff sleep begins —
/// this is the hook callers use to flip `Job.state` to RETRYING so that an
/// observer polling the job during the sleep sees the transition, then
/// back to PROCESSING once the next attempt starts.
pub async fn execute_with_retry<T, F, Fut, R, FutR>(
    max_attempts: u32,
    backoff_schedule: &[u64],
    mut attempt: F,
    mut on_retry: R,
) -> Result<T, ServiceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
    R: FnMut(u32, &ServiceError) -> FutR,
    FutR: Future<Output = ()>,
{
    let mut last_err = None;
    for attempt_index in 1..=max_attempts {
        match attempt(attempt_index).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = err.to_string();
                let retriable = is_retriable(&message);
                if !retriable || attempt_index == max_attempts {
                    return Err(err);
                }
                warn!(attempt = attempt_index, reason = %message, "retrying extractor call");
                on_retry(attempt_index, &err).await;
                let backoff_index = (attempt_index - 1) as usize;
                let delay_secs = backoff_schedule.get(backoff_index).copied().unwrap_or(8);
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or(ServiceError::DownloadFailed("retry loop produced no result".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn classifies_http_5xx_as_retriable() {
        assert!(is_retriable("HTTP Error 503: Service Unavailable"));
    }

    #[test]
    fn classifies_timeout_as_retriable() {
        assert!(is_retriable("Connection timeout after 10s"));
    }

    #[test]
    fn classifies_private_video_as_non_retriable() {
        assert!(!is_retriable("ERROR: Private video"));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_retriable_failures() {
        let attempts = AtomicU32::new(0);
        let retries_seen = AtomicU32::new(0);
        let result = execute_with_retry(
            3,
            &[0, 0, 0],
            |idx| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if idx < 3 {
                        Err(ServiceError::DownloadFailed("HTTP Error 503".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
            |_, _| {
                retries_seen.fetch_add(1, Ordering::SeqCst);
                async {}
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(retries_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retriable_error_bypasses_remaining_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<i32, ServiceError> = execute_with_retry(
            3,
            &[0, 0, 0],
            |idx| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    let _ = idx;
                    Err(ServiceError::DownloadFailed("ERROR: Private video".to_string()))
                }
            },
            |_, _| async {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_surfaces_last_error() {
        let result: Result<i32, ServiceError> = execute_with_retry(
            2,
            &[0, 0],
            |_| async { Err(ServiceError::DownloadFailed("HTTP Error 500".to_string())) },
            |_, _| async {},
        )
        .await;
        assert!(matches!(result, Err(ServiceError::DownloadFailed(_))));
    }
}
