//! Retry executor with exponential backoff
//!
//! Runs an operation, classifies each failure through the [`ErrorHandler`],
//! and retries only when the classified error says retrying can help. Delays
//! double per attempt with bounded jitter and cap at [`MAX_BACKOFF`].

use std::time::Duration;

use rand::Rng;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::classify::{Caught, ErrorHandler};
use crate::error::{ClassifiedError, ErrorKind};

/// Hard ceiling on any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt after that.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Backoff delay for a 0-based attempt index:
/// `min(base * 2^attempt + jitter, 30s)` with jitter uniform in
/// `[0, 0.1 * base * 2^attempt)`. Non-decreasing in expectation, capped.
pub fn backoff_delay(attempt: u32, base_delay: Duration) -> Duration {
    let exponential = base_delay.as_millis() as f64 * 2f64.powi(attempt.min(1024) as i32);
    let jitter = rand::rng().random_range(0.0..0.1) * exponential;
    let delay_ms = (exponential + jitter).min(MAX_BACKOFF.as_millis() as f64);
    Duration::from_millis(delay_ms as u64)
}

/// Execute `operation` with classified-retry semantics.
///
/// Non-retryable failures surface immediately; retryable ones are retried
/// with backoff until `max_attempts` is reached, then the last classified
/// error surfaces. Each failure passes through [`ErrorHandler::handle`]
/// (enrichment plus one tracking call) before the retry decision.
pub async fn with_retry<T, E, F, Fut>(
    handler: &ErrorHandler,
    config: &RetryConfig,
    context: Map<String, Value>,
    mut operation: F,
) -> Result<T, ClassifiedError>
where
    E: Into<Caught>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(raw) => {
                let mut attempt_context = context.clone();
                attempt_context.insert("attempt".to_string(), json!(attempt));
                let classified = handler.handle(raw, attempt_context);

                if !classified.is_retryable() {
                    return Err(classified);
                }
                if attempt + 1 >= config.max_attempts {
                    tracing::warn!(
                        kind = classified.kind.name(),
                        attempts = config.max_attempts,
                        "retries exhausted: {}",
                        classified.message
                    );
                    return Err(classified);
                }

                let delay = backoff_delay(attempt, config.base_delay);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off: {}",
                    classified.message
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// [`with_retry`] with external cancellation. Checked before each attempt
/// and honored during backoff sleeps; an aborted call surfaces a classified
/// error carrying `cancelled: true` without invoking the operation again.
pub async fn with_retry_cancellable<T, E, F, Fut>(
    handler: &ErrorHandler,
    config: &RetryConfig,
    context: Map<String, Value>,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, ClassifiedError>
where
    E: Into<Caught>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled_error());
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(raw) => {
                let mut attempt_context = context.clone();
                attempt_context.insert("attempt".to_string(), json!(attempt));
                let classified = handler.handle(raw, attempt_context);

                if !classified.is_retryable() {
                    return Err(classified);
                }
                if attempt + 1 >= config.max_attempts {
                    return Err(classified);
                }

                let delay = backoff_delay(attempt, config.base_delay);
                if wait_with_cancel(cancel, delay).await.is_err() {
                    return Err(cancelled_error());
                }
                attempt += 1;
            }
        }
    }
}

async fn wait_with_cancel(cancel: &CancellationToken, duration: Duration) -> Result<(), ()> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(()),
    }
}

fn cancelled_error() -> ClassifiedError {
    let mut context = Map::new();
    context.insert("cancelled".to_string(), Value::Bool(true));
    ClassifiedError::new(
        "Operation cancelled before completion",
        ErrorKind::Unknown,
        context,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{TransportFailure, TransportResponse};
    use crate::error::AuthReason;
    use crate::telemetry::RecordingSink;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    fn quiet_handler() -> ErrorHandler {
        ErrorHandler::new().with_sink(Arc::new(RecordingSink::new()))
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    fn server_error() -> TransportFailure {
        TransportFailure {
            message: "Request failed with status code 500".to_string(),
            endpoint: Some("/api/test".to_string()),
            method: Some("GET".to_string()),
            request_sent: true,
            response: Some(TransportResponse {
                status: 500,
                body: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_delay_first_attempt_range() {
        for _ in 0..100 {
            let delay = backoff_delay(0, Duration::from_millis(1000)).as_millis();
            assert!((1000..1200).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_backoff_delay_doubles() {
        for _ in 0..20 {
            assert!(backoff_delay(1, Duration::from_millis(1000)).as_millis() >= 2000);
            assert!(backoff_delay(2, Duration::from_millis(1000)).as_millis() >= 4000);
        }
    }

    #[test]
    fn test_backoff_delay_capped_at_30s() {
        for attempt in [5, 10, 31, 64, 1000, u32::MAX] {
            let delay = backoff_delay(attempt, Duration::from_millis(1000));
            assert!(delay <= MAX_BACKOFF, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn test_backoff_lower_bound_non_decreasing() {
        // The deterministic component doubles per attempt until the cap.
        let mut previous = 0u128;
        for attempt in 0..8 {
            let floor = 100u128 << attempt;
            let delay = backoff_delay(attempt, Duration::from_millis(100)).as_millis();
            assert!(delay >= floor.min(MAX_BACKOFF.as_millis()));
            assert!(floor >= previous);
            previous = floor;
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let handler = quiet_handler();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = with_retry(&handler, &fast_config(3), Map::new(), move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(server_error())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "invoked exactly 3 times");
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts_with_classified_error() {
        let sink = Arc::new(RecordingSink::new());
        let handler = ErrorHandler::new().with_sink(sink.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<i32, _> =
            with_retry(&handler, &fast_config(3), Map::new(), move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(server_error())
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Api { status: 500, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.len(), 3, "every failed attempt is tracked");
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let handler = quiet_handler();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<i32, _> =
            with_retry(&handler, &fast_config(5), Map::new(), move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(ClassifiedError::new(
                        "session expired",
                        ErrorKind::Authentication {
                            reason: AuthReason::Expired,
                        },
                        Map::new(),
                    ))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Authentication { .. }));
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "non-retryable errors are not retried"
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_prevents_invocation() {
        let handler = quiet_handler();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<i32, _> = with_retry_cancellable(
            &handler,
            &fast_config(3),
            Map::new(),
            &cancel,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(server_error())
                }
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.context.get("cancelled"), Some(&Value::Bool(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellable_happy_path() {
        let handler = quiet_handler();
        let cancel = CancellationToken::new();

        let result = with_retry_cancellable(
            &handler,
            &fast_config(3),
            Map::new(),
            &cancel,
            || async { Ok::<_, TransportFailure>("done") },
        )
        .await;

        assert_eq!(tokio_test::assert_ok!(result), "done");
    }
}
