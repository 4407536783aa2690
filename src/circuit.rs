//! Per-endpoint circuit breaker
//!
//! Two logical states per endpoint key: CLOSED (calls pass through) and
//! OPEN (calls fast-fail with a classified 503). No half-open probing: once
//! the recovery timeout elapses the state resets and the next call goes
//! through normally. State lives behind an owned handle, injected into call
//! sites, never ambient globals; the key map is a bounded LRU so arbitrary
//! caller-supplied keys cannot grow it without bound.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde_json::{Map, Value};

use crate::error::{ClassifiedError, ErrorKind};

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit stays open before resetting.
    pub recovery_timeout: Duration,
    /// Maximum endpoint keys tracked at once (LRU-evicted beyond this).
    pub max_endpoints: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_millis(60_000),
            max_endpoints: 1024,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct EndpointState {
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Per-endpoint failure bookkeeping and call gating.
pub struct CircuitBreaker {
    endpoints: Mutex<LruCache<String, EndpointState>>,
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_endpoints).unwrap_or(NonZeroUsize::MIN);
        Self {
            endpoints: Mutex::new(LruCache::new(capacity)),
            config,
        }
    }

    /// Record a failed call against `key`.
    pub fn record_failure(&self, key: &str) {
        let Ok(mut endpoints) = self.endpoints.lock() else {
            return;
        };
        let state = endpoints.get_or_insert_mut(key.to_string(), EndpointState::default);
        state.failure_count += 1;
        state.last_failure_at = Some(Instant::now());
        if state.failure_count == self.config.failure_threshold {
            tracing::warn!(
                endpoint = key,
                failures = state.failure_count,
                "circuit opened"
            );
        }
    }

    /// Record a successful call against `key`, closing the circuit.
    pub fn record_success(&self, key: &str) {
        let Ok(mut endpoints) = self.endpoints.lock() else {
            return;
        };
        if let Some(state) = endpoints.get_mut(key) {
            if state.failure_count >= self.config.failure_threshold {
                tracing::info!(endpoint = key, "circuit closed after success");
            }
            state.failure_count = 0;
            state.last_failure_at = None;
        }
    }

    /// Whether calls against `key` should be rejected right now.
    pub fn is_open(&self, key: &str) -> bool {
        self.is_open_at(key, Instant::now())
    }

    /// [`CircuitBreaker::is_open`] against an explicit clock reading. An
    /// elapsed recovery timeout resets the endpoint state as a side effect.
    /// The read-check-write sequence runs under a single lock.
    pub fn is_open_at(&self, key: &str, now: Instant) -> bool {
        let Ok(mut endpoints) = self.endpoints.lock() else {
            return false;
        };
        let Some(state) = endpoints.get_mut(key) else {
            return false;
        };
        if state.failure_count < self.config.failure_threshold {
            return false;
        }
        if let Some(last_failure) = state.last_failure_at
            && now.saturating_duration_since(last_failure) > self.config.recovery_timeout
        {
            tracing::info!(endpoint = key, "circuit recovery timeout elapsed, closing");
            state.failure_count = 0;
            state.last_failure_at = None;
            return false;
        }
        true
    }

    /// Current failure count for `key`. Zero for untracked keys.
    pub fn failure_count(&self, key: &str) -> u32 {
        self.endpoints
            .lock()
            .ok()
            .and_then(|mut endpoints| endpoints.get(key).map(|state| state.failure_count))
            .unwrap_or(0)
    }

    /// Number of endpoint keys currently tracked.
    pub fn tracked_endpoints(&self) -> usize {
        self.endpoints
            .lock()
            .map(|endpoints| endpoints.len())
            .unwrap_or(0)
    }

    /// Gate `operation` behind the circuit for `key`.
    ///
    /// An open circuit fails immediately with a classified 503 carrying the
    /// `circuit_breaker_open` context flag, without invoking the operation
    /// or recording a further failure. Otherwise the operation runs once and
    /// its outcome updates the endpoint state; the original result is
    /// propagated. Retry wrapping belongs *inside* this gate so the circuit
    /// check happens once per logical call, not once per attempt.
    pub async fn call<T, F, Fut>(&self, key: &str, operation: F) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        if self.is_open(key) {
            tracing::debug!(endpoint = key, "circuit open, rejecting call");
            return Err(self.open_error(key));
        }

        match operation().await {
            Ok(value) => {
                self.record_success(key);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(key);
                Err(err)
            }
        }
    }

    fn open_error(&self, key: &str) -> ClassifiedError {
        let mut context = Map::new();
        context.insert("circuit_breaker_open".to_string(), Value::Bool(true));
        ClassifiedError::new(
            "Service temporarily unavailable",
            ErrorKind::Api {
                status: 503,
                endpoint: key.to_string(),
                method: "ANY".to_string(),
                body: None,
            },
            context,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::default()
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let cb = breaker();
        for i in 0..5 {
            assert!(!cb.is_open("/x"), "not open after {i} failures");
            cb.record_failure("/x");
        }
        assert!(cb.is_open("/x"));
    }

    #[test]
    fn test_recovery_timeout_resets_state() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure("/x");
        }
        assert!(cb.is_open("/x"));

        let later = Instant::now() + Duration::from_millis(61_000);
        assert!(!cb.is_open_at("/x", later));
        assert_eq!(cb.failure_count("/x"), 0);

        // Counting starts over after recovery.
        cb.record_failure("/x");
        assert_eq!(cb.failure_count("/x"), 1);
        assert!(!cb.is_open("/x"));
    }

    #[test]
    fn test_success_closes_circuit_at_any_point() {
        let cb = breaker();
        for _ in 0..7 {
            cb.record_failure("/x");
        }
        assert!(cb.is_open("/x"));

        cb.record_success("/x");
        assert_eq!(cb.failure_count("/x"), 0);
        assert!(!cb.is_open("/x"));
    }

    #[test]
    fn test_keys_are_independent() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure("/bad");
        }
        assert!(cb.is_open("/bad"));
        assert!(!cb.is_open("/good"));
    }

    #[test]
    fn test_endpoint_map_is_bounded() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_endpoints: 2,
            ..Default::default()
        });
        for key in ["/a", "/b", "/c", "/d"] {
            cb.record_failure(key);
        }
        assert!(cb.tracked_endpoints() <= 2);
    }

    #[tokio::test]
    async fn test_call_rejects_when_open_without_invoking() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure("/x");
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: Result<i32, _> = cb
            .call("/x", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Api { status: 503, .. }));
        assert_eq!(
            err.context.get("circuit_breaker_open"),
            Some(&Value::Bool(true))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0, "operation not invoked");
        // Rejection itself records no additional failure.
        assert_eq!(cb.failure_count("/x"), 5);
    }

    #[tokio::test]
    async fn test_call_records_outcomes() {
        let cb = breaker();

        let failing: Result<i32, _> = cb
            .call("/y", || async {
                Err(ClassifiedError::new(
                    "boom",
                    ErrorKind::Unknown,
                    Map::new(),
                ))
            })
            .await;
        assert!(failing.is_err());
        assert_eq!(cb.failure_count("/y"), 1);

        let ok = cb.call("/y", || async { Ok(7) }).await;
        assert_eq!(tokio_test::assert_ok!(ok), 7);
        assert_eq!(cb.failure_count("/y"), 0);
    }

    #[tokio::test]
    async fn test_call_propagates_original_error() {
        let cb = breaker();
        let result: Result<i32, _> = cb
            .call("/z", || async {
                Err(ClassifiedError::new(
                    "original failure",
                    ErrorKind::Unknown,
                    Map::new(),
                ))
            })
            .await;
        assert_eq!(result.unwrap_err().message, "original failure");
    }
}
