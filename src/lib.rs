//! fault-kit: client-side error classification, retry, and circuit breaking
//!
//! Turns heterogeneous, loosely-typed failures from network calls into a
//! closed taxonomy of classified errors, enriches them with diagnostic
//! context, decides whether and how to retry, and protects failing remote
//! endpoints from being hammered further.
//!
//! The typical composition wraps a transport call in the circuit breaker
//! first (fast-reject for known-bad endpoints), then in the retry executor
//! (bounded retries with backoff); failures pass through the classifier and
//! enricher before reaching the tracking sink and, finally, the caller:
//!
//! ```rust,no_run
//! use fault_kit::{CircuitBreaker, ErrorHandler, RetryConfig, with_retry};
//! use serde_json::Map;
//!
//! # async fn fetch() -> Result<String, fault_kit::TransportFailure> { Ok(String::new()) }
//! # async fn example() -> Result<String, fault_kit::ClassifiedError> {
//! let handler = ErrorHandler::new();
//! let breaker = CircuitBreaker::default();
//! let config = RetryConfig::default();
//!
//! breaker
//!     .call("/api/attractions", || {
//!         with_retry(&handler, &config, Map::new(), || fetch())
//!     })
//!     .await
//! # }
//! ```

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod circuit;
pub mod classify;
pub mod context;
pub mod error;
pub mod recovery;
pub mod retry;
pub mod telemetry;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig};
pub use classify::{
    Caught, ErrorHandler, TransportFailure, TransportResponse, ValidationFailure,
    ValidationIssue, redact_sensitive,
};
pub use context::{Enricher, SessionProvider};
pub use error::{AuthReason, ClassifiedError, ErrorKind, NetworkCode, Severity};
pub use recovery::recovery_suggestions;
pub use retry::{MAX_BACKOFF, RetryConfig, backoff_delay, with_retry, with_retry_cancellable};
pub use telemetry::{RecordingSink, TracingSink, TrackingSink};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
