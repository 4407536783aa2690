//! Failure classification
//!
//! Turns any caught value into exactly one [`ClassifiedError`]. The caller
//! hands over whatever the transport produced, wrapped in the [`Caught`]
//! input union; classification runs an ordered chain of typed matchers,
//! first match wins, and an unrecognized shape falls through to
//! [`ErrorKind::Unknown`] rather than escaping unclassified.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::context::Enricher;
use crate::error::{ClassifiedError, ErrorKind, NetworkCode};
use crate::recovery;
use crate::telemetry::{TracingSink, TrackingSink};

/// A transport failure, duck-typed: any HTTP client's error maps onto this
/// without the crate depending on the client library itself.
#[derive(Debug, Clone, Default)]
pub struct TransportFailure {
    pub message: String,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    /// Set when the request went out on the wire.
    pub request_sent: bool,
    pub timed_out: bool,
    pub code: Option<String>,
    pub response: Option<TransportResponse>,
}

/// A completed-but-erroring response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<Value>,
}

/// One issue out of a schema-validation failure.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub message: String,
    pub path: Vec<String>,
    pub code: String,
    pub received: Option<Value>,
}

/// A schema-validation failure: a recognizable name plus an issue list.
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub name: String,
    pub issues: Vec<ValidationIssue>,
}

/// Input union for [`ErrorHandler::handle`]. Everything a network call can
/// blow up with fits in here; nothing about it is assumed well-typed.
#[derive(Debug)]
pub enum Caught {
    /// Already classified; re-wrapped with merged context, never re-typed.
    Classified(ClassifiedError),
    Transport(TransportFailure),
    Validation(ValidationFailure),
    /// A generic error object.
    Error(Box<dyn std::error::Error + Send + Sync>),
    /// Anything else (a bare string, a JSON payload, null).
    Value(Value),
}

impl Caught {
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Caught::Error(Box::new(err))
    }
}

impl From<ClassifiedError> for Caught {
    fn from(err: ClassifiedError) -> Self {
        Caught::Classified(err)
    }
}

impl From<TransportFailure> for Caught {
    fn from(failure: TransportFailure) -> Self {
        Caught::Transport(failure)
    }
}

impl From<ValidationFailure> for Caught {
    fn from(failure: ValidationFailure) -> Self {
        Caught::Validation(failure)
    }
}

impl From<String> for Caught {
    fn from(message: String) -> Self {
        Caught::Value(Value::String(message))
    }
}

impl From<&str> for Caught {
    fn from(message: &str) -> Self {
        Caught::Value(Value::String(message.to_string()))
    }
}

impl From<Value> for Caught {
    fn from(value: Value) -> Self {
        Caught::Value(value)
    }
}

/// Field-name patterns whose values must never reach formatted output.
const SENSITIVE_PATTERNS: &[&str] = &["password", "token", "secret", "key"];

fn is_sensitive(name: &str) -> bool {
    let lower = name.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Classify-and-track entry point.
///
/// Owns the enricher, the tracking sink, and an optional connectivity probe.
/// Constructed once and passed by reference to call sites; per-test isolation
/// comes free with the handle.
pub struct ErrorHandler {
    enricher: Enricher,
    sink: Arc<dyn TrackingSink>,
    offline_probe: Option<Box<dyn Fn() -> bool + Send + Sync>>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

type MatchRule = fn(&ErrorHandler, &Caught) -> Option<ClassifiedError>;

/// Ordered classification chain; first match wins. The fallback (stringify
/// into Unknown) is applied separately so the chain itself stays total-free.
const CLASSIFICATION_CHAIN: &[MatchRule] = &[
    ErrorHandler::match_classified,
    ErrorHandler::match_transport_response,
    ErrorHandler::match_transport_no_response,
    ErrorHandler::match_validation,
    ErrorHandler::match_network_signature,
    ErrorHandler::match_error_object,
];

impl ErrorHandler {
    pub fn new() -> Self {
        Self {
            enricher: Enricher::new(),
            sink: Arc::new(TracingSink),
            offline_probe: None,
        }
    }

    pub fn with_enricher(mut self, enricher: Enricher) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TrackingSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Connectivity probe consulted when constructing network errors.
    pub fn with_offline_probe(
        mut self,
        probe: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.offline_probe = Some(Box::new(probe));
        self
    }

    /// Classify `raw`, merge and enrich context, forward once to the
    /// tracking sink, and return. Never fails.
    pub fn handle(&self, raw: impl Into<Caught>, context: Map<String, Value>) -> ClassifiedError {
        let raw = raw.into();
        let classified = self.classify(&raw);
        let classified = classified.with_context(context);
        let classified = ClassifiedError {
            context: self.enricher.enrich(classified.context),
            ..classified
        };

        tracing::debug!(
            kind = classified.kind.name(),
            severity = ?classified.severity,
            "classified failure: {}",
            classified.message
        );
        self.sink
            .track(&classified, &classified.context, classified.severity);
        classified
    }

    fn classify(&self, raw: &Caught) -> ClassifiedError {
        for rule in CLASSIFICATION_CHAIN {
            if let Some(classified) = rule(self, raw) {
                return classified;
            }
        }
        self.classify_other(raw)
    }

    fn probe_offline(&self) -> bool {
        self.offline_probe.as_ref().is_some_and(|probe| probe())
    }

    fn network_error(&self, message: &str, code: NetworkCode) -> ClassifiedError {
        let is_timeout =
            code == NetworkCode::Timeout || message.to_lowercase().contains("timeout");
        ClassifiedError::new(
            message,
            ErrorKind::Network {
                code,
                is_timeout,
                is_offline: self.probe_offline(),
            },
            Map::new(),
        )
    }

    // --- classification chain ---

    fn match_classified(&self, raw: &Caught) -> Option<ClassifiedError> {
        match raw {
            Caught::Classified(err) => Some(err.clone()),
            _ => None,
        }
    }

    fn match_transport_response(&self, raw: &Caught) -> Option<ClassifiedError> {
        let Caught::Transport(failure) = raw else {
            return None;
        };
        let response = failure.response.as_ref()?;

        let message = if failure.message.is_empty() {
            format!("Request failed with status {}", response.status)
        } else {
            failure.message.clone()
        };
        Some(ClassifiedError::new(
            message,
            ErrorKind::Api {
                status: response.status,
                endpoint: failure.endpoint.clone().unwrap_or_else(|| "unknown".to_string()),
                method: failure.method.clone().unwrap_or_else(|| "GET".to_string()),
                body: response.body.clone(),
            },
            Map::new(),
        ))
    }

    fn match_transport_no_response(&self, raw: &Caught) -> Option<ClassifiedError> {
        let Caught::Transport(failure) = raw else {
            return None;
        };
        if failure.response.is_some() || !failure.request_sent {
            return None;
        }

        let message = if failure.message.is_empty() {
            "No response received from server".to_string()
        } else {
            failure.message.clone()
        };
        let mut classified = self.network_error(&message, NetworkCode::NoResponse);
        if failure.timed_out
            && let ErrorKind::Network { is_timeout, .. } = &mut classified.kind
        {
            *is_timeout = true;
        }
        if let Some(endpoint) = &failure.endpoint {
            classified
                .context
                .insert("endpoint".to_string(), json!(endpoint));
        }
        Some(classified)
    }

    fn match_validation(&self, raw: &Caught) -> Option<ClassifiedError> {
        let Caught::Validation(failure) = raw else {
            return None;
        };
        let first = failure.issues.first()?;

        let field = if first.path.is_empty() {
            "input".to_string()
        } else {
            first.path.join(".")
        };
        let mut context = Map::new();
        context.insert("validator".to_string(), json!(failure.name));
        context.insert("issue_count".to_string(), json!(failure.issues.len()));
        Some(ClassifiedError::new(
            first.message.clone(),
            ErrorKind::Validation {
                field,
                value: first.received.clone(),
                rule: first.code.clone(),
            },
            context,
        ))
    }

    fn match_network_signature(&self, raw: &Caught) -> Option<ClassifiedError> {
        let message = match raw {
            Caught::Error(err) => err.to_string(),
            // Transport failure that never made it onto the wire.
            Caught::Transport(failure) if failure.response.is_none() => {
                if failure.timed_out {
                    return Some(self.network_error(&failure.message, NetworkCode::Timeout));
                }
                failure.message.clone()
            }
            _ => return None,
        };

        let lower = message.to_lowercase();
        if lower.contains("abort") || lower.contains("timeout") || lower.contains("timed out") {
            Some(self.network_error(&message, NetworkCode::Timeout))
        } else if lower.contains("econnrefused")
            || lower.contains("connection refused")
            || lower.contains("failed to fetch")
            || lower.contains("fetch")
        {
            Some(self.network_error(&message, NetworkCode::ConnectionFailed))
        } else {
            None
        }
    }

    fn match_error_object(&self, raw: &Caught) -> Option<ClassifiedError> {
        let Caught::Error(err) = raw else {
            return None;
        };

        let mut context = Map::new();
        context.insert("error_debug".to_string(), json!(format!("{err:?}")));
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(json!(cause.to_string()));
            source = cause.source();
        }
        if !chain.is_empty() {
            context.insert("error_chain".to_string(), Value::Array(chain));
        }
        Some(ClassifiedError::new(
            err.to_string(),
            ErrorKind::Unknown,
            context,
        ))
    }

    /// Fallback for non-error values: stringify and carry on.
    fn classify_other(&self, raw: &Caught) -> ClassifiedError {
        let message = match raw {
            Caught::Value(Value::String(s)) => s.clone(),
            Caught::Value(Value::Null) => "Unknown error (null)".to_string(),
            Caught::Value(value) => value.to_string(),
            // Only reachable when a chain rule declined its own variant.
            Caught::Transport(failure) => failure.message.clone(),
            Caught::Validation(failure) => format!("{} with no issues", failure.name),
            Caught::Classified(err) => err.message.clone(),
            Caught::Error(err) => err.to_string(),
        };
        ClassifiedError::new(message, ErrorKind::Unknown, Map::new())
    }

    // --- formatting ---

    /// User-facing message per the rule table, optionally with a
    /// parenthesized technical detail suffix. Sensitive field values never
    /// appear in the output.
    pub fn format_message(&self, error: &ClassifiedError, include_details: bool) -> String {
        let base = error.user_message();
        if !include_details {
            return base;
        }

        let detail = match &error.kind {
            ErrorKind::Api {
                status, endpoint, ..
            } => Some(format!(
                "Status: {status}, Endpoint: {}",
                scrub_endpoint(endpoint)
            )),
            ErrorKind::Validation { field, rule, .. } => {
                Some(format!("Field: {field}, Rule: {rule}"))
            }
            ErrorKind::Network { code, .. } => Some(format!("Code: {}", code.as_str())),
            _ => None,
        };

        match detail {
            Some(detail) => format!("{base} ({detail})"),
            None => base,
        }
    }

    /// See [`recovery::recovery_suggestions`].
    pub fn recovery_suggestions(&self, error: &ClassifiedError) -> Vec<String> {
        recovery::recovery_suggestions(error)
    }
}

/// Drop the query string from an endpoint before it reaches user-visible
/// output; query parameters are where credentials and keys leak.
fn scrub_endpoint(endpoint: &str) -> String {
    let path = endpoint.split(['?', '#']).next().unwrap_or(endpoint);
    if path
        .split(['/', '.', '-', '_'])
        .any(|segment| is_sensitive(segment) && !segment.is_empty())
    {
        "[redacted]".to_string()
    } else {
        path.to_string()
    }
}

/// Redact values of sensitive-named fields anywhere in a context tree.
/// Used by sinks that serialize full context.
pub fn redact_sensitive(context: &Map<String, Value>) -> Map<String, Value> {
    let mut redacted = Map::new();
    for (key, value) in context {
        if is_sensitive(key) {
            redacted.insert(key.clone(), json!("[redacted]"));
        } else if let Value::Object(nested) = value {
            redacted.insert(key.clone(), Value::Object(redact_sensitive(nested)));
        } else {
            redacted.insert(key.clone(), value.clone());
        }
    }
    redacted
}
