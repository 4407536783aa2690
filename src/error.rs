//! Error taxonomy for classified network failures
//!
//! Every failure that passes through this crate ends up as a
//! [`ClassifiedError`]: a message, a closed [`ErrorKind`], a derived
//! [`Severity`], and an open diagnostic context map. Severity and
//! retryability are pure functions of the kind and its fields; nothing
//! sets them ad hoc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Four-level ordinal severity, derived from kind and kind-specific fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Network failure codes attached to [`ErrorKind::Network`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkCode {
    Timeout,
    NoResponse,
    ConnectionFailed,
    ConnectionRefused,
    Other(String),
}

impl NetworkCode {
    pub fn as_str(&self) -> &str {
        match self {
            NetworkCode::Timeout => "TIMEOUT",
            NetworkCode::NoResponse => "NO_RESPONSE",
            NetworkCode::ConnectionFailed => "CONNECTION_FAILED",
            NetworkCode::ConnectionRefused => "ECONNREFUSED",
            NetworkCode::Other(code) => code,
        }
    }
}

/// Why an authentication failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthReason {
    Expired,
    Invalid,
    Required,
    Other,
}

/// The closed set of error kinds. Kind-specific fields live on the variant;
/// everything else goes in the context map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    Api {
        status: u16,
        endpoint: String,
        method: String,
        body: Option<Value>,
    },
    Validation {
        field: String,
        value: Option<Value>,
        rule: String,
    },
    Network {
        code: NetworkCode,
        is_timeout: bool,
        is_offline: bool,
    },
    Authentication {
        reason: AuthReason,
    },
    Permission {
        resource: String,
        action: String,
    },
    Unknown,
}

impl ErrorKind {
    /// Severity rule table. Pure function of the kind and its fields.
    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::Api { status, .. } => match status {
                s if *s >= 500 => Severity::High,
                401 | 403 => Severity::Medium,
                404 | 422 => Severity::Low,
                429 => Severity::Medium,
                _ => Severity::Medium,
            },
            ErrorKind::Validation { .. } => Severity::Low,
            ErrorKind::Network { .. } => Severity::Medium,
            ErrorKind::Authentication { .. } => Severity::Medium,
            ErrorKind::Permission { .. } => Severity::Medium,
            ErrorKind::Unknown => Severity::Medium,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Api { .. } => "api",
            ErrorKind::Validation { .. } => "validation",
            ErrorKind::Network { .. } => "network",
            ErrorKind::Authentication { .. } => "authentication",
            ErrorKind::Permission { .. } => "permission",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// A failure that has been classified into the taxonomy.
///
/// Immutable after construction; [`ClassifiedError::with_context`] produces a
/// new instance with merged context rather than mutating in place.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ClassifiedError {
    pub message: String,
    #[serde(flatten)]
    pub kind: ErrorKind,
    pub severity: Severity,
    pub context: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ClassifiedError {
    /// Construct a classified error. Severity is derived from the kind here
    /// and nowhere else.
    pub fn new(message: impl Into<String>, kind: ErrorKind, context: Map<String, Value>) -> Self {
        let severity = kind.severity();
        Self {
            message: message.into(),
            kind,
            severity,
            context,
            timestamp: Utc::now(),
        }
    }

    /// Re-wrap with additional context. Kind, fields, and message are
    /// preserved; the new context is deep-merged over the old one, so old
    /// keys survive unless explicitly overridden.
    #[must_use]
    pub fn with_context(&self, extra: Map<String, Value>) -> Self {
        let mut merged = self.context.clone();
        deep_merge(&mut merged, extra);
        Self {
            message: self.message.clone(),
            kind: self.kind.clone(),
            severity: self.kind.severity(),
            context: merged,
            timestamp: Utc::now(),
        }
    }

    /// Whether re-attempting the same operation is safe and potentially
    /// successful.
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            ErrorKind::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            ErrorKind::Network { .. } => {
                // Retryable unless the context explicitly opts out.
                self.context.get("retryable") != Some(&Value::Bool(false))
            }
            _ => false,
        }
    }

    /// Default user-facing message per the rule table. A caller-supplied
    /// `user_message` context key overrides every rule.
    pub fn user_message(&self) -> String {
        if let Some(Value::String(msg)) = self.context.get("user_message") {
            return msg.clone();
        }

        match &self.kind {
            ErrorKind::Api { status, .. } => match status {
                401 => "Please log in to continue.".to_string(),
                403 => "You don't have permission to perform this action.".to_string(),
                404 => "The requested resource was not found.".to_string(),
                429 => "Too many requests. Please wait a moment and try again.".to_string(),
                s if *s >= 500 => "A server error occurred. Please try again later.".to_string(),
                _ => "Something went wrong. Please try again.".to_string(),
            },
            ErrorKind::Validation { field, rule, .. } => {
                if rule == "required" {
                    format!("{} is required.", capitalize(field))
                } else {
                    format!("{} is invalid.", capitalize(field))
                }
            }
            ErrorKind::Network {
                is_timeout,
                is_offline,
                ..
            } => {
                if *is_offline {
                    "You appear to be offline. Please check your connection.".to_string()
                } else if *is_timeout {
                    "The request timed out. Please try again.".to_string()
                } else {
                    "A network error occurred. Please check your connection.".to_string()
                }
            }
            ErrorKind::Authentication { reason } => match reason {
                AuthReason::Expired => {
                    "Your session has expired. Please log in again.".to_string()
                }
                AuthReason::Invalid => "Invalid credentials. Please try again.".to_string(),
                AuthReason::Required => "Please log in to continue.".to_string(),
                AuthReason::Other => "Authentication failed. Please log in again.".to_string(),
            },
            ErrorKind::Permission { .. } => {
                "You don't have permission to access this resource.".to_string()
            }
            ErrorKind::Unknown => "An unexpected error occurred. Please try again.".to_string(),
        }
    }
}

/// Merge `overlay` into `base`, recursing into nested objects so that
/// sibling keys on both sides survive.
pub(crate) fn deep_merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
