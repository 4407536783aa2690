//! Recovery suggestions
//!
//! Human-actionable next steps per error kind. Lists are ordered, never
//! empty, and never contain duplicates.

use crate::error::{ClassifiedError, ErrorKind};

const FALLBACK: &[&str] = &[
    "Refresh the page",
    "Try again later",
    "Contact support if the problem persists",
];

/// Ordered, deduplicated suggestions for recovering from `error`.
pub fn recovery_suggestions(error: &ClassifiedError) -> Vec<String> {
    let mut suggestions: Vec<String> = Vec::new();

    match &error.kind {
        ErrorKind::Network { is_timeout, .. } => {
            push_unique(&mut suggestions, "Check your internet connection");
            if *is_timeout {
                push_unique(&mut suggestions, "Try again in a few moments");
            }
            push_unique(&mut suggestions, "Refresh the page");
        }
        ErrorKind::Api { status, .. } => {
            if *status == 401 {
                push_unique(&mut suggestions, "Log in again");
            }
            if *status == 403 {
                push_unique(
                    &mut suggestions,
                    "Contact support if you believe this is an error",
                );
            }
            if error.is_retryable() {
                // "Try again" prepends to a base list; with no status rule
                // matched the base is the generic fallback.
                if suggestions.is_empty() {
                    for suggestion in FALLBACK {
                        push_unique(&mut suggestions, suggestion);
                    }
                }
                prepend_unique(&mut suggestions, "Try again in a few moments");
            }
        }
        ErrorKind::Validation { .. } => {
            push_unique(&mut suggestions, "Check your input and try again");
            push_unique(&mut suggestions, "Make sure all required fields are filled");
        }
        ErrorKind::Authentication { .. } => {
            push_unique(&mut suggestions, "Log in again");
            push_unique(&mut suggestions, "Clear your browser cache and cookies");
        }
        ErrorKind::Permission { .. } | ErrorKind::Unknown => {}
    }

    if suggestions.is_empty() {
        for suggestion in FALLBACK {
            push_unique(&mut suggestions, suggestion);
        }
    }
    suggestions
}

fn push_unique(suggestions: &mut Vec<String>, suggestion: &str) {
    if !suggestions.iter().any(|existing| existing == suggestion) {
        suggestions.push(suggestion.to_string());
    }
}

fn prepend_unique(suggestions: &mut Vec<String>, suggestion: &str) {
    if !suggestions.iter().any(|existing| existing == suggestion) {
        suggestions.insert(0, suggestion.to_string());
    }
}
