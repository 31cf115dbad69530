//! Error handling foundation for the minder platform.
//!
//! This module provides the `Result` type alias using rootcause and the
//! flat error-kind taxonomy shared by every crate. Each crate defines
//! its own domain-specific error types in its own error module; those
//! types map into [`ErrorKind`] so callers can branch on the flat
//! taxonomy without knowing the concrete error enum.

use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer adds its own context via `.context()` as errors propagate.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

/// The flat error taxonomy shared across crates.
///
/// There is no type hierarchy: every domain error maps to exactly one
/// of these kinds via its `kind()` accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input shape or contract violation; caller-visible, never retried.
    Validation,
    /// Entity missing; caller-visible.
    NotFound,
    /// State-machine or invariant collision; caller-visible.
    Conflict,
    /// Attempted to mutate a field locked after creation.
    ImmutableField,
    /// Downstream timer/transport/LLM failure; may be retried per policy.
    Provider,
    /// Direct delivery attempted outside the router.
    RouterViolation,
    /// Router or policy path unavailable; the signal was queued.
    FailClosed,
    /// Deadline passed.
    Timeout,
    /// Caller-driven cancellation.
    Canceled,
    /// Unexpected failure, surfaced as opaque to callers.
    Internal,
}

impl ErrorKind {
    /// Returns the canonical wire string for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ImmutableField => "immutable_field",
            Self::Provider => "provider_error",
            Self::RouterViolation => "router_violation",
            Self::FailClosed => "fail_closed",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Internal => "internal_error",
        }
    }

    /// Returns true when the kind may be retried internally.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_wire_strings() {
        assert_eq!(ErrorKind::Validation.as_str(), "validation_error");
        assert_eq!(ErrorKind::ImmutableField.as_str(), "immutable_field");
        assert_eq!(ErrorKind::RouterViolation.as_str(), "router_violation");
        assert_eq!(ErrorKind::Internal.as_str(), "internal_error");
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Provider.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
    }

    #[test]
    fn error_kind_serde_form() {
        let json = serde_json::to_string(&ErrorKind::FailClosed).expect("serialize");
        assert_eq!(json, "\"fail_closed\"");
    }
}
