//! Error types for the AI crate.

use minder_core::ErrorKind;
use std::fmt;

/// Errors from LLM backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Provider is unavailable.
    ProviderUnavailable { reason: String },
    /// Request failed.
    RequestFailed { reason: String },
    /// Response could not be interpreted.
    ResponseParseFailed { reason: String },
    /// Timeout waiting for response.
    Timeout,
}

impl LlmError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            _ => ErrorKind::Provider,
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { reason } => {
                write!(f, "LLM provider unavailable: {reason}")
            }
            Self::RequestFailed { reason } => write!(f, "LLM request failed: {reason}"),
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse LLM response: {reason}")
            }
            Self::Timeout => write!(f, "LLM request timed out"),
        }
    }
}

impl std::error::Error for LlmError {}
