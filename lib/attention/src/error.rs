//! Error types for the attention crate.
//!
//! - `AttentionStoreError`: persistence operations
//! - `TransportError`: delivery attempts, including router violations
//! - `RouterError`: pipeline failures

use minder_core::ErrorKind;
use std::fmt;

/// Errors from attention persistence operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttentionStoreError {
    /// Entity not found.
    NotFound { entity: &'static str, id: i64 },
    /// Backing store failed.
    Backend { reason: String },
}

impl AttentionStoreError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Backend { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for AttentionStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Backend { reason } => write!(f, "attention store failed: {reason}"),
        }
    }
}

impl std::error::Error for AttentionStoreError {}

/// Errors from transport delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Delivery attempted without the router-active flag.
    RouterViolation {
        source_component: String,
        channel: String,
    },
    /// The transport rejected the message.
    SendFailed { reason: String },
    /// The transport could not be reached.
    Unavailable { reason: String },
}

impl TransportError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RouterViolation { .. } => ErrorKind::RouterViolation,
            Self::SendFailed { .. } | Self::Unavailable { .. } => ErrorKind::Provider,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RouterViolation {
                source_component,
                channel,
            } => write!(
                f,
                "direct notification blocked for {source_component}/{channel}"
            ),
            Self::SendFailed { reason } => write!(f, "transport send failed: {reason}"),
            Self::Unavailable { reason } => write!(f, "transport unavailable: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors from the routing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Persistence failed mid-pipeline.
    Storage { reason: String },
    /// The policy engine is unavailable; the caller should fail closed.
    PolicyUnavailable { reason: String },
}

impl RouterError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { .. } => ErrorKind::Internal,
            Self::PolicyUnavailable { .. } => ErrorKind::FailClosed,
        }
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { reason } => write!(f, "routing persistence failed: {reason}"),
            Self::PolicyUnavailable { reason } => write!(f, "policy engine unavailable: {reason}"),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<AttentionStoreError> for RouterError {
    fn from(err: AttentionStoreError) -> Self {
        Self::Storage {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_violation_kind() {
        let err = TransportError::RouterViolation {
            source_component: "reviews".to_string(),
            channel: "signal".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::RouterViolation);
        assert!(err.to_string().contains("direct notification blocked"));
    }

    #[test]
    fn policy_unavailable_is_fail_closed() {
        let err = RouterError::PolicyUnavailable {
            reason: "policy table unreadable".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::FailClosed);
    }
}
