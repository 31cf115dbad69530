//! Error types for the commitment crate.

use minder_core::{CommitmentId, ErrorKind};
use std::fmt;

use crate::commitment::CommitmentState;

/// Errors from commitment persistence operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitmentStoreError {
    /// Entity not found.
    NotFound { entity: &'static str, id: i64 },
    /// Unique or invariant constraint collided.
    Conflict { reason: String },
    /// Backing store failed.
    Backend { reason: String },
}

impl CommitmentStoreError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Backend { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for CommitmentStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Conflict { reason } => write!(f, "commitment store conflict: {reason}"),
            Self::Backend { reason } => write!(f, "commitment store failed: {reason}"),
        }
    }
}

impl std::error::Error for CommitmentStoreError {}

/// High-level commitment operation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitmentError {
    /// Input failed a validation rule.
    Validation { reason: String },
    /// Entity missing.
    NotFound { entity: &'static str, id: i64 },
    /// Illegal state transition.
    IllegalTransition {
        commitment_id: CommitmentId,
        from: CommitmentState,
        to: CommitmentState,
    },
    /// Invariant collision.
    Conflict { reason: String },
    /// Persistence failed.
    Storage { reason: String },
}

impl CommitmentError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::IllegalTransition { .. } | Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage { .. } => ErrorKind::Internal,
        }
    }

    /// Builds a validation error.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CommitmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { reason } => write!(f, "validation failed: {reason}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::IllegalTransition {
                commitment_id,
                from,
                to,
            } => write!(
                f,
                "illegal transition for {commitment_id}: {} -> {}",
                from.as_str(),
                to.as_str()
            ),
            Self::Conflict { reason } => write!(f, "conflict: {reason}"),
            Self::Storage { reason } => write!(f, "commitment persistence failed: {reason}"),
        }
    }
}

impl std::error::Error for CommitmentError {}

impl From<CommitmentStoreError> for CommitmentError {
    fn from(err: CommitmentStoreError) -> Self {
        match err {
            CommitmentStoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            CommitmentStoreError::Conflict { reason } => Self::Conflict { reason },
            CommitmentStoreError::Backend { reason } => Self::Storage { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_display() {
        let err = CommitmentError::IllegalTransition {
            commitment_id: CommitmentId::from_i64(5),
            from: CommitmentState::Completed,
            to: CommitmentState::Open,
        };
        assert!(err.to_string().contains("COMPLETED -> OPEN"));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn store_error_mapping() {
        let err: CommitmentError = CommitmentStoreError::NotFound {
            entity: "commitment",
            id: 3,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
