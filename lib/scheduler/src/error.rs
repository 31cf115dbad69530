//! Error types for the scheduler crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: persistence operations
//! - `ProviderError`: external timer provider operations
//! - `CallbackBridgeError`: provider callback validation
//! - `DispatchError`: execution dispatch failures
//! - `PredicateError`: conditional schedule evaluation failures
//! - `SchedulerError`: high-level schedule operations (wraps lower errors)
//!
//! Every enum maps into the flat [`ErrorKind`] taxonomy via `kind()`.

use minder_core::{ErrorKind, ScheduleId};
use std::fmt;

/// Errors from persistence operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Entity not found.
    NotFound { entity: &'static str, id: i64 },
    /// Unique or invariant constraint collided.
    Conflict { reason: String },
    /// Backing store failed.
    Backend { reason: String },
}

impl StoreError {
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

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Conflict { reason } => write!(f, "store conflict: {reason}"),
            Self::Backend { reason } => write!(f, "store backend failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the external timer provider adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Timer registration or update was rejected.
    RegistrationFailed { schedule_id: ScheduleId, reason: String },
    /// Provider could not be reached.
    Unavailable { reason: String },
    /// Provider call exceeded its deadline.
    Timeout,
}

impl ProviderError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            _ => ErrorKind::Provider,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegistrationFailed { schedule_id, reason } => {
                write!(f, "timer registration failed for {schedule_id}: {reason}")
            }
            Self::Unavailable { reason } => write!(f, "timer provider unavailable: {reason}"),
            Self::Timeout => write!(f, "timer provider call timed out"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors from provider callback validation and forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackBridgeError {
    /// Callback payload failed validation.
    InvalidPayload { reason: String },
    /// Storage lookup failed while checking idempotency.
    Storage { reason: String },
}

impl CallbackBridgeError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPayload { .. } => ErrorKind::Validation,
            Self::Storage { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for CallbackBridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPayload { reason } => write!(f, "invalid callback payload: {reason}"),
            Self::Storage { reason } => write!(f, "callback idempotency check failed: {reason}"),
        }
    }
}

impl std::error::Error for CallbackBridgeError {}

impl From<StoreError> for CallbackBridgeError {
    fn from(err: StoreError) -> Self {
        Self::Storage {
            reason: err.to_string(),
        }
    }
}

/// Errors from execution dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Schedule or execution missing.
    NotFound { entity: &'static str, id: i64 },
    /// Execution is not in a dispatchable state.
    InvalidState { reason: String },
    /// Persistence failed.
    Storage { reason: String },
    /// Timer provider failed while scheduling a retry.
    Provider { reason: String },
}

impl DispatchError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::Conflict,
            Self::Storage { .. } => ErrorKind::Internal,
            Self::Provider { .. } => ErrorKind::Provider,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidState { reason } => write!(f, "invalid dispatch state: {reason}"),
            Self::Storage { reason } => write!(f, "dispatch persistence failed: {reason}"),
            Self::Provider { reason } => write!(f, "retry scheduling failed: {reason}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Storage {
                reason: other.to_string(),
            },
        }
    }
}

impl From<ProviderError> for DispatchError {
    fn from(err: ProviderError) -> Self {
        Self::Provider {
            reason: err.to_string(),
        }
    }
}

/// Errors from predicate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// Schedule missing.
    NotFound { schedule_id: ScheduleId },
    /// Schedule is not a conditional schedule.
    WrongKind { schedule_id: ScheduleId },
    /// Schedule is not active.
    Inactive { schedule_id: ScheduleId },
    /// Definition is missing predicate fields.
    IncompleteDefinition { schedule_id: ScheduleId, reason: String },
    /// Persistence failed.
    Storage { reason: String },
}

impl PredicateError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::WrongKind { .. } | Self::Inactive { .. } => ErrorKind::Conflict,
            Self::IncompleteDefinition { .. } => ErrorKind::Validation,
            Self::Storage { .. } => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for PredicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { schedule_id } => write!(f, "schedule not found: {schedule_id}"),
            Self::WrongKind { schedule_id } => {
                write!(f, "schedule {schedule_id} is not a conditional schedule")
            }
            Self::Inactive { schedule_id } => write!(f, "schedule {schedule_id} is not active"),
            Self::IncompleteDefinition {
                schedule_id,
                reason,
            } => {
                write!(f, "incomplete predicate on schedule {schedule_id}: {reason}")
            }
            Self::Storage { reason } => write!(f, "evaluation persistence failed: {reason}"),
        }
    }
}

impl std::error::Error for PredicateError {}

impl From<StoreError> for PredicateError {
    fn from(err: StoreError) -> Self {
        Self::Storage {
            reason: err.to_string(),
        }
    }
}

/// High-level schedule operation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Input failed a validation rule.
    Validation { reason: String },
    /// Entity missing.
    NotFound { entity: &'static str, id: i64 },
    /// Illegal state transition or invariant collision.
    Conflict { reason: String },
    /// Attempted to mutate a field locked after creation.
    ImmutableField { field: &'static str },
    /// Timer provider failed; the mutation was rolled back.
    Provider { reason: String },
    /// Persistence failed.
    Storage { reason: String },
}

impl SchedulerError {
    /// Maps this error into the flat taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::ImmutableField { .. } => ErrorKind::ImmutableField,
            Self::Provider { .. } => ErrorKind::Provider,
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

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { reason } => write!(f, "validation failed: {reason}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Conflict { reason } => write!(f, "conflict: {reason}"),
            Self::ImmutableField { field } => {
                write!(f, "field '{field}' is immutable after creation")
            }
            Self::Provider { reason } => write!(f, "timer provider failed: {reason}"),
            Self::Storage { reason } => write!(f, "schedule persistence failed: {reason}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Conflict { reason } => Self::Conflict { reason },
            StoreError::Backend { reason } => Self::Storage { reason },
        }
    }
}

impl From<ProviderError> for SchedulerError {
    fn from(err: ProviderError) -> Self {
        Self::Provider {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_error_kinds() {
        assert_eq!(
            SchedulerError::validation("bad").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            SchedulerError::ImmutableField {
                field: "task_intent_id"
            }
            .kind(),
            ErrorKind::ImmutableField
        );
        assert_eq!(
            SchedulerError::Provider {
                reason: "down".to_string()
            }
            .kind(),
            ErrorKind::Provider
        );
    }

    #[test]
    fn store_error_maps_to_scheduler_error() {
        let err: SchedulerError = StoreError::NotFound {
            entity: "schedule",
            id: 9,
        }
        .into();
        assert!(matches!(err, SchedulerError::NotFound { id: 9, .. }));
    }

    #[test]
    fn callback_bridge_error_display() {
        let err = CallbackBridgeError::InvalidPayload {
            reason: "trace_id is required".to_string(),
        };
        assert!(err.to_string().contains("trace_id is required"));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn predicate_error_display() {
        let err = PredicateError::WrongKind {
            schedule_id: ScheduleId::from_i64(3),
        };
        assert!(err.to_string().contains("not a conditional schedule"));
    }
}
