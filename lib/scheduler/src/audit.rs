//! Append-only audit records for schedule mutations, execution
//! lifecycle transitions, and predicate evaluations.
//!
//! Audit rows retain denormalized entity ids so they survive entity
//! deletion. Each row carries the actor and the trace id that caused
//! the event.

use chrono::{DateTime, Utc};
use minder_core::{Actor, ExecutionId, ScheduleId, TaskIntentId, TraceId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::execution::ExecutionStatus;
use crate::predicate::EvaluationStatus;
use crate::schedule::{PredicateOperator, PredicateValueType};

/// What happened to a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleAuditAction {
    Created,
    Updated,
    Paused,
    Resumed,
    Canceled,
    Completed,
    Deleted,
    /// A run outcome was recorded on the schedule.
    RunRecorded,
    /// A predicate evaluation outcome was recorded on the schedule.
    EvaluationRecorded,
}

impl ScheduleAuditAction {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Canceled => "canceled",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
            Self::RunRecorded => "run_recorded",
            Self::EvaluationRecorded => "evaluation_recorded",
        }
    }
}

/// A single field change in a mutation diff summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// The field that changed.
    pub field: String,
    /// Value before the mutation.
    pub before: JsonValue,
    /// Value after the mutation.
    pub after: JsonValue,
}

impl FieldChange {
    /// Creates a field change.
    #[must_use]
    pub fn new(field: impl Into<String>, before: JsonValue, after: JsonValue) -> Self {
        Self {
            field: field.into(),
            before,
            after,
        }
    }
}

/// Input for one schedule-mutation audit row.
///
/// The store assigns the row id and, for creations, back-fills the
/// schedule id once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAuditEntry {
    /// The mutated schedule (denormalized).
    pub schedule_id: ScheduleId,
    /// The schedule's task intent (denormalized).
    pub task_intent_id: TaskIntentId,
    /// What happened.
    pub action: ScheduleAuditAction,
    /// Who caused it.
    pub actor: Actor,
    /// The trace that caused it, when timer-driven.
    pub trace_id: Option<TraceId>,
    /// Free-form reason.
    pub reason: Option<String>,
    /// Before/after diff summary.
    pub changes: Vec<FieldChange>,
    /// When the mutation occurred.
    pub occurred_at: DateTime<Utc>,
}

/// A persisted schedule-mutation audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAuditRecord {
    /// Store-assigned row id.
    pub id: i64,
    /// The audited entry.
    pub entry: ScheduleAuditEntry,
}

/// Input for one execution-lifecycle audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAuditEntry {
    /// The execution (denormalized).
    pub execution_id: ExecutionId,
    /// The execution's schedule (denormalized).
    pub schedule_id: ScheduleId,
    /// The execution's trace id (denormalized).
    pub trace_id: TraceId,
    /// Status the execution transitioned to.
    pub status: ExecutionStatus,
    /// Who caused the transition.
    pub actor: Actor,
    /// Free-form reason or error detail.
    pub reason: Option<String>,
    /// When the transition occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Input for one predicate-evaluation audit row.
///
/// `evaluation_id` is unique: a second row with the same id is refused
/// by the store, making evaluation recording idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateEvaluationAuditEntry {
    /// Provider-supplied unique evaluation id.
    pub evaluation_id: String,
    /// The evaluated schedule (denormalized).
    pub schedule_id: ScheduleId,
    /// The schedule's task intent (denormalized).
    pub task_intent_id: TaskIntentId,
    /// Who caused the evaluation.
    pub actor: Actor,
    /// The trace that caused it.
    pub trace_id: TraceId,
    /// Predicate subject path.
    pub predicate_subject: String,
    /// Predicate operator.
    pub predicate_operator: PredicateOperator,
    /// Predicate literal.
    pub predicate_value: Option<JsonValue>,
    /// Declared literal type.
    pub predicate_value_type: PredicateValueType,
    /// The instant the evaluation was scheduled for.
    pub evaluation_time: DateTime<Utc>,
    /// When the evaluation actually ran.
    pub evaluated_at: DateTime<Utc>,
    /// Evaluation outcome.
    pub status: EvaluationStatus,
    /// Machine-readable outcome code.
    pub result_code: String,
    /// The observed subject value, when resolved.
    pub observed_value: Option<JsonValue>,
    /// Error code for ERROR outcomes.
    pub error_code: Option<String>,
    /// Error message for ERROR outcomes.
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn field_change_holds_diff() {
        let change = FieldChange::new(
            "state",
            serde_json::json!("active"),
            serde_json::json!("paused"),
        );
        assert_eq!(change.field, "state");
        assert_eq!(change.before, serde_json::json!("active"));
        assert_eq!(change.after, serde_json::json!("paused"));
    }

    #[test]
    fn schedule_audit_entry_serde_roundtrip() {
        let entry = ScheduleAuditEntry {
            schedule_id: ScheduleId::from_i64(4),
            task_intent_id: TaskIntentId::from_i64(2),
            action: ScheduleAuditAction::Paused,
            actor: Actor::human("marion"),
            trace_id: None,
            reason: Some("vacation".to_string()),
            changes: vec![FieldChange::new(
                "state",
                serde_json::json!("active"),
                serde_json::json!("paused"),
            )],
            occurred_at: Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap(),
        };

        let json = serde_json::to_string(&entry).expect("serialize");
        let parsed: ScheduleAuditEntry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(entry, parsed);
    }

    #[test]
    fn audit_action_strings() {
        assert_eq!(ScheduleAuditAction::Created.as_str(), "created");
        assert_eq!(ScheduleAuditAction::RunRecorded.as_str(), "run_recorded");
    }
}
