//! Persistence operations for the scheduler.
//!
//! The trait couples every state change with the audit row that
//! describes it: both commit in one transaction so audit and state
//! cannot diverge. An in-memory implementation backs tests and
//! embedded use; the server provides the Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_core::{ExecutionId, ScheduleId, TaskIntentId, TraceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::audit::{
    ExecutionAuditEntry, PredicateEvaluationAuditEntry, ScheduleAuditEntry, ScheduleAuditRecord,
};
use crate::error::StoreError;
use crate::execution::{Execution, ExecutionStatus};
use crate::intent::{NewTaskIntent, TaskIntent};
use crate::schedule::{Schedule, ScheduleDefinition, ScheduleKind, ScheduleState};

/// Input for creating a schedule row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSchedule {
    /// The task intent the schedule runs.
    pub task_intent_id: TaskIntentId,
    /// Schedule kind.
    pub kind: ScheduleKind,
    /// Initial state.
    pub state: ScheduleState,
    /// IANA timezone name.
    pub timezone: String,
    /// Kind-specific fields.
    pub definition: ScheduleDefinition,
    /// First fire time.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

/// Input for creating an execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExecution {
    /// The schedule being run.
    pub schedule_id: ScheduleId,
    /// The time the run was scheduled for.
    pub scheduled_for: DateTime<Utc>,
    /// Maximum attempts from the retry policy.
    pub max_attempts: u32,
    /// The trace id from the provider callback.
    pub trace_id: TraceId,
    /// Where the callback came from.
    pub trigger_source: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

/// Filter for schedule listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleFilter {
    /// Restrict to one state.
    pub state: Option<ScheduleState>,
    /// Restrict to one task intent.
    pub task_intent_id: Option<TaskIntentId>,
    /// Restrict to one kind.
    pub kind: Option<ScheduleKind>,
}

/// Transactional store of scheduler entities.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Creates a task intent.
    async fn create_intent(
        &self,
        intent: NewTaskIntent,
        created_at: DateTime<Utc>,
    ) -> Result<TaskIntent, StoreError>;

    /// Fetches a task intent.
    async fn get_intent(&self, id: TaskIntentId) -> Result<Option<TaskIntent>, StoreError>;

    /// Deletes a task intent. Schedules must be canceled first.
    async fn delete_intent(&self, id: TaskIntentId) -> Result<(), StoreError>;

    /// Creates a schedule and its creation audit row in one transaction.
    ///
    /// Returns the schedule and the audit row id.
    async fn create_schedule(
        &self,
        schedule: NewSchedule,
        audit: ScheduleAuditEntry,
    ) -> Result<(Schedule, i64), StoreError>;

    /// Fetches a schedule.
    async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError>;

    /// Lists schedules matching the filter.
    async fn list_schedules(&self, filter: ScheduleFilter) -> Result<Vec<Schedule>, StoreError>;

    /// Persists a mutated schedule and its audit row in one transaction.
    ///
    /// Returns the audit row id.
    async fn update_schedule(
        &self,
        schedule: &Schedule,
        audit: ScheduleAuditEntry,
    ) -> Result<i64, StoreError>;

    /// Deletes a schedule row, retaining its audit rows.
    ///
    /// Returns the deletion audit row id.
    async fn delete_schedule(
        &self,
        id: ScheduleId,
        audit: ScheduleAuditEntry,
    ) -> Result<i64, StoreError>;

    /// Creates a queued execution and its audit row in one transaction.
    ///
    /// Fails with a conflict when an execution with the same
    /// (schedule_id, trace_id) already exists.
    async fn create_execution(
        &self,
        execution: NewExecution,
        audit: ExecutionAuditEntry,
    ) -> Result<Execution, StoreError>;

    /// Fetches an execution.
    async fn get_execution(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError>;

    /// Finds the execution for a (schedule_id, trace_id) pair.
    async fn find_execution_by_trace(
        &self,
        schedule_id: ScheduleId,
        trace_id: &TraceId,
    ) -> Result<Option<Execution>, StoreError>;

    /// Lists executions for a schedule, newest first.
    async fn list_executions(&self, schedule_id: ScheduleId) -> Result<Vec<Execution>, StoreError>;

    /// Persists a mutated execution and its audit row in one transaction.
    async fn update_execution(
        &self,
        execution: &Execution,
        audit: ExecutionAuditEntry,
    ) -> Result<(), StoreError>;

    /// Lists schedule audit rows for a schedule, oldest first.
    async fn list_schedule_audits(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<Vec<ScheduleAuditRecord>, StoreError>;

    /// Lists execution audit rows for an execution, oldest first.
    async fn list_execution_audits(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionAuditEntry>, StoreError>;

    /// Records a predicate evaluation audit row.
    ///
    /// Returns false when a row with the same `evaluation_id` already
    /// exists; the call is then a no-op.
    async fn record_predicate_evaluation(
        &self,
        entry: PredicateEvaluationAuditEntry,
    ) -> Result<bool, StoreError>;

    /// Fetches a predicate evaluation audit row by evaluation id.
    async fn find_predicate_evaluation(
        &self,
        evaluation_id: &str,
    ) -> Result<Option<PredicateEvaluationAuditEntry>, StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    next_intent_id: i64,
    next_schedule_id: i64,
    next_execution_id: i64,
    next_audit_id: i64,
    intents: BTreeMap<i64, TaskIntent>,
    schedules: BTreeMap<i64, Schedule>,
    executions: BTreeMap<i64, Execution>,
    schedule_audits: Vec<ScheduleAuditRecord>,
    execution_audits: Vec<ExecutionAuditEntry>,
    predicate_audits: Vec<PredicateEvaluationAuditEntry>,
}

impl Inner {
    fn next_audit_id(&mut self) -> i64 {
        self.next_audit_id += 1;
        self.next_audit_id
    }
}

/// In-memory scheduler store.
///
/// A single mutex stands in for the database transaction: every
/// composite operation mutates state and appends its audit row under
/// one lock acquisition.
#[derive(Debug, Default)]
pub struct InMemorySchedulerStore {
    inner: Mutex<Inner>,
}

impl InMemorySchedulerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of execution audit rows, for test assertions.
    #[must_use]
    pub fn execution_audit_count(&self) -> usize {
        self.inner.lock().unwrap().execution_audits.len()
    }

    /// Returns the number of predicate audit rows, for test assertions.
    #[must_use]
    pub fn predicate_audit_count(&self) -> usize {
        self.inner.lock().unwrap().predicate_audits.len()
    }
}

#[async_trait]
impl SchedulerStore for InMemorySchedulerStore {
    async fn create_intent(
        &self,
        intent: NewTaskIntent,
        created_at: DateTime<Utc>,
    ) -> Result<TaskIntent, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_intent_id += 1;
        let id = TaskIntentId::from_i64(inner.next_intent_id);
        let intent = TaskIntent {
            id,
            summary: intent.summary,
            detail: intent.detail,
            origin_reference: intent.origin_reference,
            created_by: intent.created_by,
            superseded_by: None,
            created_at,
        };
        inner.intents.insert(id.as_i64(), intent.clone());
        Ok(intent)
    }

    async fn get_intent(&self, id: TaskIntentId) -> Result<Option<TaskIntent>, StoreError> {
        Ok(self.inner.lock().unwrap().intents.get(&id.as_i64()).cloned())
    }

    async fn delete_intent(&self, id: TaskIntentId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.intents.remove(&id.as_i64()).is_none() {
            return Err(StoreError::NotFound {
                entity: "task_intent",
                id: id.as_i64(),
            });
        }
        Ok(())
    }

    async fn create_schedule(
        &self,
        schedule: NewSchedule,
        mut audit: ScheduleAuditEntry,
    ) -> Result<(Schedule, i64), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.intents.contains_key(&schedule.task_intent_id.as_i64()) {
            return Err(StoreError::NotFound {
                entity: "task_intent",
                id: schedule.task_intent_id.as_i64(),
            });
        }
        inner.next_schedule_id += 1;
        let id = ScheduleId::from_i64(inner.next_schedule_id);
        let schedule = Schedule {
            id,
            task_intent_id: schedule.task_intent_id,
            kind: schedule.kind,
            state: schedule.state,
            timezone: schedule.timezone,
            definition: schedule.definition,
            next_run_at: schedule.next_run_at,
            last_run_at: None,
            last_run_status: None,
            failure_count: 0,
            last_execution_id: None,
            last_evaluated_at: None,
            last_evaluation_status: None,
            last_evaluation_error: None,
            created_at: schedule.created_at,
            updated_at: schedule.created_at,
        };
        inner.schedules.insert(id.as_i64(), schedule.clone());

        audit.schedule_id = id;
        let audit_id = inner.next_audit_id();
        inner.schedule_audits.push(ScheduleAuditRecord {
            id: audit_id,
            entry: audit,
        });
        Ok((schedule, audit_id))
    }

    async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .schedules
            .get(&id.as_i64())
            .cloned())
    }

    async fn list_schedules(&self, filter: ScheduleFilter) -> Result<Vec<Schedule>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .schedules
            .values()
            .filter(|s| filter.state.is_none_or(|state| s.state == state))
            .filter(|s| {
                filter
                    .task_intent_id
                    .is_none_or(|intent| s.task_intent_id == intent)
            })
            .filter(|s| filter.kind.is_none_or(|kind| s.kind == kind))
            .cloned()
            .collect())
    }

    async fn update_schedule(
        &self,
        schedule: &Schedule,
        audit: ScheduleAuditEntry,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.schedules.contains_key(&schedule.id.as_i64()) {
            return Err(StoreError::NotFound {
                entity: "schedule",
                id: schedule.id.as_i64(),
            });
        }
        inner.schedules.insert(schedule.id.as_i64(), schedule.clone());
        let audit_id = inner.next_audit_id();
        inner.schedule_audits.push(ScheduleAuditRecord {
            id: audit_id,
            entry: audit,
        });
        Ok(audit_id)
    }

    async fn delete_schedule(
        &self,
        id: ScheduleId,
        audit: ScheduleAuditEntry,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.schedules.remove(&id.as_i64()).is_none() {
            return Err(StoreError::NotFound {
                entity: "schedule",
                id: id.as_i64(),
            });
        }
        let audit_id = inner.next_audit_id();
        inner.schedule_audits.push(ScheduleAuditRecord {
            id: audit_id,
            entry: audit,
        });
        Ok(audit_id)
    }

    async fn create_execution(
        &self,
        execution: NewExecution,
        mut audit: ExecutionAuditEntry,
    ) -> Result<Execution, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.executions.values().any(|e| {
            e.schedule_id == execution.schedule_id && e.trace_id == execution.trace_id
        });
        if duplicate {
            return Err(StoreError::Conflict {
                reason: format!(
                    "execution already exists for schedule {} trace {}",
                    execution.schedule_id, execution.trace_id
                ),
            });
        }
        inner.next_execution_id += 1;
        let id = ExecutionId::from_i64(inner.next_execution_id);
        let execution = Execution {
            id,
            schedule_id: execution.schedule_id,
            scheduled_for: execution.scheduled_for,
            status: ExecutionStatus::Queued,
            attempt_count: 1,
            max_attempts: execution.max_attempts,
            retry_count: 0,
            next_retry_at: None,
            last_error_code: None,
            last_error_message: None,
            result_code: None,
            trace_id: execution.trace_id,
            trigger_source: execution.trigger_source,
            started_at: None,
            finished_at: None,
            created_at: execution.created_at,
        };
        inner.executions.insert(id.as_i64(), execution.clone());
        audit.execution_id = id;
        inner.execution_audits.push(audit);
        Ok(execution)
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .executions
            .get(&id.as_i64())
            .cloned())
    }

    async fn find_execution_by_trace(
        &self,
        schedule_id: ScheduleId,
        trace_id: &TraceId,
    ) -> Result<Option<Execution>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .executions
            .values()
            .find(|e| e.schedule_id == schedule_id && &e.trace_id == trace_id)
            .cloned())
    }

    async fn list_executions(&self, schedule_id: ScheduleId) -> Result<Vec<Execution>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut executions: Vec<Execution> = inner
            .executions
            .values()
            .filter(|e| e.schedule_id == schedule_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(executions)
    }

    async fn update_execution(
        &self,
        execution: &Execution,
        audit: ExecutionAuditEntry,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.executions.contains_key(&execution.id.as_i64()) {
            return Err(StoreError::NotFound {
                entity: "execution",
                id: execution.id.as_i64(),
            });
        }
        inner
            .executions
            .insert(execution.id.as_i64(), execution.clone());
        inner.execution_audits.push(audit);
        Ok(())
    }

    async fn list_schedule_audits(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<Vec<ScheduleAuditRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .schedule_audits
            .iter()
            .filter(|r| r.entry.schedule_id == schedule_id)
            .cloned()
            .collect())
    }

    async fn list_execution_audits(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionAuditEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .execution_audits
            .iter()
            .filter(|r| r.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn record_predicate_evaluation(
        &self,
        entry: PredicateEvaluationAuditEntry,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .predicate_audits
            .iter()
            .any(|r| r.evaluation_id == entry.evaluation_id)
        {
            return Ok(false);
        }
        inner.predicate_audits.push(entry);
        Ok(true)
    }

    async fn find_predicate_evaluation(
        &self,
        evaluation_id: &str,
    ) -> Result<Option<PredicateEvaluationAuditEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .predicate_audits
            .iter()
            .find(|r| r.evaluation_id == evaluation_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ScheduleAuditAction;
    use crate::schedule::IntervalUnit;
    use chrono::TimeZone;
    use minder_core::Actor;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    fn schedule_audit(action: ScheduleAuditAction) -> ScheduleAuditEntry {
        ScheduleAuditEntry {
            schedule_id: ScheduleId::from_i64(0),
            task_intent_id: TaskIntentId::from_i64(1),
            action,
            actor: Actor::human("marion"),
            trace_id: None,
            reason: None,
            changes: Vec::new(),
            occurred_at: now(),
        }
    }

    fn execution_audit(status: ExecutionStatus, trace: &str) -> ExecutionAuditEntry {
        ExecutionAuditEntry {
            execution_id: ExecutionId::from_i64(0),
            schedule_id: ScheduleId::from_i64(1),
            trace_id: TraceId::from_string(trace),
            status,
            actor: Actor::scheduled(),
            reason: None,
            occurred_at: now(),
        }
    }

    async fn seed_schedule(store: &InMemorySchedulerStore) -> Schedule {
        let intent = store
            .create_intent(NewTaskIntent::new("Check mail", "marion"), now())
            .await
            .expect("intent");
        let (schedule, _) = store
            .create_schedule(
                NewSchedule {
                    task_intent_id: intent.id,
                    kind: ScheduleKind::Interval,
                    state: ScheduleState::Active,
                    timezone: "UTC".to_string(),
                    definition: ScheduleDefinition::interval(1, IntervalUnit::Day, now()),
                    next_run_at: Some(now() + chrono::Duration::days(1)),
                    created_at: now(),
                },
                schedule_audit(ScheduleAuditAction::Created),
            )
            .await
            .expect("schedule");
        schedule
    }

    #[tokio::test]
    async fn create_schedule_assigns_ids_and_audit() {
        let store = InMemorySchedulerStore::new();
        let schedule = seed_schedule(&store).await;
        assert!(schedule.id.is_valid());

        let audits = store
            .list_schedule_audits(schedule.id)
            .await
            .expect("audits");
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].entry.action, ScheduleAuditAction::Created);
        assert_eq!(audits[0].entry.schedule_id, schedule.id);
    }

    #[tokio::test]
    async fn duplicate_trace_rejected() {
        let store = InMemorySchedulerStore::new();
        let schedule = seed_schedule(&store).await;

        let new_execution = NewExecution {
            schedule_id: schedule.id,
            scheduled_for: now(),
            max_attempts: 3,
            trace_id: TraceId::from_string("t1"),
            trigger_source: "scheduler_callback".to_string(),
            created_at: now(),
        };
        store
            .create_execution(
                new_execution.clone(),
                execution_audit(ExecutionStatus::Queued, "t1"),
            )
            .await
            .expect("first");

        let err = store
            .create_execution(new_execution, execution_audit(ExecutionStatus::Queued, "t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn predicate_audit_unique_on_evaluation_id() {
        let store = InMemorySchedulerStore::new();
        let entry = PredicateEvaluationAuditEntry {
            evaluation_id: "eval-1".to_string(),
            schedule_id: ScheduleId::from_i64(1),
            task_intent_id: TaskIntentId::from_i64(1),
            actor: Actor::scheduled(),
            trace_id: TraceId::from_string("t1"),
            predicate_subject: "inbox.unread_count".to_string(),
            predicate_operator: crate::schedule::PredicateOperator::Gte,
            predicate_value: Some(serde_json::json!(5)),
            predicate_value_type: crate::schedule::PredicateValueType::Number,
            evaluation_time: now(),
            evaluated_at: now(),
            status: crate::predicate::EvaluationStatus::True,
            result_code: "predicate_true".to_string(),
            observed_value: Some(serde_json::json!(7)),
            error_code: None,
            error_message: None,
        };

        assert!(store
            .record_predicate_evaluation(entry.clone())
            .await
            .expect("first insert"));
        assert!(!store
            .record_predicate_evaluation(entry)
            .await
            .expect("second insert is a no-op"));
        assert_eq!(store.predicate_audit_count(), 1);
    }

    #[tokio::test]
    async fn audits_survive_schedule_deletion() {
        let store = InMemorySchedulerStore::new();
        let schedule = seed_schedule(&store).await;

        let mut deletion = schedule_audit(ScheduleAuditAction::Deleted);
        deletion.schedule_id = schedule.id;
        store
            .delete_schedule(schedule.id, deletion)
            .await
            .expect("delete");

        assert!(store
            .get_schedule(schedule.id)
            .await
            .expect("lookup")
            .is_none());
        let audits = store
            .list_schedule_audits(schedule.id)
            .await
            .expect("audits");
        assert_eq!(audits.len(), 2);
    }
}
