//! Postgres repository for the scheduler store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_core::{Actor, ActorKind, ExecutionId, ScheduleId, TaskIntentId, TraceId};
use minder_scheduler::audit::{
    ExecutionAuditEntry, PredicateEvaluationAuditEntry, ScheduleAuditEntry, ScheduleAuditRecord,
};
use minder_scheduler::error::StoreError;
use minder_scheduler::execution::{Execution, ExecutionStatus};
use minder_scheduler::intent::{NewTaskIntent, TaskIntent};
use minder_scheduler::predicate::EvaluationStatus;
use minder_scheduler::schedule::{
    PredicateOperator, PredicateValueType, Schedule, ScheduleDefinition, ScheduleKind,
    ScheduleState,
};
use minder_scheduler::store::{NewExecution, NewSchedule, ScheduleFilter, SchedulerStore};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::{backend_reason, is_unique_violation};

/// Postgres-backed scheduler store.
pub struct PgSchedulerStore {
    pool: PgPool,
}

impl PgSchedulerStore {
    /// Creates a repository over the pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend {
        reason: backend_reason(err),
    }
}

fn decode(reason: impl Into<String>) -> StoreError {
    StoreError::Backend {
        reason: reason.into(),
    }
}

fn actor_kind_from(value: &str) -> ActorKind {
    match value {
        "human" => ActorKind::Human,
        "scheduled" => ActorKind::Scheduled,
        _ => ActorKind::System,
    }
}

fn schedule_state_from(value: &str) -> Result<ScheduleState, StoreError> {
    match value {
        "active" => Ok(ScheduleState::Active),
        "paused" => Ok(ScheduleState::Paused),
        "completed" => Ok(ScheduleState::Completed),
        "canceled" => Ok(ScheduleState::Canceled),
        other => Err(decode(format!("unknown schedule state '{other}'"))),
    }
}

fn schedule_kind_from(value: &str) -> Result<ScheduleKind, StoreError> {
    match value {
        "one_time" => Ok(ScheduleKind::OneTime),
        "interval" => Ok(ScheduleKind::Interval),
        "calendar_rule" => Ok(ScheduleKind::CalendarRule),
        "conditional" => Ok(ScheduleKind::Conditional),
        other => Err(decode(format!("unknown schedule kind '{other}'"))),
    }
}

fn execution_status_from(value: &str) -> Result<ExecutionStatus, StoreError> {
    match value {
        "queued" => Ok(ExecutionStatus::Queued),
        "running" => Ok(ExecutionStatus::Running),
        "succeeded" => Ok(ExecutionStatus::Succeeded),
        "failed" => Ok(ExecutionStatus::Failed),
        "canceled" => Ok(ExecutionStatus::Canceled),
        "retry_scheduled" => Ok(ExecutionStatus::RetryScheduled),
        other => Err(decode(format!("unknown execution status '{other}'"))),
    }
}

fn evaluation_status_from(value: &str) -> Result<EvaluationStatus, StoreError> {
    match value {
        "TRUE" => Ok(EvaluationStatus::True),
        "FALSE" => Ok(EvaluationStatus::False),
        "ERROR" => Ok(EvaluationStatus::Error),
        other => Err(decode(format!("unknown evaluation status '{other}'"))),
    }
}

#[derive(FromRow)]
struct TaskIntentRow {
    id: i64,
    summary: String,
    detail: Option<String>,
    origin_reference: Option<String>,
    created_by: String,
    superseded_by: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TaskIntentRow {
    fn into_intent(self) -> TaskIntent {
        TaskIntent {
            id: TaskIntentId::from_i64(self.id),
            summary: self.summary,
            detail: self.detail,
            origin_reference: self.origin_reference,
            created_by: self.created_by,
            superseded_by: self.superseded_by.map(TaskIntentId::from_i64),
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ScheduleRow {
    id: i64,
    task_intent_id: i64,
    kind: String,
    state: String,
    timezone: String,
    definition: serde_json::Value,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_run_status: Option<String>,
    failure_count: i32,
    last_execution_id: Option<i64>,
    last_evaluated_at: Option<DateTime<Utc>>,
    last_evaluation_status: Option<String>,
    last_evaluation_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ScheduleRow {
    fn into_schedule(self) -> Result<Schedule, StoreError> {
        let definition: ScheduleDefinition = serde_json::from_value(self.definition)
            .map_err(|e| decode(format!("invalid schedule definition: {e}")))?;
        Ok(Schedule {
            id: ScheduleId::from_i64(self.id),
            task_intent_id: TaskIntentId::from_i64(self.task_intent_id),
            kind: schedule_kind_from(&self.kind)?,
            state: schedule_state_from(&self.state)?,
            timezone: self.timezone,
            definition,
            next_run_at: self.next_run_at,
            last_run_at: self.last_run_at,
            last_run_status: self
                .last_run_status
                .as_deref()
                .map(execution_status_from)
                .transpose()?,
            failure_count: self.failure_count.max(0) as u32,
            last_execution_id: self.last_execution_id.map(ExecutionId::from_i64),
            last_evaluated_at: self.last_evaluated_at,
            last_evaluation_status: self
                .last_evaluation_status
                .as_deref()
                .map(evaluation_status_from)
                .transpose()?,
            last_evaluation_error: self.last_evaluation_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: i64,
    schedule_id: i64,
    scheduled_for: DateTime<Utc>,
    status: String,
    attempt_count: i32,
    max_attempts: i32,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_error_code: Option<String>,
    last_error_message: Option<String>,
    result_code: Option<String>,
    trace_id: String,
    trigger_source: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ExecutionRow {
    fn into_execution(self) -> Result<Execution, StoreError> {
        Ok(Execution {
            id: ExecutionId::from_i64(self.id),
            schedule_id: ScheduleId::from_i64(self.schedule_id),
            scheduled_for: self.scheduled_for,
            status: execution_status_from(&self.status)?,
            attempt_count: self.attempt_count.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            retry_count: self.retry_count.max(0) as u32,
            next_retry_at: self.next_retry_at,
            last_error_code: self.last_error_code,
            last_error_message: self.last_error_message,
            result_code: self.result_code,
            trace_id: TraceId::from_string(self.trace_id),
            trigger_source: self.trigger_source,
            started_at: self.started_at,
            finished_at: self.finished_at,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct ScheduleAuditRow {
    id: i64,
    schedule_id: i64,
    task_intent_id: i64,
    action: String,
    actor_kind: String,
    actor_id: String,
    actor_channel: Option<String>,
    trace_id: Option<String>,
    reason: Option<String>,
    changes: serde_json::Value,
    occurred_at: DateTime<Utc>,
}

impl ScheduleAuditRow {
    fn into_record(self) -> Result<ScheduleAuditRecord, StoreError> {
        let action = serde_json::from_value(serde_json::Value::String(self.action.clone()))
            .map_err(|_| decode(format!("unknown audit action '{}'", self.action)))?;
        let changes = serde_json::from_value(self.changes)
            .map_err(|e| decode(format!("invalid audit changes: {e}")))?;
        let actor = Actor {
            kind: actor_kind_from(&self.actor_kind),
            id: self.actor_id,
            channel: self.actor_channel,
        };
        Ok(ScheduleAuditRecord {
            id: self.id,
            entry: ScheduleAuditEntry {
                schedule_id: ScheduleId::from_i64(self.schedule_id),
                task_intent_id: TaskIntentId::from_i64(self.task_intent_id),
                action,
                actor,
                trace_id: self.trace_id.map(TraceId::from_string),
                reason: self.reason,
                changes,
                occurred_at: self.occurred_at,
            },
        })
    }
}

#[derive(FromRow)]
struct ExecutionAuditRow {
    execution_id: i64,
    schedule_id: i64,
    trace_id: String,
    status: String,
    actor_kind: String,
    actor_id: String,
    actor_channel: Option<String>,
    reason: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl ExecutionAuditRow {
    fn into_entry(self) -> Result<ExecutionAuditEntry, StoreError> {
        Ok(ExecutionAuditEntry {
            execution_id: ExecutionId::from_i64(self.execution_id),
            schedule_id: ScheduleId::from_i64(self.schedule_id),
            trace_id: TraceId::from_string(self.trace_id),
            status: execution_status_from(&self.status)?,
            actor: Actor {
                kind: actor_kind_from(&self.actor_kind),
                id: self.actor_id,
                channel: self.actor_channel,
            },
            reason: self.reason,
            occurred_at: self.occurred_at,
        })
    }
}

async fn insert_schedule_audit(
    tx: &mut Transaction<'_, Postgres>,
    audit: &ScheduleAuditEntry,
) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO schedule_audit_logs
            (schedule_id, task_intent_id, action, actor_kind, actor_id, actor_channel,
             trace_id, reason, changes, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id
        "#,
    )
    .bind(audit.schedule_id.as_i64())
    .bind(audit.task_intent_id.as_i64())
    .bind(audit.action.as_str())
    .bind(audit.actor.kind.as_str())
    .bind(&audit.actor.id)
    .bind(&audit.actor.channel)
    .bind(audit.trace_id.as_ref().map(|t| t.as_str().to_string()))
    .bind(&audit.reason)
    .bind(serde_json::to_value(&audit.changes).unwrap_or_default())
    .bind(audit.occurred_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

async fn insert_execution_audit(
    tx: &mut Transaction<'_, Postgres>,
    audit: &ExecutionAuditEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO execution_audit_logs
            (execution_id, schedule_id, trace_id, status, actor_kind, actor_id,
             actor_channel, reason, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(audit.execution_id.as_i64())
    .bind(audit.schedule_id.as_i64())
    .bind(audit.trace_id.as_str())
    .bind(audit.status.as_str())
    .bind(audit.actor.kind.as_str())
    .bind(&audit.actor.id)
    .bind(&audit.actor.channel)
    .bind(&audit.reason)
    .bind(audit.occurred_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

const SCHEDULE_COLUMNS: &str = "id, task_intent_id, kind, state, timezone, definition, \
    next_run_at, last_run_at, last_run_status, failure_count, last_execution_id, \
    last_evaluated_at, last_evaluation_status, last_evaluation_error, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, schedule_id, scheduled_for, status, attempt_count, \
    max_attempts, retry_count, next_retry_at, last_error_code, last_error_message, \
    result_code, trace_id, trigger_source, started_at, finished_at, created_at";

#[async_trait]
impl SchedulerStore for PgSchedulerStore {
    async fn create_intent(
        &self,
        intent: NewTaskIntent,
        created_at: DateTime<Utc>,
    ) -> Result<TaskIntent, StoreError> {
        let row: TaskIntentRow = sqlx::query_as(
            r#"
            INSERT INTO task_intents (summary, detail, origin_reference, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, summary, detail, origin_reference, created_by, superseded_by, created_at
            "#,
        )
        .bind(&intent.summary)
        .bind(&intent.detail)
        .bind(&intent.origin_reference)
        .bind(&intent.created_by)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.into_intent())
    }

    async fn get_intent(&self, id: TaskIntentId) -> Result<Option<TaskIntent>, StoreError> {
        let row: Option<TaskIntentRow> = sqlx::query_as(
            r#"
            SELECT id, summary, detail, origin_reference, created_by, superseded_by, created_at
            FROM task_intents
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(TaskIntentRow::into_intent))
    }

    async fn delete_intent(&self, id: TaskIntentId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM task_intents WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
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
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let row: ScheduleRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO schedules
                (task_intent_id, kind, state, timezone, definition, next_run_at,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(schedule.task_intent_id.as_i64())
        .bind(schedule.kind.as_str())
        .bind(schedule.state.as_str())
        .bind(&schedule.timezone)
        .bind(serde_json::to_value(&schedule.definition).unwrap_or_default())
        .bind(schedule.next_run_at)
        .bind(schedule.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;

        audit.schedule_id = ScheduleId::from_i64(row.id);
        let audit_id = insert_schedule_audit(&mut tx, &audit).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        Ok((row.into_schedule()?, audit_id))
    }

    async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        let row: Option<ScheduleRow> = sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(ScheduleRow::into_schedule).transpose()
    }

    async fn list_schedules(&self, filter: ScheduleFilter) -> Result<Vec<Schedule>, StoreError> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS}
            FROM schedules
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::bigint IS NULL OR task_intent_id = $2)
              AND ($3::text IS NULL OR kind = $3)
            ORDER BY id
            "#
        ))
        .bind(filter.state.map(|s| s.as_str().to_string()))
        .bind(filter.task_intent_id.map(|id| id.as_i64()))
        .bind(filter.kind.map(|k| k.as_str().to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }

    async fn update_schedule(
        &self,
        schedule: &Schedule,
        audit: ScheduleAuditEntry,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET state = $2, timezone = $3, definition = $4, next_run_at = $5,
                last_run_at = $6, last_run_status = $7, failure_count = $8,
                last_execution_id = $9, last_evaluated_at = $10,
                last_evaluation_status = $11, last_evaluation_error = $12,
                updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(schedule.id.as_i64())
        .bind(schedule.state.as_str())
        .bind(&schedule.timezone)
        .bind(serde_json::to_value(&schedule.definition).unwrap_or_default())
        .bind(schedule.next_run_at)
        .bind(schedule.last_run_at)
        .bind(schedule.last_run_status.map(|s| s.as_str().to_string()))
        .bind(schedule.failure_count as i32)
        .bind(schedule.last_execution_id.map(|id| id.as_i64()))
        .bind(schedule.last_evaluated_at)
        .bind(
            schedule
                .last_evaluation_status
                .map(|s| s.as_str().to_string()),
        )
        .bind(&schedule.last_evaluation_error)
        .bind(schedule.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "schedule",
                id: schedule.id.as_i64(),
            });
        }
        let audit_id = insert_schedule_audit(&mut tx, &audit).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(audit_id)
    }

    async fn delete_schedule(
        &self,
        id: ScheduleId,
        audit: ScheduleAuditEntry,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "schedule",
                id: id.as_i64(),
            });
        }
        let audit_id = insert_schedule_audit(&mut tx, &audit).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(audit_id)
    }

    async fn create_execution(
        &self,
        execution: NewExecution,
        mut audit: ExecutionAuditEntry,
    ) -> Result<Execution, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let inserted: Result<ExecutionRow, sqlx::Error> = sqlx::query_as(&format!(
            r#"
            INSERT INTO executions
                (schedule_id, scheduled_for, status, attempt_count, max_attempts,
                 retry_count, trace_id, trigger_source, created_at)
            VALUES ($1, $2, 'queued', 1, $3, 0, $4, $5, $6)
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(execution.schedule_id.as_i64())
        .bind(execution.scheduled_for)
        .bind(execution.max_attempts as i32)
        .bind(execution.trace_id.as_str())
        .bind(&execution.trigger_source)
        .bind(execution.created_at)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::Conflict {
                    reason: format!(
                        "execution already exists for schedule {} trace {}",
                        execution.schedule_id, execution.trace_id
                    ),
                });
            }
            Err(err) => return Err(backend(err)),
        };

        audit.execution_id = ExecutionId::from_i64(row.id);
        insert_execution_audit(&mut tx, &audit).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        row.into_execution()
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(ExecutionRow::into_execution).transpose()
    }

    async fn find_execution_by_trace(
        &self,
        schedule_id: ScheduleId,
        trace_id: &TraceId,
    ) -> Result<Option<Execution>, StoreError> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE schedule_id = $1 AND trace_id = $2"
        ))
        .bind(schedule_id.as_i64())
        .bind(trace_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(ExecutionRow::into_execution).transpose()
    }

    async fn list_executions(&self, schedule_id: ScheduleId) -> Result<Vec<Execution>, StoreError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM executions
            WHERE schedule_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(schedule_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(ExecutionRow::into_execution).collect()
    }

    async fn update_execution(
        &self,
        execution: &Execution,
        audit: ExecutionAuditEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, attempt_count = $3, retry_count = $4, next_retry_at = $5,
                last_error_code = $6, last_error_message = $7, result_code = $8,
                started_at = $9, finished_at = $10
            WHERE id = $1
            "#,
        )
        .bind(execution.id.as_i64())
        .bind(execution.status.as_str())
        .bind(execution.attempt_count as i32)
        .bind(execution.retry_count as i32)
        .bind(execution.next_retry_at)
        .bind(&execution.last_error_code)
        .bind(&execution.last_error_message)
        .bind(&execution.result_code)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "execution",
                id: execution.id.as_i64(),
            });
        }
        insert_execution_audit(&mut tx, &audit).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn list_schedule_audits(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<Vec<ScheduleAuditRecord>, StoreError> {
        let rows: Vec<ScheduleAuditRow> = sqlx::query_as(
            r#"
            SELECT id, schedule_id, task_intent_id, action, actor_kind, actor_id,
                   actor_channel, trace_id, reason, changes, occurred_at
            FROM schedule_audit_logs
            WHERE schedule_id = $1
            ORDER BY id
            "#,
        )
        .bind(schedule_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(ScheduleAuditRow::into_record).collect()
    }

    async fn list_execution_audits(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionAuditEntry>, StoreError> {
        let rows: Vec<ExecutionAuditRow> = sqlx::query_as(
            r#"
            SELECT execution_id, schedule_id, trace_id, status, actor_kind, actor_id,
                   actor_channel, reason, occurred_at
            FROM execution_audit_logs
            WHERE execution_id = $1
            ORDER BY id
            "#,
        )
        .bind(execution_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(ExecutionAuditRow::into_entry).collect()
    }

    async fn record_predicate_evaluation(
        &self,
        entry: PredicateEvaluationAuditEntry,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO predicate_evaluation_audit_logs
                (evaluation_id, schedule_id, task_intent_id, actor_kind, actor_id,
                 actor_channel, trace_id, predicate_subject, predicate_operator,
                 predicate_value, predicate_value_type, evaluation_time, evaluated_at,
                 status, result_code, observed_value, error_code, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18)
            ON CONFLICT (evaluation_id) DO NOTHING
            "#,
        )
        .bind(&entry.evaluation_id)
        .bind(entry.schedule_id.as_i64())
        .bind(entry.task_intent_id.as_i64())
        .bind(entry.actor.kind.as_str())
        .bind(&entry.actor.id)
        .bind(&entry.actor.channel)
        .bind(entry.trace_id.as_str())
        .bind(&entry.predicate_subject)
        .bind(entry.predicate_operator.as_str())
        .bind(&entry.predicate_value)
        .bind(
            serde_json::to_value(entry.predicate_value_type)
                .ok()
                .and_then(|v| v.as_str().map(ToString::to_string))
                .unwrap_or_else(|| "string".to_string()),
        )
        .bind(entry.evaluation_time)
        .bind(entry.evaluated_at)
        .bind(entry.status.as_str())
        .bind(&entry.result_code)
        .bind(&entry.observed_value)
        .bind(&entry.error_code)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_predicate_evaluation(
        &self,
        evaluation_id: &str,
    ) -> Result<Option<PredicateEvaluationAuditEntry>, StoreError> {
        #[derive(FromRow)]
        struct Row {
            evaluation_id: String,
            schedule_id: i64,
            task_intent_id: i64,
            actor_kind: String,
            actor_id: String,
            actor_channel: Option<String>,
            trace_id: String,
            predicate_subject: String,
            predicate_operator: String,
            predicate_value: Option<serde_json::Value>,
            predicate_value_type: String,
            evaluation_time: DateTime<Utc>,
            evaluated_at: DateTime<Utc>,
            status: String,
            result_code: String,
            observed_value: Option<serde_json::Value>,
            error_code: Option<String>,
            error_message: Option<String>,
        }

        let row: Option<Row> = sqlx::query_as(
            r#"
            SELECT evaluation_id, schedule_id, task_intent_id, actor_kind, actor_id,
                   actor_channel, trace_id, predicate_subject, predicate_operator,
                   predicate_value, predicate_value_type, evaluation_time, evaluated_at,
                   status, result_code, observed_value, error_code, error_message
            FROM predicate_evaluation_audit_logs
            WHERE evaluation_id = $1
            "#,
        )
        .bind(evaluation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| {
            let operator: PredicateOperator =
                serde_json::from_value(serde_json::Value::String(row.predicate_operator.clone()))
                    .map_err(|_| {
                        decode(format!(
                            "unknown predicate operator '{}'",
                            row.predicate_operator
                        ))
                    })?;
            let value_type: PredicateValueType = serde_json::from_value(
                serde_json::Value::String(row.predicate_value_type.clone()),
            )
            .map_err(|_| {
                decode(format!(
                    "unknown predicate value type '{}'",
                    row.predicate_value_type
                ))
            })?;
            Ok(PredicateEvaluationAuditEntry {
                evaluation_id: row.evaluation_id,
                schedule_id: ScheduleId::from_i64(row.schedule_id),
                task_intent_id: TaskIntentId::from_i64(row.task_intent_id),
                actor: Actor {
                    kind: actor_kind_from(&row.actor_kind),
                    id: row.actor_id,
                    channel: row.actor_channel,
                },
                trace_id: TraceId::from_string(row.trace_id),
                predicate_subject: row.predicate_subject,
                predicate_operator: operator,
                predicate_value: row.predicate_value,
                predicate_value_type: value_type,
                evaluation_time: row.evaluation_time,
                evaluated_at: row.evaluated_at,
                status: evaluation_status_from(&row.status)?,
                result_code: row.result_code,
                observed_value: row.observed_value,
                error_code: row.error_code,
                error_message: row.error_message,
            })
        })
        .transpose()
    }
}
