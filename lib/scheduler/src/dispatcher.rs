//! Execution dispatcher.
//!
//! Turns an accepted provider callback into an execution record, runs
//! the task intent through the pluggable invoker, records the outcome,
//! schedules retries with backoff, and hands exhausted failures to the
//! failure-notification hook.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_core::{Actor, Clock, ExecutionId, ScheduleId, TaskIntentId, TraceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::{ExecutionAuditEntry, ScheduleAuditAction, ScheduleAuditEntry};
use crate::callback::ProviderCallback;
use crate::error::{DispatchError, StoreError};
use crate::execution::{Execution, ExecutionStatus};
use crate::provider::TimerProvider;
use crate::retry::RetryPolicy;
use crate::schedule::{Schedule, ScheduleKind, ScheduleState};
use crate::store::{NewExecution, SchedulerStore};

/// What the invoker receives for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// The execution being attempted.
    pub execution_id: ExecutionId,
    /// The schedule being run.
    pub schedule_id: ScheduleId,
    /// The task intent to carry out.
    pub task_intent_id: TaskIntentId,
    /// The time the run was scheduled for.
    pub scheduled_for: DateTime<Utc>,
    /// The trace id threading the whole run.
    pub trace_id: TraceId,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Whether an invocation succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Success,
    Failure,
}

/// Error detail reported by a failed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Outcome of one invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Success or failure.
    pub status: InvocationStatus,
    /// Machine-readable result code on success.
    pub result_code: Option<String>,
    /// Whether the outcome warrants operator attention.
    pub attention_required: bool,
    /// Error detail on failure.
    pub error: Option<InvocationError>,
}

impl InvocationResult {
    /// A plain success.
    #[must_use]
    pub fn success(result_code: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Success,
            result_code: Some(result_code.into()),
            attention_required: false,
            error: None,
        }
    }

    /// A plain failure.
    #[must_use]
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Failure,
            result_code: None,
            attention_required: false,
            error: Some(InvocationError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// Runs the actual work of an execution.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Performs one attempt of the given execution.
    async fn invoke_execution(&self, request: InvocationRequest) -> InvocationResult;
}

/// Receives executions that exhausted their attempts.
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    /// Notifies about an execution that failed terminally.
    ///
    /// Failures here are logged by the dispatcher, never propagated.
    async fn notify_failure(&self, schedule: &Schedule, execution: &Execution);
}

/// A failure notifier that does nothing.
#[derive(Debug, Default)]
pub struct NullFailureNotifier;

#[async_trait]
impl FailureNotifier for NullFailureNotifier {
    async fn notify_failure(&self, _schedule: &Schedule, _execution: &Execution) {}
}

/// Outcome of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The attempt ran; the execution carries the resulting status.
    Completed { execution: Execution },
    /// An execution for this (schedule_id, trace_id) already exists.
    Duplicate { execution_id: ExecutionId },
    /// The schedule is not in a runnable state.
    Skipped { reason: String },
}

/// Dispatches executions for provider callbacks and scheduled retries.
pub struct ExecutionDispatcher {
    store: Arc<dyn SchedulerStore>,
    invoker: Arc<dyn Invoker>,
    provider: Arc<dyn TimerProvider>,
    failure_notifier: Arc<dyn FailureNotifier>,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ExecutionDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        invoker: Arc<dyn Invoker>,
        provider: Arc<dyn TimerProvider>,
        failure_notifier: Arc<dyn FailureNotifier>,
        retry_policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            invoker,
            provider,
            failure_notifier,
            retry_policy,
            clock,
        }
    }

    /// Dispatches a first attempt for an accepted callback.
    ///
    /// # Errors
    ///
    /// Returns a dispatch error when the schedule is missing or
    /// persistence fails. Invoker failures are recorded on the
    /// execution, not surfaced as errors.
    pub async fn dispatch(
        &self,
        callback: &ProviderCallback,
    ) -> Result<DispatchOutcome, DispatchError> {
        if let Some(existing) = self
            .store
            .find_execution_by_trace(callback.schedule_id, &callback.trace_id)
            .await?
        {
            return Ok(DispatchOutcome::Duplicate {
                execution_id: existing.id,
            });
        }

        let Some(schedule) = self.store.get_schedule(callback.schedule_id).await? else {
            return Err(DispatchError::NotFound {
                entity: "schedule",
                id: callback.schedule_id.as_i64(),
            });
        };
        if schedule.state.is_terminal() {
            return Ok(DispatchOutcome::Skipped {
                reason: format!("schedule is {}", schedule.state.as_str()),
            });
        }
        if schedule.state == ScheduleState::Paused && callback.trigger_source != "run_now" {
            return Ok(DispatchOutcome::Skipped {
                reason: "schedule is paused".to_string(),
            });
        }

        let now = self.clock.now();
        let scheduled_for = callback.effective_scheduled_for();
        let created = self
            .store
            .create_execution(
                NewExecution {
                    schedule_id: schedule.id,
                    scheduled_for,
                    max_attempts: self.retry_policy.max_attempts,
                    trace_id: callback.trace_id.clone(),
                    trigger_source: callback.trigger_source.clone(),
                    created_at: now,
                },
                execution_audit(
                    ExecutionId::from_i64(0),
                    schedule.id,
                    &callback.trace_id,
                    ExecutionStatus::Queued,
                    None,
                    now,
                ),
            )
            .await;
        let mut execution = match created {
            Ok(execution) => execution,
            // Lost a race with a concurrent dispatch of the same trace.
            Err(StoreError::Conflict { .. }) => {
                let existing = self
                    .store
                    .find_execution_by_trace(callback.schedule_id, &callback.trace_id)
                    .await?
                    .ok_or(DispatchError::Storage {
                        reason: "duplicate execution vanished".to_string(),
                    })?;
                return Ok(DispatchOutcome::Duplicate {
                    execution_id: existing.id,
                });
            }
            Err(other) => return Err(other.into()),
        };

        self.run_attempt(&mut execution, schedule).await?;
        Ok(DispatchOutcome::Completed { execution })
    }

    /// Runs the next attempt of an execution in `retry_scheduled`.
    ///
    /// Retry timers target the execution directly, so retries never
    /// re-enter the callback bridge and the (schedule_id, trace_id)
    /// uniqueness invariant holds across attempts.
    ///
    /// # Errors
    ///
    /// Returns a dispatch error when the execution is missing, not in
    /// `retry_scheduled`, or persistence fails.
    pub async fn run_retry(
        &self,
        execution_id: ExecutionId,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(mut execution) = self.store.get_execution(execution_id).await? else {
            return Err(DispatchError::NotFound {
                entity: "execution",
                id: execution_id.as_i64(),
            });
        };
        if execution.status != ExecutionStatus::RetryScheduled {
            return Err(DispatchError::InvalidState {
                reason: format!(
                    "execution {} is {}, not retry_scheduled",
                    execution.id,
                    execution.status.as_str()
                ),
            });
        }
        let Some(schedule) = self.store.get_schedule(execution.schedule_id).await? else {
            return Err(DispatchError::NotFound {
                entity: "schedule",
                id: execution.schedule_id.as_i64(),
            });
        };

        let now = self.clock.now();
        execution.begin_retry_attempt(now);
        self.store
            .update_execution(
                &execution,
                execution_audit(
                    execution.id,
                    execution.schedule_id,
                    &execution.trace_id,
                    ExecutionStatus::Running,
                    Some(format!("retry attempt {}", execution.attempt_count)),
                    now,
                ),
            )
            .await?;

        self.invoke_and_record(&mut execution, schedule).await?;
        Ok(DispatchOutcome::Completed { execution })
    }

    async fn run_attempt(
        &self,
        execution: &mut Execution,
        schedule: Schedule,
    ) -> Result<(), DispatchError> {
        let now = self.clock.now();
        execution.start(now);
        self.store
            .update_execution(
                execution,
                execution_audit(
                    execution.id,
                    execution.schedule_id,
                    &execution.trace_id,
                    ExecutionStatus::Running,
                    None,
                    now,
                ),
            )
            .await?;
        self.invoke_and_record(execution, schedule).await
    }

    async fn invoke_and_record(
        &self,
        execution: &mut Execution,
        mut schedule: Schedule,
    ) -> Result<(), DispatchError> {
        let request = InvocationRequest {
            execution_id: execution.id,
            schedule_id: execution.schedule_id,
            task_intent_id: schedule.task_intent_id,
            scheduled_for: execution.scheduled_for,
            trace_id: execution.trace_id.clone(),
            attempt: execution.attempt_count,
        };
        let result = self.invoker.invoke_execution(request).await;
        let finished_at = self.clock.now();

        match result.status {
            InvocationStatus::Success => {
                execution.succeed(finished_at, result.result_code.clone());
                self.store
                    .update_execution(
                        execution,
                        execution_audit(
                            execution.id,
                            execution.schedule_id,
                            &execution.trace_id,
                            ExecutionStatus::Succeeded,
                            result.result_code,
                            finished_at,
                        ),
                    )
                    .await?;
                self.record_run_on_schedule(&mut schedule, execution, finished_at)
                    .await?;
            }
            InvocationStatus::Failure => {
                let (code, message) = result
                    .error
                    .map(|e| (e.code, e.message))
                    .unwrap_or_else(|| ("invoker_failure".to_string(), "unknown".to_string()));
                if self.retry_policy.should_retry(execution.attempt_count) {
                    let retry_at = self
                        .retry_policy
                        .compute_retry_at(finished_at, execution.retry_count + 1);
                    execution.schedule_retry(finished_at, retry_at, code.clone(), message.clone());
                    self.store
                        .update_execution(
                            execution,
                            execution_audit(
                                execution.id,
                                execution.schedule_id,
                                &execution.trace_id,
                                ExecutionStatus::RetryScheduled,
                                Some(format!("{code}: {message}")),
                                finished_at,
                            ),
                        )
                        .await?;
                    self.provider
                        .schedule_retry(execution.id, execution.schedule_id, retry_at)
                        .await?;
                } else {
                    execution.fail(finished_at, code.clone(), message.clone());
                    self.store
                        .update_execution(
                            execution,
                            execution_audit(
                                execution.id,
                                execution.schedule_id,
                                &execution.trace_id,
                                ExecutionStatus::Failed,
                                Some(format!("{code}: {message}")),
                                finished_at,
                            ),
                        )
                        .await?;
                    self.record_run_on_schedule(&mut schedule, execution, finished_at)
                        .await?;
                    tracing::warn!(
                        execution_id = execution.id.as_i64(),
                        schedule_id = execution.schedule_id.as_i64(),
                        error_code = %code,
                        "execution exhausted its attempts"
                    );
                    self.failure_notifier
                        .notify_failure(&schedule, execution)
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn record_run_on_schedule(
        &self,
        schedule: &mut Schedule,
        execution: &Execution,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        schedule.record_run(execution.id, finished_at, execution.status);

        let mut action = ScheduleAuditAction::RunRecorded;
        if schedule.kind == ScheduleKind::OneTime
            && execution.status == ExecutionStatus::Succeeded
            && schedule.state == ScheduleState::Active
        {
            schedule.state = ScheduleState::Completed;
            schedule.next_run_at = None;
            action = ScheduleAuditAction::Completed;
        } else if schedule.state == ScheduleState::Active {
            let tz = schedule.tz().map_err(|e| DispatchError::Storage {
                reason: e.to_string(),
            })?;
            schedule.next_run_at = schedule
                .definition
                .next_run_after(schedule.kind, tz, finished_at);
        }

        self.store
            .update_schedule(
                schedule,
                ScheduleAuditEntry {
                    schedule_id: schedule.id,
                    task_intent_id: schedule.task_intent_id,
                    action,
                    actor: Actor::scheduled(),
                    trace_id: Some(execution.trace_id.clone()),
                    reason: Some(format!("run {}", execution.status.as_str())),
                    changes: Vec::new(),
                    occurred_at: finished_at,
                },
            )
            .await?;
        Ok(())
    }
}

fn execution_audit(
    execution_id: ExecutionId,
    schedule_id: ScheduleId,
    trace_id: &TraceId,
    status: ExecutionStatus,
    reason: Option<String>,
    occurred_at: DateTime<Utc>,
) -> ExecutionAuditEntry {
    ExecutionAuditEntry {
        execution_id,
        schedule_id,
        trace_id: trace_id.clone(),
        status,
        actor: Actor::scheduled(),
        reason,
        occurred_at,
    }
}
