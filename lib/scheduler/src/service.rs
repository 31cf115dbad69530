//! Schedule command and query service.
//!
//! Create/update/pause/resume/delete/run-now over schedules, with
//! validation, the state-transition matrix, and the external timer
//! provider kept in step. Every mutation persists its audit row
//! atomically with the state change; provider failures surface as
//! `provider_error` and leave no schedule behind (creation is
//! compensated, other mutations call the provider first).

use chrono::{DateTime, Utc};
use minder_core::{Actor, Clock, ExecutionId, ScheduleId, TaskIntentId, TraceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::{FieldChange, ScheduleAuditAction, ScheduleAuditEntry, ScheduleAuditRecord};
use crate::callback::ProviderCallback;
use crate::dispatcher::{DispatchOutcome, ExecutionDispatcher};
use crate::error::SchedulerError;
use crate::execution::Execution;
use crate::intent::{NewTaskIntent, TaskIntent};
use crate::provider::{TimerProvider, TimerRegistration};
use crate::schedule::{parse_timezone, Schedule, ScheduleDefinition, ScheduleKind, ScheduleState};
use crate::store::{NewSchedule, ScheduleFilter, SchedulerStore};

/// The task intent a new schedule runs: an existing one or one created
/// alongside the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntentRef {
    /// Reference an existing intent.
    Existing(TaskIntentId),
    /// Create a new intent with the schedule.
    New(NewTaskIntent),
}

/// Input for creating a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateScheduleInput {
    /// The intent the schedule runs.
    pub intent: IntentRef,
    /// Schedule kind.
    pub kind: ScheduleKind,
    /// IANA timezone name. Defaults to UTC.
    pub timezone: Option<String>,
    /// Kind-specific fields.
    pub definition: ScheduleDefinition,
}

/// Input for updating a schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateScheduleInput {
    /// Must match the existing value when provided; the task intent
    /// reference is immutable.
    pub task_intent_id: Option<TaskIntentId>,
    /// New timezone.
    pub timezone: Option<String>,
    /// New kind-specific fields.
    pub definition: Option<ScheduleDefinition>,
}

/// Result of a schedule creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedSchedule {
    /// The created schedule.
    pub schedule: Schedule,
    /// The audit row written with it.
    pub audit_id: i64,
}

/// Command and query surface over schedules.
pub struct SchedulerService {
    store: Arc<dyn SchedulerStore>,
    provider: Arc<dyn TimerProvider>,
    dispatcher: Arc<ExecutionDispatcher>,
    clock: Arc<dyn Clock>,
}

impl SchedulerService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        provider: Arc<dyn TimerProvider>,
        dispatcher: Arc<ExecutionDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            dispatcher,
            clock,
        }
    }

    /// Creates a schedule in the active state and registers its timer.
    ///
    /// # Errors
    ///
    /// Returns `validation_error` for definition failures, `not_found`
    /// for a missing intent reference, and `provider_error` when the
    /// timer provider rejects the registration (the created schedule is
    /// compensated away).
    pub async fn create_schedule(
        &self,
        input: CreateScheduleInput,
        actor: Actor,
    ) -> Result<CreatedSchedule, SchedulerError> {
        let now = self.clock.now();
        let timezone = input.timezone.unwrap_or_else(|| "UTC".to_string());
        input.definition.validate(input.kind, &timezone, now)?;
        let tz = parse_timezone(&timezone)?;

        let intent = match input.intent {
            IntentRef::Existing(id) => {
                self.store
                    .get_intent(id)
                    .await?
                    .ok_or(SchedulerError::NotFound {
                        entity: "task_intent",
                        id: id.as_i64(),
                    })?
            }
            IntentRef::New(new_intent) => self.store.create_intent(new_intent, now).await?,
        };

        let next_run_at = input.definition.next_run_after(input.kind, tz, now);
        if next_run_at.is_none() {
            return Err(SchedulerError::validation(
                "schedule has no future run to register",
            ));
        }

        let (schedule, audit_id) = self
            .store
            .create_schedule(
                NewSchedule {
                    task_intent_id: intent.id,
                    kind: input.kind,
                    state: ScheduleState::Active,
                    timezone,
                    definition: input.definition,
                    next_run_at,
                    created_at: now,
                },
                ScheduleAuditEntry {
                    schedule_id: ScheduleId::from_i64(0),
                    task_intent_id: intent.id,
                    action: ScheduleAuditAction::Created,
                    actor: actor.clone(),
                    trace_id: None,
                    reason: None,
                    changes: Vec::new(),
                    occurred_at: now,
                },
            )
            .await?;

        if let Err(provider_err) = self.provider.register(registration_for(&schedule)).await {
            // Compensate: the schedule must not outlive a failed timer
            // registration. The audit trail keeps both rows.
            tracing::error!(
                schedule_id = schedule.id.as_i64(),
                error = %provider_err,
                "timer registration failed; compensating schedule creation"
            );
            self.store
                .delete_schedule(
                    schedule.id,
                    ScheduleAuditEntry {
                        schedule_id: schedule.id,
                        task_intent_id: intent.id,
                        action: ScheduleAuditAction::Deleted,
                        actor,
                        trace_id: None,
                        reason: Some("timer registration failed".to_string()),
                        changes: Vec::new(),
                        occurred_at: self.clock.now(),
                    },
                )
                .await?;
            return Err(provider_err.into());
        }

        Ok(CreatedSchedule { schedule, audit_id })
    }

    /// Updates a schedule's timezone or definition.
    ///
    /// # Errors
    ///
    /// Returns `immutable_field` when the input tries to change the
    /// task intent reference, `conflict` for terminal schedules, and
    /// `validation_error` for definition failures.
    pub async fn update_schedule(
        &self,
        schedule_id: ScheduleId,
        input: UpdateScheduleInput,
        actor: Actor,
    ) -> Result<CreatedSchedule, SchedulerError> {
        let mut schedule = self.load(schedule_id).await?;
        if let Some(task_intent_id) = input.task_intent_id {
            if task_intent_id != schedule.task_intent_id {
                return Err(SchedulerError::ImmutableField {
                    field: "task_intent_id",
                });
            }
        }
        if schedule.state.is_terminal() {
            return Err(SchedulerError::Conflict {
                reason: format!("cannot update a {} schedule", schedule.state.as_str()),
            });
        }

        let now = self.clock.now();
        let mut changes = Vec::new();

        if let Some(timezone) = input.timezone {
            if timezone != schedule.timezone {
                changes.push(FieldChange::new(
                    "timezone",
                    serde_json::json!(schedule.timezone),
                    serde_json::json!(timezone),
                ));
                schedule.timezone = timezone;
            }
        }
        if let Some(definition) = input.definition {
            if definition != schedule.definition {
                changes.push(FieldChange::new(
                    "definition",
                    serde_json::to_value(&schedule.definition).unwrap_or_default(),
                    serde_json::to_value(&definition).unwrap_or_default(),
                ));
                schedule.definition = definition;
            }
        }
        schedule
            .definition
            .validate(schedule.kind, &schedule.timezone, now)?;
        let tz = schedule.tz()?;

        let next_run_at = schedule.definition.next_run_after(schedule.kind, tz, now);
        if schedule.state == ScheduleState::Active && next_run_at.is_none() {
            return Err(SchedulerError::validation(
                "updated schedule has no future run",
            ));
        }
        if next_run_at != schedule.next_run_at {
            changes.push(FieldChange::new(
                "next_run_at",
                serde_json::to_value(schedule.next_run_at).unwrap_or_default(),
                serde_json::to_value(next_run_at).unwrap_or_default(),
            ));
            schedule.next_run_at = next_run_at;
        }
        schedule.updated_at = now;

        self.provider.update(registration_for(&schedule)).await?;
        let audit_id = self
            .store
            .update_schedule(
                &schedule,
                ScheduleAuditEntry {
                    schedule_id: schedule.id,
                    task_intent_id: schedule.task_intent_id,
                    action: ScheduleAuditAction::Updated,
                    actor,
                    trace_id: None,
                    reason: None,
                    changes,
                    occurred_at: now,
                },
            )
            .await?;
        Ok(CreatedSchedule { schedule, audit_id })
    }

    /// Pauses an active schedule.
    ///
    /// # Errors
    ///
    /// Returns `conflict` when the schedule is not active.
    pub async fn pause_schedule(
        &self,
        schedule_id: ScheduleId,
        actor: Actor,
    ) -> Result<CreatedSchedule, SchedulerError> {
        self.transition(schedule_id, ScheduleState::Paused, actor, None)
            .await
    }

    /// Resumes a paused schedule.
    ///
    /// # Errors
    ///
    /// Returns `conflict` when the schedule is not paused.
    pub async fn resume_schedule(
        &self,
        schedule_id: ScheduleId,
        actor: Actor,
    ) -> Result<CreatedSchedule, SchedulerError> {
        self.transition(schedule_id, ScheduleState::Active, actor, None)
            .await
    }

    /// Cancels a schedule's timer and deletes the schedule row. Audit
    /// rows are retained.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for a missing schedule and `provider_error`
    /// when the timer could not be canceled.
    pub async fn delete_schedule(
        &self,
        schedule_id: ScheduleId,
        actor: Actor,
    ) -> Result<i64, SchedulerError> {
        let schedule = self.load(schedule_id).await?;
        self.provider.cancel(schedule.id).await?;
        let audit_id = self
            .store
            .delete_schedule(
                schedule.id,
                ScheduleAuditEntry {
                    schedule_id: schedule.id,
                    task_intent_id: schedule.task_intent_id,
                    action: ScheduleAuditAction::Deleted,
                    actor,
                    trace_id: None,
                    reason: None,
                    changes: Vec::new(),
                    occurred_at: self.clock.now(),
                },
            )
            .await?;
        Ok(audit_id)
    }

    /// Deletes a task intent, canceling its schedules first.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for a missing intent.
    pub async fn delete_intent(
        &self,
        intent_id: TaskIntentId,
        actor: Actor,
    ) -> Result<(), SchedulerError> {
        let intent = self
            .store
            .get_intent(intent_id)
            .await?
            .ok_or(SchedulerError::NotFound {
                entity: "task_intent",
                id: intent_id.as_i64(),
            })?;

        let schedules = self
            .store
            .list_schedules(ScheduleFilter {
                task_intent_id: Some(intent.id),
                ..ScheduleFilter::default()
            })
            .await?;
        for mut schedule in schedules {
            if schedule.state.is_terminal() {
                continue;
            }
            self.provider.cancel(schedule.id).await?;
            let now = self.clock.now();
            let before = schedule.state;
            schedule.state = ScheduleState::Canceled;
            schedule.next_run_at = None;
            schedule.updated_at = now;
            self.store
                .update_schedule(
                    &schedule,
                    ScheduleAuditEntry {
                        schedule_id: schedule.id,
                        task_intent_id: intent.id,
                        action: ScheduleAuditAction::Canceled,
                        actor: actor.clone(),
                        trace_id: None,
                        reason: Some("task intent deleted".to_string()),
                        changes: vec![FieldChange::new(
                            "state",
                            serde_json::json!(before.as_str()),
                            serde_json::json!(ScheduleState::Canceled.as_str()),
                        )],
                        occurred_at: now,
                    },
                )
                .await?;
        }
        self.store.delete_intent(intent.id).await?;
        Ok(())
    }

    /// Runs a schedule immediately with a locally minted trace id.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for a missing schedule and `conflict` for a
    /// terminal one.
    pub async fn run_now(
        &self,
        schedule_id: ScheduleId,
        _actor: Actor,
    ) -> Result<Execution, SchedulerError> {
        let schedule = self.load(schedule_id).await?;
        if schedule.state.is_terminal() {
            return Err(SchedulerError::Conflict {
                reason: format!("cannot run a {} schedule", schedule.state.as_str()),
            });
        }
        let now = self.clock.now();
        let outcome = self
            .dispatcher
            .dispatch(&ProviderCallback {
                schedule_id: schedule.id,
                scheduled_for: Some(now),
                trace_id: TraceId::new(),
                emitted_at: now,
                trigger_source: "run_now".to_string(),
                provider_attempt: 1,
            })
            .await
            .map_err(|e| SchedulerError::Storage {
                reason: e.to_string(),
            })?;
        match outcome {
            DispatchOutcome::Completed { execution } => Ok(execution),
            DispatchOutcome::Duplicate { execution_id } => {
                self.store
                    .get_execution(execution_id)
                    .await?
                    .ok_or(SchedulerError::NotFound {
                        entity: "execution",
                        id: execution_id.as_i64(),
                    })
            }
            DispatchOutcome::Skipped { reason } => Err(SchedulerError::Conflict { reason }),
        }
    }

    /// Fetches a schedule.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for a missing schedule.
    pub async fn get_schedule(&self, schedule_id: ScheduleId) -> Result<Schedule, SchedulerError> {
        self.load(schedule_id).await
    }

    /// Lists schedules matching the filter.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the listing fails.
    pub async fn list_schedules(
        &self,
        filter: ScheduleFilter,
    ) -> Result<Vec<Schedule>, SchedulerError> {
        Ok(self.store.list_schedules(filter).await?)
    }

    /// Lists audit rows for a schedule.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the listing fails.
    pub async fn list_schedule_audits(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<Vec<ScheduleAuditRecord>, SchedulerError> {
        Ok(self.store.list_schedule_audits(schedule_id).await?)
    }

    /// Fetches an execution.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for a missing execution.
    pub async fn get_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Execution, SchedulerError> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or(SchedulerError::NotFound {
                entity: "execution",
                id: execution_id.as_i64(),
            })
    }

    /// Lists executions for a schedule, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the listing fails.
    pub async fn list_executions(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<Vec<Execution>, SchedulerError> {
        Ok(self.store.list_executions(schedule_id).await?)
    }

    async fn load(&self, schedule_id: ScheduleId) -> Result<Schedule, SchedulerError> {
        self.store
            .get_schedule(schedule_id)
            .await?
            .ok_or(SchedulerError::NotFound {
                entity: "schedule",
                id: schedule_id.as_i64(),
            })
    }

    async fn transition(
        &self,
        schedule_id: ScheduleId,
        target: ScheduleState,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<CreatedSchedule, SchedulerError> {
        let mut schedule = self.load(schedule_id).await?;
        if !schedule.state.can_transition_to(target) {
            return Err(SchedulerError::Conflict {
                reason: format!(
                    "illegal transition {} -> {}",
                    schedule.state.as_str(),
                    target.as_str()
                ),
            });
        }

        let now = self.clock.now();
        let before = schedule.state;
        let action = match target {
            ScheduleState::Paused => {
                self.provider.pause(schedule.id).await?;
                schedule.next_run_at = None;
                ScheduleAuditAction::Paused
            }
            ScheduleState::Active => {
                let tz = schedule.tz()?;
                let next_run_at = schedule.definition.next_run_after(schedule.kind, tz, now);
                if next_run_at.is_none() {
                    return Err(SchedulerError::validation(
                        "schedule has no future run to resume",
                    ));
                }
                schedule.next_run_at = next_run_at;
                schedule.state = target;
                self.provider.resume(registration_for(&schedule)).await?;
                ScheduleAuditAction::Resumed
            }
            ScheduleState::Canceled => {
                self.provider.cancel(schedule.id).await?;
                schedule.next_run_at = None;
                ScheduleAuditAction::Canceled
            }
            ScheduleState::Completed => ScheduleAuditAction::Completed,
        };
        schedule.state = target;
        schedule.updated_at = now;

        let audit_id = self
            .store
            .update_schedule(
                &schedule,
                ScheduleAuditEntry {
                    schedule_id: schedule.id,
                    task_intent_id: schedule.task_intent_id,
                    action,
                    actor,
                    trace_id: None,
                    reason,
                    changes: vec![FieldChange::new(
                        "state",
                        serde_json::json!(before.as_str()),
                        serde_json::json!(target.as_str()),
                    )],
                    occurred_at: now,
                },
            )
            .await?;
        Ok(CreatedSchedule { schedule, audit_id })
    }
}

fn registration_for(schedule: &Schedule) -> TimerRegistration {
    TimerRegistration {
        schedule_id: schedule.id,
        kind: schedule.kind,
        fire_at: schedule.next_run_at,
        cadence_seconds: schedule.definition.evaluation_cadence_seconds,
        timezone: schedule.timezone.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{
        InvocationRequest, InvocationResult, Invoker, NullFailureNotifier,
    };
    use crate::provider::{ProviderCall, RecordingProvider};
    use crate::retry::RetryPolicy;
    use crate::schedule::IntervalUnit;
    use crate::store::InMemorySchedulerStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use minder_core::FixedClock;

    struct AlwaysSucceeds;

    #[async_trait]
    impl Invoker for AlwaysSucceeds {
        async fn invoke_execution(&self, _request: InvocationRequest) -> InvocationResult {
            InvocationResult::success("agent_completed")
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()
    }

    struct Harness {
        store: Arc<InMemorySchedulerStore>,
        provider: Arc<RecordingProvider>,
        service: SchedulerService,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemorySchedulerStore::new());
        let provider = Arc::new(RecordingProvider::new());
        let clock = Arc::new(FixedClock::new(now()));
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            store.clone(),
            Arc::new(AlwaysSucceeds),
            provider.clone(),
            Arc::new(NullFailureNotifier),
            RetryPolicy::default(),
            clock.clone(),
        ));
        let service = SchedulerService::new(store.clone(), provider.clone(), dispatcher, clock);
        Harness {
            store,
            provider,
            service,
        }
    }

    fn interval_input() -> CreateScheduleInput {
        CreateScheduleInput {
            intent: IntentRef::New(NewTaskIntent::new("Daily digest", "marion")),
            kind: ScheduleKind::Interval,
            timezone: None,
            definition: ScheduleDefinition::interval(1, IntervalUnit::Day, now()),
        }
    }

    #[tokio::test]
    async fn create_registers_timer_and_audits() {
        let h = harness();
        let created = h
            .service
            .create_schedule(interval_input(), Actor::human("marion"))
            .await
            .expect("create");

        assert_eq!(created.schedule.state, ScheduleState::Active);
        assert!(created.schedule.next_run_at.unwrap() > now());
        assert!(matches!(
            h.provider.calls()[0],
            ProviderCall::Register(_)
        ));

        let audits = h
            .service
            .list_schedule_audits(created.schedule.id)
            .await
            .expect("audits");
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].entry.action, ScheduleAuditAction::Created);
        assert_eq!(audits[0].id, created.audit_id);
    }

    #[tokio::test]
    async fn create_with_invalid_definition_fails_validation() {
        let h = harness();
        let mut input = interval_input();
        input.definition.interval_count = Some(0);

        let err = h
            .service
            .create_schedule(input, Actor::human("marion"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation { .. }));
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_compensates_creation() {
        let h = harness();
        h.provider.fail_next("timer backend outage");

        let err = h
            .service
            .create_schedule(interval_input(), Actor::human("marion"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Provider { .. }));

        let schedules = h
            .service
            .list_schedules(ScheduleFilter::default())
            .await
            .expect("list");
        assert!(schedules.is_empty());
    }

    #[tokio::test]
    async fn pause_resume_matrix() {
        let h = harness();
        let created = h
            .service
            .create_schedule(interval_input(), Actor::human("marion"))
            .await
            .expect("create");
        let id = created.schedule.id;

        let paused = h
            .service
            .pause_schedule(id, Actor::human("marion"))
            .await
            .expect("pause");
        assert_eq!(paused.schedule.state, ScheduleState::Paused);
        assert!(paused.schedule.next_run_at.is_none());

        // Same-state transition is rejected.
        let err = h
            .service
            .pause_schedule(id, Actor::human("marion"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict { .. }));

        let resumed = h
            .service
            .resume_schedule(id, Actor::human("marion"))
            .await
            .expect("resume");
        assert_eq!(resumed.schedule.state, ScheduleState::Active);
        assert!(resumed.schedule.next_run_at.is_some());
    }

    #[tokio::test]
    async fn task_intent_reference_is_immutable() {
        let h = harness();
        let created = h
            .service
            .create_schedule(interval_input(), Actor::human("marion"))
            .await
            .expect("create");

        let err = h
            .service
            .update_schedule(
                created.schedule.id,
                UpdateScheduleInput {
                    task_intent_id: Some(TaskIntentId::from_i64(999)),
                    ..UpdateScheduleInput::default()
                },
                Actor::human("marion"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::ImmutableField {
                field: "task_intent_id"
            }
        ));
    }

    #[tokio::test]
    async fn update_records_field_changes() {
        let h = harness();
        let created = h
            .service
            .create_schedule(interval_input(), Actor::human("marion"))
            .await
            .expect("create");

        let updated = h
            .service
            .update_schedule(
                created.schedule.id,
                UpdateScheduleInput {
                    timezone: Some("Europe/Amsterdam".to_string()),
                    ..UpdateScheduleInput::default()
                },
                Actor::human("marion"),
            )
            .await
            .expect("update");
        assert_eq!(updated.schedule.timezone, "Europe/Amsterdam");

        let audits = h
            .service
            .list_schedule_audits(created.schedule.id)
            .await
            .expect("audits");
        let update_audit = audits.last().unwrap();
        assert_eq!(update_audit.entry.action, ScheduleAuditAction::Updated);
        assert!(update_audit
            .entry
            .changes
            .iter()
            .any(|c| c.field == "timezone"));
    }

    #[tokio::test]
    async fn run_now_produces_execution() {
        let h = harness();
        let created = h
            .service
            .create_schedule(interval_input(), Actor::human("marion"))
            .await
            .expect("create");

        let execution = h
            .service
            .run_now(created.schedule.id, Actor::human("marion"))
            .await
            .expect("run now");
        assert_eq!(execution.trigger_source, "run_now");
        assert_eq!(
            execution.status,
            crate::execution::ExecutionStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn delete_intent_cancels_schedules() {
        let h = harness();
        let created = h
            .service
            .create_schedule(interval_input(), Actor::human("marion"))
            .await
            .expect("create");
        let intent_id = created.schedule.task_intent_id;

        h.service
            .delete_intent(intent_id, Actor::human("marion"))
            .await
            .expect("delete intent");

        let schedule = h
            .store
            .get_schedule(created.schedule.id)
            .await
            .expect("lookup")
            .expect("schedule row kept");
        assert_eq!(schedule.state, ScheduleState::Canceled);
        assert!(h
            .provider
            .calls()
            .iter()
            .any(|c| matches!(c, ProviderCall::Cancel(_))));
    }

    #[tokio::test]
    async fn delete_schedule_keeps_audits() {
        let h = harness();
        let created = h
            .service
            .create_schedule(interval_input(), Actor::human("marion"))
            .await
            .expect("create");

        h.service
            .delete_schedule(created.schedule.id, Actor::human("marion"))
            .await
            .expect("delete");

        let err = h
            .service
            .get_schedule(created.schedule.id)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound { .. }));

        let audits = h
            .service
            .list_schedule_audits(created.schedule.id)
            .await
            .expect("audits");
        assert_eq!(audits.len(), 2);
    }
}
