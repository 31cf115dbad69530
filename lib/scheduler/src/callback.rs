//! Provider callback bridge.
//!
//! Translates provider-agnostic "fire now" callbacks into dispatcher
//! invocations, enforcing trace-id idempotency: at most one execution
//! exists per (schedule_id, trace_id) pair.

use chrono::{DateTime, Duration, Utc};
use minder_core::{ExecutionId, ScheduleId, TraceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dispatcher::{DispatchOutcome, ExecutionDispatcher};
use crate::error::{CallbackBridgeError, DispatchError};
use crate::store::SchedulerStore;

/// Provider-agnostic callback payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCallback {
    /// The schedule that fired.
    pub schedule_id: ScheduleId,
    /// The time the run was scheduled for. Defaults to `emitted_at`.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// The provider's trace id for this firing.
    pub trace_id: TraceId,
    /// When the provider emitted the callback.
    pub emitted_at: DateTime<Utc>,
    /// Which provider path produced the callback.
    pub trigger_source: String,
    /// The provider's own delivery attempt counter.
    pub provider_attempt: u32,
}

impl ProviderCallback {
    /// Returns `scheduled_for`, defaulting to `emitted_at`.
    #[must_use]
    pub fn effective_scheduled_for(&self) -> DateTime<Utc> {
        self.scheduled_for.unwrap_or(self.emitted_at)
    }

    /// Validates the payload.
    ///
    /// # Errors
    ///
    /// Returns a `callback_bridge_error` for a non-positive schedule id,
    /// empty trace id or trigger source, or a `scheduled_for` more than
    /// 24 hours ahead of `emitted_at`.
    pub fn validate(&self) -> Result<(), CallbackBridgeError> {
        if !self.schedule_id.is_valid() {
            return Err(CallbackBridgeError::InvalidPayload {
                reason: "schedule_id must be a positive integer".to_string(),
            });
        }
        if self.trace_id.is_empty() {
            return Err(CallbackBridgeError::InvalidPayload {
                reason: "trace_id is required".to_string(),
            });
        }
        if self.trigger_source.trim().is_empty() {
            return Err(CallbackBridgeError::InvalidPayload {
                reason: "trigger_source is required".to_string(),
            });
        }
        let scheduled_for = self.effective_scheduled_for();
        if scheduled_for > self.emitted_at
            && scheduled_for - self.emitted_at > Duration::hours(24)
        {
            return Err(CallbackBridgeError::InvalidPayload {
                reason: "scheduled_for is too far ahead of emitted_at".to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome of handling a provider callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// The callback was forwarded to the dispatcher.
    Accepted {
        /// The execution the dispatcher produced, when one was created.
        execution_id: Option<ExecutionId>,
    },
    /// An execution for this (schedule_id, trace_id) already exists.
    Duplicate {
        /// The existing execution.
        duplicate_execution_id: ExecutionId,
    },
}

/// Bridges provider callbacks into the dispatcher with idempotency.
pub struct CallbackBridge {
    store: Arc<dyn SchedulerStore>,
    dispatcher: Arc<ExecutionDispatcher>,
}

impl CallbackBridge {
    /// Creates a bridge over the given store and dispatcher.
    #[must_use]
    pub fn new(store: Arc<dyn SchedulerStore>, dispatcher: Arc<ExecutionDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Validates a callback, enforces idempotency, and forwards it.
    ///
    /// # Errors
    ///
    /// Returns a `callback_bridge_error` for invalid payloads or when
    /// the idempotency lookup fails; dispatcher failures are surfaced
    /// unchanged.
    pub async fn handle_callback(
        &self,
        callback: ProviderCallback,
    ) -> Result<CallbackOutcome, CallbackBridgeError> {
        callback.validate()?;

        if let Some(existing) = self
            .store
            .find_execution_by_trace(callback.schedule_id, &callback.trace_id)
            .await?
        {
            tracing::debug!(
                schedule_id = callback.schedule_id.as_i64(),
                trace_id = %callback.trace_id,
                execution_id = existing.id.as_i64(),
                "duplicate provider callback"
            );
            return Ok(CallbackOutcome::Duplicate {
                duplicate_execution_id: existing.id,
            });
        }

        match self.dispatcher.dispatch(&callback).await {
            Ok(DispatchOutcome::Duplicate { execution_id }) => Ok(CallbackOutcome::Duplicate {
                duplicate_execution_id: execution_id,
            }),
            Ok(DispatchOutcome::Completed { execution }) => Ok(CallbackOutcome::Accepted {
                execution_id: Some(execution.id),
            }),
            Ok(DispatchOutcome::Skipped { reason }) => {
                tracing::info!(
                    schedule_id = callback.schedule_id.as_i64(),
                    reason = %reason,
                    "callback skipped by dispatcher"
                );
                Ok(CallbackOutcome::Accepted { execution_id: None })
            }
            Err(DispatchError::Storage { reason }) => {
                Err(CallbackBridgeError::Storage { reason })
            }
            Err(other) => Err(CallbackBridgeError::Storage {
                reason: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn callback() -> ProviderCallback {
        let t = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        ProviderCallback {
            schedule_id: ScheduleId::from_i64(1),
            scheduled_for: Some(t),
            trace_id: TraceId::from_string("t1"),
            emitted_at: t,
            trigger_source: "scheduler_callback".to_string(),
            provider_attempt: 1,
        }
    }

    #[test]
    fn valid_payload_passes() {
        assert!(callback().validate().is_ok());
    }

    #[test]
    fn non_positive_schedule_id_rejected() {
        let mut cb = callback();
        cb.schedule_id = ScheduleId::from_i64(0);
        let err = cb.validate().unwrap_err();
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn empty_trace_id_rejected() {
        let mut cb = callback();
        cb.trace_id = TraceId::from_string("  ");
        assert!(cb.validate().is_err());
    }

    #[test]
    fn empty_trigger_source_rejected() {
        let mut cb = callback();
        cb.trigger_source = String::new();
        assert!(cb.validate().is_err());
    }

    #[test]
    fn far_future_scheduled_for_rejected() {
        let mut cb = callback();
        cb.scheduled_for = Some(cb.emitted_at + Duration::hours(25));
        assert!(cb.validate().is_err());

        cb.scheduled_for = Some(cb.emitted_at + Duration::hours(23));
        assert!(cb.validate().is_ok());
    }

    #[test]
    fn missing_scheduled_for_defaults_to_emitted_at() {
        let mut cb = callback();
        cb.scheduled_for = None;
        assert_eq!(cb.effective_scheduled_for(), cb.emitted_at);
        assert!(cb.validate().is_ok());
    }

    mod end_to_end {
        use super::*;
        use crate::audit::{ScheduleAuditAction, ScheduleAuditEntry};
        use crate::dispatcher::{
            InvocationRequest, InvocationResult, Invoker, NullFailureNotifier,
        };
        use crate::execution::ExecutionStatus;
        use crate::intent::NewTaskIntent;
        use crate::provider::RecordingProvider;
        use crate::retry::RetryPolicy;
        use crate::schedule::{IntervalUnit, ScheduleDefinition, ScheduleKind, ScheduleState};
        use crate::store::{InMemorySchedulerStore, NewSchedule, SchedulerStore};
        use async_trait::async_trait;
        use chrono::TimeZone;
        use minder_core::{Actor, FixedClock};
        use std::sync::Arc;

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

        async fn seeded_bridge() -> (Arc<InMemorySchedulerStore>, CallbackBridge, ScheduleId) {
            let store = Arc::new(InMemorySchedulerStore::new());
            let intent = store
                .create_intent(NewTaskIntent::new("Water plants", "marion"), now())
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
                        next_run_at: Some(now() + Duration::days(1)),
                        created_at: now(),
                    },
                    ScheduleAuditEntry {
                        schedule_id: ScheduleId::from_i64(0),
                        task_intent_id: intent.id,
                        action: ScheduleAuditAction::Created,
                        actor: Actor::human("marion"),
                        trace_id: None,
                        reason: None,
                        changes: Vec::new(),
                        occurred_at: now(),
                    },
                )
                .await
                .expect("schedule");
            let dispatcher = Arc::new(ExecutionDispatcher::new(
                store.clone(),
                Arc::new(AlwaysSucceeds),
                Arc::new(RecordingProvider::new()),
                Arc::new(NullFailureNotifier),
                RetryPolicy::default(),
                Arc::new(FixedClock::new(now())),
            ));
            let bridge = CallbackBridge::new(store.clone(), dispatcher);
            (store, bridge, schedule.id)
        }

        // Seed an interval schedule, deliver a callback, replay it:
        // one execution in succeeded, and the replay reports the
        // duplicate without touching execution or audit counts.
        #[tokio::test]
        async fn replayed_callback_is_idempotent() {
            let (store, bridge, schedule_id) = seeded_bridge().await;
            let cb = ProviderCallback {
                schedule_id,
                scheduled_for: Some(now()),
                trace_id: TraceId::from_string("t1"),
                emitted_at: now(),
                trigger_source: "scheduler_callback".to_string(),
                provider_attempt: 1,
            };

            let first = bridge.handle_callback(cb.clone()).await.expect("first");
            let CallbackOutcome::Accepted {
                execution_id: Some(execution_id),
            } = first
            else {
                panic!("expected accepted outcome with an execution");
            };
            let execution = store
                .get_execution(execution_id)
                .await
                .expect("lookup")
                .expect("execution");
            assert_eq!(execution.status, ExecutionStatus::Succeeded);
            let audit_count = store.execution_audit_count();

            let second = bridge.handle_callback(cb).await.expect("second");
            assert_eq!(
                second,
                CallbackOutcome::Duplicate {
                    duplicate_execution_id: execution_id
                }
            );
            assert_eq!(
                store
                    .list_executions(schedule_id)
                    .await
                    .expect("list")
                    .len(),
                1
            );
            assert_eq!(store.execution_audit_count(), audit_count);
        }
    }
}
