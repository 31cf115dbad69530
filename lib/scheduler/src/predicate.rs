//! Predicate evaluation for conditional schedules.
//!
//! The provider fires an evaluation callback on the schedule's cadence.
//! The evaluator resolves the subject through an injected resolver,
//! applies the operator, persists one idempotent audit row keyed by the
//! unique evaluation id, updates the schedule, and dispatches a real
//! execution when the predicate holds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_core::{Actor, Clock, ExecutionId, ScheduleId, TraceId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

use crate::audit::{PredicateEvaluationAuditEntry, ScheduleAuditAction, ScheduleAuditEntry};
use crate::callback::ProviderCallback;
use crate::dispatcher::{DispatchOutcome, ExecutionDispatcher};
use crate::error::PredicateError;
use crate::schedule::{PredicateOperator, PredicateValueType, ScheduleKind, ScheduleState};
use crate::store::SchedulerStore;

/// Outcome of a predicate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvaluationStatus {
    True,
    False,
    Error,
}

impl EvaluationStatus {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Error => "ERROR",
        }
    }
}

/// Why a subject resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverErrorKind {
    /// The subject does not exist.
    Missing,
    /// The backing system could not be reached.
    Unavailable,
}

/// A subject resolution failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverError {
    /// Failure category.
    pub kind: ResolverErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ResolverError {
    /// The subject does not exist.
    #[must_use]
    pub fn missing(message: impl Into<String>) -> Self {
        Self {
            kind: ResolverErrorKind::Missing,
            message: message.into(),
        }
    }

    /// The backing system could not be reached.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ResolverErrorKind::Unavailable,
            message: message.into(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self.kind {
            ResolverErrorKind::Missing => "subject_missing",
            ResolverErrorKind::Unavailable => "subject_unavailable",
        }
    }
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message)
    }
}

impl std::error::Error for ResolverError {}

/// Resolves predicate subjects to observed values.
#[async_trait]
pub trait SubjectResolver: Send + Sync {
    /// Resolves a subject path to its current value.
    ///
    /// `Ok(None)` means the path resolved but holds nothing.
    ///
    /// # Errors
    ///
    /// Returns a resolver error when the subject is missing or the
    /// backing system is unavailable.
    async fn resolve(&self, subject: &str) -> Result<Option<JsonValue>, ResolverError>;
}

/// Evaluation callback payload from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCallback {
    /// The conditional schedule to evaluate.
    pub schedule_id: ScheduleId,
    /// Provider-supplied unique evaluation id; the idempotency key.
    pub evaluation_id: String,
    /// The trace id for this evaluation.
    pub trace_id: TraceId,
    /// The instant the evaluation was scheduled for.
    pub evaluation_time: DateTime<Utc>,
}

/// The composed result of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateEvaluationResult {
    /// TRUE, FALSE, or ERROR.
    pub status: EvaluationStatus,
    /// Machine-readable outcome code.
    pub result_code: String,
    /// The observed subject value, when resolved.
    pub observed: Option<JsonValue>,
    /// When the evaluation ran.
    pub evaluated_at: DateTime<Utc>,
    /// Error detail for ERROR outcomes.
    pub error: Option<String>,
}

/// What the evaluator did with a callback.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    /// The composed evaluation result.
    pub result: PredicateEvaluationResult,
    /// True when this evaluation id had already been recorded; the
    /// call was a no-op beyond composing the result.
    pub duplicate: bool,
    /// The execution dispatched on TRUE, when one was created.
    pub dispatched_execution_id: Option<ExecutionId>,
}

/// Evaluates conditional schedule predicates.
pub struct PredicateEvaluator {
    store: Arc<dyn SchedulerStore>,
    dispatcher: Arc<ExecutionDispatcher>,
    resolver: Arc<dyn SubjectResolver>,
    clock: Arc<dyn Clock>,
}

impl PredicateEvaluator {
    /// Creates an evaluator.
    #[must_use]
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        dispatcher: Arc<ExecutionDispatcher>,
        resolver: Arc<dyn SubjectResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            resolver,
            clock,
        }
    }

    /// Evaluates the predicate for an evaluation callback.
    ///
    /// # Errors
    ///
    /// Returns a predicate error when the schedule is missing, not
    /// conditional, not active, or persistence fails. Subject and
    /// operator failures are composed into an ERROR result, not
    /// surfaced as errors.
    pub async fn evaluate(
        &self,
        callback: EvaluationCallback,
    ) -> Result<EvaluationOutcome, PredicateError> {
        let Some(mut schedule) = self.store.get_schedule(callback.schedule_id).await? else {
            return Err(PredicateError::NotFound {
                schedule_id: callback.schedule_id,
            });
        };
        if schedule.kind != ScheduleKind::Conditional {
            return Err(PredicateError::WrongKind {
                schedule_id: schedule.id,
            });
        }
        if schedule.state != ScheduleState::Active {
            return Err(PredicateError::Inactive {
                schedule_id: schedule.id,
            });
        }

        let definition = &schedule.definition;
        let (subject, operator, value_type) = match (
            definition.predicate_subject.clone(),
            definition.predicate_operator,
            definition.predicate_value_type,
        ) {
            (Some(subject), Some(operator), Some(value_type)) => (subject, operator, value_type),
            _ => {
                return Err(PredicateError::IncompleteDefinition {
                    schedule_id: schedule.id,
                    reason: "predicate fields are not fully populated".to_string(),
                });
            }
        };
        let literal = definition.predicate_value.clone();

        let evaluated_at = self.clock.now();
        let result = match self.resolver.resolve(&subject).await {
            Ok(observed) => apply_operator(operator, value_type, observed, literal.as_ref(), evaluated_at),
            Err(err) => PredicateEvaluationResult {
                status: EvaluationStatus::Error,
                result_code: err.error_code().to_string(),
                observed: None,
                evaluated_at,
                error: Some(err.message.clone()),
            },
        };

        let inserted = self
            .store
            .record_predicate_evaluation(PredicateEvaluationAuditEntry {
                evaluation_id: callback.evaluation_id.clone(),
                schedule_id: schedule.id,
                task_intent_id: schedule.task_intent_id,
                actor: Actor::scheduled(),
                trace_id: callback.trace_id.clone(),
                predicate_subject: subject,
                predicate_operator: operator,
                predicate_value: literal,
                predicate_value_type: value_type,
                evaluation_time: callback.evaluation_time,
                evaluated_at,
                status: result.status,
                result_code: result.result_code.clone(),
                observed_value: result.observed.clone(),
                error_code: match result.status {
                    EvaluationStatus::Error => Some(result.result_code.clone()),
                    _ => None,
                },
                error_message: result.error.clone(),
            })
            .await?;
        if !inserted {
            tracing::debug!(
                evaluation_id = %callback.evaluation_id,
                schedule_id = schedule.id.as_i64(),
                "duplicate predicate evaluation"
            );
            return Ok(EvaluationOutcome {
                result,
                duplicate: true,
                dispatched_execution_id: None,
            });
        }

        schedule.record_evaluation(
            evaluated_at,
            result.status,
            match result.status {
                EvaluationStatus::Error => Some(result.result_code.clone()),
                _ => None,
            },
        );
        self.store
            .update_schedule(
                &schedule,
                ScheduleAuditEntry {
                    schedule_id: schedule.id,
                    task_intent_id: schedule.task_intent_id,
                    action: ScheduleAuditAction::EvaluationRecorded,
                    actor: Actor::scheduled(),
                    trace_id: Some(callback.trace_id.clone()),
                    reason: Some(result.result_code.clone()),
                    changes: Vec::new(),
                    occurred_at: evaluated_at,
                },
            )
            .await?;

        let mut dispatched_execution_id = None;
        if result.status == EvaluationStatus::True {
            let outcome = self
                .dispatcher
                .dispatch(&ProviderCallback {
                    schedule_id: schedule.id,
                    scheduled_for: Some(callback.evaluation_time),
                    trace_id: callback.trace_id,
                    emitted_at: callback.evaluation_time,
                    trigger_source: "predicate_evaluation".to_string(),
                    provider_attempt: 1,
                })
                .await
                .map_err(|e| PredicateError::Storage {
                    reason: e.to_string(),
                })?;
            dispatched_execution_id = match outcome {
                DispatchOutcome::Completed { execution } => Some(execution.id),
                DispatchOutcome::Duplicate { execution_id } => Some(execution_id),
                DispatchOutcome::Skipped { .. } => None,
            };
        }

        Ok(EvaluationOutcome {
            result,
            duplicate: false,
            dispatched_execution_id,
        })
    }
}

/// Applies an operator to the observed value and literal.
fn apply_operator(
    operator: PredicateOperator,
    value_type: PredicateValueType,
    observed: Option<JsonValue>,
    literal: Option<&JsonValue>,
    evaluated_at: DateTime<Utc>,
) -> PredicateEvaluationResult {
    let verdict = |holds: bool, observed: Option<JsonValue>| PredicateEvaluationResult {
        status: if holds {
            EvaluationStatus::True
        } else {
            EvaluationStatus::False
        },
        result_code: if holds {
            "predicate_true".to_string()
        } else {
            "predicate_false".to_string()
        },
        observed,
        evaluated_at,
        error: None,
    };
    let error = |code: &str, message: String, observed: Option<JsonValue>| {
        PredicateEvaluationResult {
            status: EvaluationStatus::Error,
            result_code: code.to_string(),
            observed,
            evaluated_at,
            error: Some(message),
        }
    };

    if operator == PredicateOperator::Exists {
        let holds = observed.as_ref().is_some_and(|v| !v.is_null());
        return verdict(holds, observed);
    }

    let Some(observed_value) = observed.filter(|v| !v.is_null()) else {
        return error(
            "subject_missing",
            "subject resolved to no value".to_string(),
            None,
        );
    };
    let Some(literal) = literal else {
        return error(
            "operator_type_mismatch",
            "predicate literal is missing".to_string(),
            Some(observed_value),
        );
    };

    match value_type {
        PredicateValueType::Number => {
            let (Some(lhs), Some(rhs)) = (coerce_number(&observed_value), coerce_number(literal))
            else {
                return error(
                    "operator_type_mismatch",
                    "values are not comparable as numbers".to_string(),
                    Some(observed_value),
                );
            };
            let holds = match operator {
                PredicateOperator::Eq => lhs == rhs,
                PredicateOperator::Neq => lhs != rhs,
                PredicateOperator::Gt => lhs > rhs,
                PredicateOperator::Gte => lhs >= rhs,
                PredicateOperator::Lt => lhs < rhs,
                PredicateOperator::Lte => lhs <= rhs,
                PredicateOperator::Matches => lhs == rhs,
                PredicateOperator::Exists => unreachable!("handled above"),
            };
            verdict(holds, Some(observed_value))
        }
        PredicateValueType::String => {
            if operator.is_ordering() {
                return error(
                    "operator_type_mismatch",
                    format!("operator {} is not defined for strings", operator.as_str()),
                    Some(observed_value),
                );
            }
            let lhs = coerce_string(&observed_value);
            let rhs = coerce_string(literal);
            let holds = match operator {
                PredicateOperator::Eq | PredicateOperator::Matches => lhs == rhs,
                PredicateOperator::Neq => lhs != rhs,
                _ => unreachable!("ordering handled above"),
            };
            verdict(holds, Some(observed_value))
        }
        PredicateValueType::Boolean => {
            let (Some(lhs), Some(rhs)) = (observed_value.as_bool(), literal.as_bool()) else {
                return error(
                    "operator_type_mismatch",
                    "values are not comparable as booleans".to_string(),
                    Some(observed_value),
                );
            };
            let holds = match operator {
                PredicateOperator::Eq | PredicateOperator::Matches => lhs == rhs,
                PredicateOperator::Neq => lhs != rhs,
                _ => {
                    return error(
                        "operator_type_mismatch",
                        format!("operator {} is not defined for booleans", operator.as_str()),
                        Some(observed_value),
                    );
                }
            };
            verdict(holds, Some(observed_value))
        }
    }
}

/// Coerces a JSON value to a number; numeric strings coerce too.
fn coerce_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Coerces a JSON scalar to its string form.
fn coerce_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{InvocationRequest, InvocationResult, Invoker, NullFailureNotifier};
    use crate::intent::NewTaskIntent;
    use crate::provider::RecordingProvider;
    use crate::retry::RetryPolicy;
    use crate::schedule::ScheduleDefinition;
    use crate::store::{InMemorySchedulerStore, NewSchedule};
    use chrono::TimeZone;
    use minder_core::FixedClock;

    struct AlwaysSucceeds;

    #[async_trait]
    impl Invoker for AlwaysSucceeds {
        async fn invoke_execution(&self, _request: InvocationRequest) -> InvocationResult {
            InvocationResult::success("agent_completed")
        }
    }

    struct StaticResolver {
        value: Result<Option<JsonValue>, ResolverError>,
    }

    #[async_trait]
    impl SubjectResolver for StaticResolver {
        async fn resolve(&self, _subject: &str) -> Result<Option<JsonValue>, ResolverError> {
            self.value.clone()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()
    }

    async fn evaluator_with(
        resolver_value: Result<Option<JsonValue>, ResolverError>,
        operator: PredicateOperator,
        literal: JsonValue,
        value_type: PredicateValueType,
    ) -> (Arc<InMemorySchedulerStore>, PredicateEvaluator, ScheduleId) {
        let store = Arc::new(InMemorySchedulerStore::new());
        let clock = Arc::new(FixedClock::new(now()));
        let intent = store
            .create_intent(NewTaskIntent::new("Watch inbox", "marion"), now())
            .await
            .expect("intent");
        let (schedule, _) = store
            .create_schedule(
                NewSchedule {
                    task_intent_id: intent.id,
                    kind: ScheduleKind::Conditional,
                    state: ScheduleState::Active,
                    timezone: "UTC".to_string(),
                    definition: ScheduleDefinition::conditional(
                        "inbox.unread_count",
                        operator,
                        literal,
                        value_type,
                        300,
                    ),
                    next_run_at: Some(now() + chrono::Duration::seconds(300)),
                    created_at: now(),
                },
                ScheduleAuditEntry {
                    schedule_id: ScheduleId::from_i64(0),
                    task_intent_id: intent.id,
                    action: ScheduleAuditAction::Created,
                    actor: minder_core::Actor::human("marion"),
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
            clock.clone(),
        ));
        let evaluator = PredicateEvaluator::new(
            store.clone(),
            dispatcher,
            Arc::new(StaticResolver {
                value: resolver_value,
            }),
            clock,
        );
        (store, evaluator, schedule.id)
    }

    fn eval_callback(schedule_id: ScheduleId, evaluation_id: &str, trace: &str) -> EvaluationCallback {
        EvaluationCallback {
            schedule_id,
            evaluation_id: evaluation_id.to_string(),
            trace_id: TraceId::from_string(trace),
            evaluation_time: now(),
        }
    }

    #[tokio::test]
    async fn true_predicate_dispatches_execution() {
        let (store, evaluator, schedule_id) = evaluator_with(
            Ok(Some(serde_json::json!(12))),
            PredicateOperator::Gte,
            serde_json::json!(10),
            PredicateValueType::Number,
        )
        .await;

        let outcome = evaluator
            .evaluate(eval_callback(schedule_id, "eval-1", "t1"))
            .await
            .expect("evaluate");
        assert_eq!(outcome.result.status, EvaluationStatus::True);
        assert!(!outcome.duplicate);
        let execution_id = outcome.dispatched_execution_id.expect("dispatched");

        let execution = store
            .get_execution(execution_id)
            .await
            .expect("lookup")
            .expect("execution");
        assert_eq!(execution.trigger_source, "predicate_evaluation");

        let schedule = store
            .get_schedule(schedule_id)
            .await
            .expect("lookup")
            .expect("schedule");
        assert_eq!(
            schedule.last_evaluation_status,
            Some(EvaluationStatus::True)
        );
        assert!(schedule.last_evaluated_at.is_some());
    }

    #[tokio::test]
    async fn false_predicate_does_not_dispatch() {
        let (store, evaluator, schedule_id) = evaluator_with(
            Ok(Some(serde_json::json!(3))),
            PredicateOperator::Gte,
            serde_json::json!(10),
            PredicateValueType::Number,
        )
        .await;

        let outcome = evaluator
            .evaluate(eval_callback(schedule_id, "eval-1", "t1"))
            .await
            .expect("evaluate");
        assert_eq!(outcome.result.status, EvaluationStatus::False);
        assert!(outcome.dispatched_execution_id.is_none());
        assert_eq!(
            store
                .list_executions(schedule_id)
                .await
                .expect("list")
                .len(),
            0
        );
    }

    #[tokio::test]
    async fn duplicate_evaluation_id_is_noop() {
        let (store, evaluator, schedule_id) = evaluator_with(
            Ok(Some(serde_json::json!(12))),
            PredicateOperator::Gte,
            serde_json::json!(10),
            PredicateValueType::Number,
        )
        .await;

        let first = evaluator
            .evaluate(eval_callback(schedule_id, "eval-1", "t1"))
            .await
            .expect("first");
        assert!(!first.duplicate);
        assert_eq!(store.predicate_audit_count(), 1);

        let second = evaluator
            .evaluate(eval_callback(schedule_id, "eval-1", "t1"))
            .await
            .expect("second");
        assert!(second.duplicate);
        assert!(second.dispatched_execution_id.is_none());
        assert_eq!(store.predicate_audit_count(), 1);
        // No second execution either: the dispatch was skipped entirely.
        assert_eq!(
            store
                .list_executions(schedule_id)
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn resolver_failure_composes_error() {
        let (store, evaluator, schedule_id) = evaluator_with(
            Err(ResolverError::unavailable("vault is offline")),
            PredicateOperator::Exists,
            JsonValue::Null,
            PredicateValueType::String,
        )
        .await;

        let outcome = evaluator
            .evaluate(eval_callback(schedule_id, "eval-1", "t1"))
            .await
            .expect("evaluate");
        assert_eq!(outcome.result.status, EvaluationStatus::Error);
        assert_eq!(outcome.result.result_code, "subject_unavailable");

        let schedule = store
            .get_schedule(schedule_id)
            .await
            .expect("lookup")
            .expect("schedule");
        assert_eq!(
            schedule.last_evaluation_error.as_deref(),
            Some("subject_unavailable")
        );
    }

    #[test]
    fn operator_matrix() {
        let at = now();
        let num = |v: i64| Some(serde_json::json!(v));

        let r = apply_operator(
            PredicateOperator::Eq,
            PredicateValueType::Number,
            num(5),
            Some(&serde_json::json!(5)),
            at,
        );
        assert_eq!(r.status, EvaluationStatus::True);

        // Numeric strings coerce.
        let r = apply_operator(
            PredicateOperator::Gt,
            PredicateValueType::Number,
            Some(serde_json::json!("7")),
            Some(&serde_json::json!(5)),
            at,
        );
        assert_eq!(r.status, EvaluationStatus::True);

        // Matches is literal string equality.
        let r = apply_operator(
            PredicateOperator::Matches,
            PredicateValueType::String,
            Some(serde_json::json!("ready")),
            Some(&serde_json::json!("ready")),
            at,
        );
        assert_eq!(r.status, EvaluationStatus::True);

        // Ordering operators are not defined for strings.
        let r = apply_operator(
            PredicateOperator::Gt,
            PredicateValueType::String,
            Some(serde_json::json!("b")),
            Some(&serde_json::json!("a")),
            at,
        );
        assert_eq!(r.status, EvaluationStatus::Error);
        assert_eq!(r.result_code, "operator_type_mismatch");

        // Exists checks non-null.
        let r = apply_operator(
            PredicateOperator::Exists,
            PredicateValueType::String,
            Some(JsonValue::Null),
            None,
            at,
        );
        assert_eq!(r.status, EvaluationStatus::False);

        let r = apply_operator(
            PredicateOperator::Exists,
            PredicateValueType::String,
            Some(serde_json::json!("anything")),
            None,
            at,
        );
        assert_eq!(r.status, EvaluationStatus::True);

        // Missing subject for a comparison is an error.
        let r = apply_operator(
            PredicateOperator::Eq,
            PredicateValueType::Number,
            None,
            Some(&serde_json::json!(5)),
            at,
        );
        assert_eq!(r.status, EvaluationStatus::Error);
        assert_eq!(r.result_code, "subject_missing");
    }
}
