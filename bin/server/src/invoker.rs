//! Execution invocation and failure notification over the router.
//!
//! Executing a task intent means putting it in front of the owner:
//! the invoker composes a due-task envelope and hands it to the
//! attention router, which decides whether, when, and where it lands.

use async_trait::async_trait;
use minder_attention::{
    FailClosedRouter, NotificationDescriptor, ProvenanceInput, RouteDecision, RoutingEnvelope,
    SignalPayload,
};
use minder_core::Clock;
use minder_scheduler::dispatcher::{
    FailureNotifier, InvocationRequest, InvocationResult, Invoker,
};
use minder_scheduler::execution::Execution;
use minder_scheduler::schedule::Schedule;
use minder_scheduler::store::SchedulerStore;
use std::sync::Arc;

/// Invoker that surfaces due task intents through the router.
pub struct ReminderInvoker {
    store: Arc<dyn SchedulerStore>,
    router: Arc<FailClosedRouter>,
    owner: String,
    clock: Arc<dyn Clock>,
}

impl ReminderInvoker {
    /// Creates the invoker.
    #[must_use]
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        router: Arc<FailClosedRouter>,
        owner: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            router,
            owner,
            clock,
        }
    }
}

#[async_trait]
impl Invoker for ReminderInvoker {
    async fn invoke_execution(&self, request: InvocationRequest) -> InvocationResult {
        let intent = match self.store.get_intent(request.task_intent_id).await {
            Ok(Some(intent)) => intent,
            Ok(None) => {
                return InvocationResult::failure(
                    "task_intent_missing",
                    format!("task intent {} not found", request.task_intent_id),
                );
            }
            Err(err) => {
                return InvocationResult::failure("store_unavailable", err.to_string());
            }
        };

        let message = match &intent.detail {
            Some(detail) => format!("{}\n{}", intent.summary, detail),
            None => intent.summary.clone(),
        };
        let envelope = RoutingEnvelope {
            version: minder_attention::envelope::ENVELOPE_VERSION,
            signal_type: "task_intent.due".to_string(),
            signal_reference: format!("task_intent.due:{}:{}", intent.id, request.trace_id),
            actor: "scheduled".to_string(),
            owner: self.owner.clone(),
            channel_hint: None,
            urgency: 0.6,
            channel_cost: 0.3,
            content_type: "text".to_string(),
            timestamp: self.clock.now(),
            signal_payload: Some(SignalPayload {
                from: "minder".to_string(),
                to: self.owner.clone(),
                message,
            }),
            notification: Some(NotificationDescriptor::new(
                "execution_dispatcher",
                request.trace_id.to_string(),
                1.0,
                vec![
                    ProvenanceInput::new("task_intent", intent.id.to_string()),
                    ProvenanceInput::new("execution", request.execution_id.to_string()),
                ],
            )),
            escalation: Default::default(),
            metadata: None,
        };

        match self.router.route(&envelope, true, true).await {
            Ok(outcome) => InvocationResult {
                status: minder_scheduler::dispatcher::InvocationStatus::Success,
                result_code: Some(outcome.decision.render()),
                attention_required: matches!(outcome.decision, RouteDecision::Escalate(_)),
                error: None,
            },
            Err(err) => InvocationResult::failure("routing_failed", err.to_string()),
        }
    }
}

/// Failure notifier that routes exhausted executions to the owner.
pub struct RouterFailureNotifier {
    router: Arc<FailClosedRouter>,
    owner: String,
    clock: Arc<dyn Clock>,
}

impl RouterFailureNotifier {
    /// Creates the notifier.
    #[must_use]
    pub fn new(router: Arc<FailClosedRouter>, owner: String, clock: Arc<dyn Clock>) -> Self {
        Self {
            router,
            owner,
            clock,
        }
    }
}

#[async_trait]
impl FailureNotifier for RouterFailureNotifier {
    async fn notify_failure(&self, schedule: &Schedule, execution: &Execution) {
        let envelope = RoutingEnvelope {
            version: minder_attention::envelope::ENVELOPE_VERSION,
            signal_type: "execution.failed".to_string(),
            signal_reference: format!("execution.failed:{}", execution.id),
            actor: "system".to_string(),
            owner: self.owner.clone(),
            channel_hint: None,
            urgency: 0.9,
            channel_cost: 0.2,
            content_type: "text".to_string(),
            timestamp: self.clock.now(),
            signal_payload: Some(SignalPayload {
                from: "minder".to_string(),
                to: self.owner.clone(),
                message: format!(
                    "Scheduled task failed after {} attempts: {}",
                    execution.attempt_count,
                    execution
                        .last_error_message
                        .as_deref()
                        .unwrap_or("unknown error")
                ),
            }),
            notification: Some(NotificationDescriptor::new(
                "execution_dispatcher",
                execution.trace_id.to_string(),
                1.0,
                vec![
                    ProvenanceInput::new("execution", execution.id.to_string()),
                    ProvenanceInput::new("schedule", schedule.id.to_string()),
                ],
            )),
            escalation: Default::default(),
            metadata: None,
        };
        if let Err(err) = self.router.route(&envelope, true, true).await {
            tracing::error!(
                execution_id = execution.id.as_i64(),
                error = %err,
                "failure notification could not be routed"
            );
        }
    }
}
