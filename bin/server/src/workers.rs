//! Worker pools.
//!
//! Two pools of parallel workers with cooperative blocking on I/O:
//! timer-callback workers drain provider firings (callbacks, retries,
//! predicate evaluations), and attention workers drain outbound
//! notification envelopes. Linked-schedule callbacks are miss-detection
//! firings and route through the commitment engine instead of the
//! dispatcher.

use async_trait::async_trait;
use minder_attention::{FailClosedRouter, RoutingEnvelope};
use minder_commitments::error::CommitmentError;
use minder_commitments::miss_detection::handle_miss_detection_callback;
use minder_commitments::notifications::NotificationSubmitter;
use minder_commitments::store::CommitmentStore;
use minder_commitments::transition::TransitionService;
use minder_core::{Clock, ExecutionId};
use minder_scheduler::callback::{CallbackBridge, ProviderCallback};
use minder_scheduler::dispatcher::ExecutionDispatcher;
use minder_scheduler::predicate::{EvaluationCallback, PredicateEvaluator};
use minder_scheduler::provider::{TimerProvider, TimerRegistration};
use minder_scheduler::schedule::{ScheduleKind, ScheduleState};
use minder_scheduler::store::SchedulerStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Work drained by the timer-callback pool.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// A schedule fired.
    Callback(ProviderCallback),
    /// A retry timer fired.
    Retry(ExecutionId),
    /// A conditional schedule's evaluation cadence fired.
    Evaluate(EvaluationCallback),
}

/// Everything the timer-callback workers need.
pub struct CallbackWorkerContext {
    pub bridge: Arc<CallbackBridge>,
    pub dispatcher: Arc<ExecutionDispatcher>,
    pub evaluator: Arc<PredicateEvaluator>,
    pub scheduler_store: Arc<dyn SchedulerStore>,
    pub commitment_store: Arc<dyn CommitmentStore>,
    pub transitions: Arc<TransitionService>,
    pub provider: Arc<dyn TimerProvider>,
    pub clock: Arc<dyn Clock>,
}

/// Spawns the timer-callback worker pool.
pub fn spawn_callback_workers(
    count: usize,
    receiver: mpsc::Receiver<WorkerMessage>,
    ctx: Arc<CallbackWorkerContext>,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..count.max(1))
        .map(|worker| {
            let receiver = receiver.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                loop {
                    let message = { receiver.lock().await.recv().await };
                    let Some(message) = message else {
                        tracing::debug!(worker, "callback worker queue closed");
                        return;
                    };
                    if let Err(err) = handle_message(&ctx, message).await {
                        tracing::error!(worker, error = %err, "callback worker failed");
                    }
                }
            })
        })
        .collect()
}

async fn handle_message(
    ctx: &CallbackWorkerContext,
    message: WorkerMessage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match message {
        WorkerMessage::Callback(callback) => {
            // A schedule with an active commitment link is a due-by
            // timer: its firing means the commitment was missed.
            if ctx
                .commitment_store
                .active_link_for_schedule(callback.schedule_id)
                .await?
                .is_some()
            {
                let result = handle_miss_detection_callback(
                    ctx.commitment_store.as_ref(),
                    &ctx.transitions,
                    callback.schedule_id,
                    Some(callback.trace_id.clone()),
                    ctx.clock.now(),
                )
                .await?;
                tracing::info!(
                    schedule_id = callback.schedule_id.as_i64(),
                    status = ?result.status,
                    "miss detection callback handled"
                );
                return Ok(());
            }

            let schedule_id = callback.schedule_id;
            let outcome = ctx.bridge.handle_callback(callback).await?;
            tracing::debug!(
                schedule_id = schedule_id.as_i64(),
                outcome = ?outcome,
                "provider callback handled"
            );
            rearm_recurring(ctx, schedule_id).await;
        }
        WorkerMessage::Retry(execution_id) => {
            let outcome = ctx.dispatcher.run_retry(execution_id).await?;
            tracing::debug!(
                execution_id = execution_id.as_i64(),
                outcome = ?outcome,
                "retry handled"
            );
        }
        WorkerMessage::Evaluate(callback) => {
            let outcome = ctx.evaluator.evaluate(callback).await?;
            tracing::debug!(
                status = ?outcome.result.status,
                duplicate = outcome.duplicate,
                "predicate evaluation handled"
            );
        }
    }
    Ok(())
}

/// Re-arms the in-process timer for recurring schedules after a run.
async fn rearm_recurring(ctx: &CallbackWorkerContext, schedule_id: minder_core::ScheduleId) {
    let schedule = match ctx.scheduler_store.get_schedule(schedule_id).await {
        Ok(Some(schedule)) => schedule,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(
                schedule_id = schedule_id.as_i64(),
                error = %err,
                "could not reload schedule for re-arming"
            );
            return;
        }
    };
    if schedule.state != ScheduleState::Active
        || schedule.kind == ScheduleKind::Conditional
        || schedule.next_run_at.is_none()
    {
        return;
    }
    let registration = TimerRegistration {
        schedule_id: schedule.id,
        kind: schedule.kind,
        fire_at: schedule.next_run_at,
        cadence_seconds: schedule.definition.evaluation_cadence_seconds,
        timezone: schedule.timezone.clone(),
    };
    if let Err(err) = ctx.provider.update(registration).await {
        tracing::warn!(
            schedule_id = schedule.id.as_i64(),
            error = %err,
            "could not re-arm recurring timer"
        );
    }
}

/// Submitter that enqueues envelopes for the attention worker pool.
pub struct QueueSubmitter {
    queue: mpsc::Sender<RoutingEnvelope>,
}

impl QueueSubmitter {
    /// Creates a submitter over the attention queue.
    #[must_use]
    pub fn new(queue: mpsc::Sender<RoutingEnvelope>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl NotificationSubmitter for QueueSubmitter {
    async fn submit(&self, envelope: RoutingEnvelope) -> Result<(), CommitmentError> {
        self.queue
            .send(envelope)
            .await
            .map_err(|_| CommitmentError::Storage {
                reason: "attention queue closed".to_string(),
            })
    }
}

/// Spawns the attention worker pool draining outbound envelopes.
pub fn spawn_attention_workers(
    count: usize,
    receiver: mpsc::Receiver<RoutingEnvelope>,
    router: Arc<FailClosedRouter>,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..count.max(1))
        .map(|worker| {
            let receiver = receiver.clone();
            let router = router.clone();
            tokio::spawn(async move {
                loop {
                    let envelope = { receiver.lock().await.recv().await };
                    let Some(envelope) = envelope else {
                        tracing::debug!(worker, "attention worker queue closed");
                        return;
                    };
                    match router.route(&envelope, true, true).await {
                        Ok(outcome) => {
                            tracing::debug!(
                                worker,
                                signal_reference = %envelope.signal_reference,
                                decision = %outcome.decision,
                                "outbound envelope routed"
                            );
                        }
                        Err(err) => {
                            tracing::error!(
                                worker,
                                signal_reference = %envelope.signal_reference,
                                error = %err,
                                "outbound envelope could not be routed"
                            );
                        }
                    }
                }
            })
        })
        .collect()
}
