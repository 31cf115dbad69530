//! In-process timer provider.
//!
//! Arms tokio timers for registered schedules and feeds their firings
//! back through the callback worker queue, the same way an external
//! timer service would call back in. Timers are process-local; startup
//! re-arms them from the persisted schedules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_core::{ExecutionId, ScheduleId, TraceId};
use minder_scheduler::callback::ProviderCallback;
use minder_scheduler::error::ProviderError;
use minder_scheduler::predicate::EvaluationCallback;
use minder_scheduler::provider::{TimerProvider, TimerRegistration};
use minder_scheduler::schedule::ScheduleKind;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::workers::WorkerMessage;

const TRIGGER_SOURCE: &str = "scheduler_callback";

/// Timer provider backed by tokio tasks.
pub struct TokioTimerProvider {
    queue: mpsc::Sender<WorkerMessage>,
    timers: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl TokioTimerProvider {
    /// Creates a provider feeding the given worker queue.
    #[must_use]
    pub fn new(queue: mpsc::Sender<WorkerMessage>) -> Self {
        Self {
            queue,
            timers: Mutex::new(HashMap::new()),
        }
    }

    fn arm(&self, registration: TimerRegistration) -> Result<(), ProviderError> {
        let schedule_id = registration.schedule_id;
        let handle = match registration.kind {
            ScheduleKind::Conditional => {
                let Some(cadence) = registration.cadence_seconds else {
                    return Err(ProviderError::RegistrationFailed {
                        schedule_id,
                        reason: "conditional timer needs a cadence".to_string(),
                    });
                };
                let queue = self.queue.clone();
                tokio::spawn(async move {
                    let mut interval =
                        tokio::time::interval(Duration::from_secs(u64::from(cadence.max(1))));
                    // The first tick fires immediately; skip it.
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        let callback = EvaluationCallback {
                            schedule_id,
                            evaluation_id: format!("eval_{}", ulid_suffix()),
                            trace_id: TraceId::new(),
                            evaluation_time: Utc::now(),
                        };
                        if queue.send(WorkerMessage::Evaluate(callback)).await.is_err() {
                            return;
                        }
                    }
                })
            }
            _ => {
                let Some(fire_at) = registration.fire_at else {
                    return Err(ProviderError::RegistrationFailed {
                        schedule_id,
                        reason: "timer needs a fire time".to_string(),
                    });
                };
                let queue = self.queue.clone();
                tokio::spawn(async move {
                    sleep_until(fire_at).await;
                    let callback = ProviderCallback {
                        schedule_id,
                        scheduled_for: Some(fire_at),
                        trace_id: TraceId::new(),
                        emitted_at: Utc::now(),
                        trigger_source: TRIGGER_SOURCE.to_string(),
                        provider_attempt: 1,
                    };
                    if queue.send(WorkerMessage::Callback(callback)).await.is_err() {
                        tracing::warn!(
                            schedule_id = schedule_id.as_i64(),
                            "worker queue closed; timer firing dropped"
                        );
                    }
                })
            }
        };

        let mut timers = self.timers.lock().unwrap();
        if let Some(previous) = timers.insert(schedule_id.as_i64(), handle) {
            previous.abort();
        }
        Ok(())
    }

    fn disarm(&self, schedule_id: ScheduleId) {
        if let Some(handle) = self.timers.lock().unwrap().remove(&schedule_id.as_i64()) {
            handle.abort();
        }
    }
}

fn ulid_suffix() -> String {
    // Trace ids already carry a ULID; reuse the generator.
    TraceId::new()
        .as_str()
        .trim_start_matches("trace_")
        .to_string()
}

async fn sleep_until(fire_at: DateTime<Utc>) {
    let delay = (fire_at - Utc::now()).num_milliseconds().max(0) as u64;
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

#[async_trait]
impl TimerProvider for TokioTimerProvider {
    async fn register(&self, registration: TimerRegistration) -> Result<(), ProviderError> {
        self.arm(registration)
    }

    async fn update(&self, registration: TimerRegistration) -> Result<(), ProviderError> {
        self.arm(registration)
    }

    async fn pause(&self, schedule_id: ScheduleId) -> Result<(), ProviderError> {
        self.disarm(schedule_id);
        Ok(())
    }

    async fn resume(&self, registration: TimerRegistration) -> Result<(), ProviderError> {
        self.arm(registration)
    }

    async fn cancel(&self, schedule_id: ScheduleId) -> Result<(), ProviderError> {
        self.disarm(schedule_id);
        Ok(())
    }

    async fn schedule_retry(
        &self,
        execution_id: ExecutionId,
        schedule_id: ScheduleId,
        retry_at: DateTime<Utc>,
    ) -> Result<(), ProviderError> {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            sleep_until(retry_at).await;
            if queue.send(WorkerMessage::Retry(execution_id)).await.is_err() {
                tracing::warn!(
                    execution_id = execution_id.as_i64(),
                    schedule_id = schedule_id.as_i64(),
                    "worker queue closed; retry firing dropped"
                );
            }
        });
        Ok(())
    }
}
