//! Timer provider adapter.
//!
//! The scheduler drives an external timer provider through this trait:
//! registration, suspension, and retry timers live outside the process
//! and fire back in through the callback bridge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_core::{ExecutionId, ScheduleId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::ProviderError;
use crate::schedule::ScheduleKind;

/// What the provider needs to arm a timer for a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRegistration {
    /// The schedule the timer fires for.
    pub schedule_id: ScheduleId,
    /// The schedule kind, for provider-side routing.
    pub kind: ScheduleKind,
    /// Next fire time, when known.
    pub fire_at: Option<DateTime<Utc>>,
    /// Evaluation cadence for conditional schedules.
    pub cadence_seconds: Option<u32>,
    /// IANA timezone for calendar arithmetic on the provider side.
    pub timezone: String,
}

/// External timer provider operations.
#[async_trait]
pub trait TimerProvider: Send + Sync {
    /// Registers a new timer.
    async fn register(&self, registration: TimerRegistration) -> Result<(), ProviderError>;

    /// Updates an existing timer.
    async fn update(&self, registration: TimerRegistration) -> Result<(), ProviderError>;

    /// Suspends the timer for a schedule.
    async fn pause(&self, schedule_id: ScheduleId) -> Result<(), ProviderError>;

    /// Resumes a suspended timer.
    async fn resume(&self, registration: TimerRegistration) -> Result<(), ProviderError>;

    /// Cancels and removes the timer for a schedule.
    async fn cancel(&self, schedule_id: ScheduleId) -> Result<(), ProviderError>;

    /// Arms a one-shot retry timer for an execution.
    async fn schedule_retry(
        &self,
        execution_id: ExecutionId,
        schedule_id: ScheduleId,
        retry_at: DateTime<Utc>,
    ) -> Result<(), ProviderError>;
}

/// A provider call captured by [`RecordingProvider`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Register(TimerRegistration),
    Update(TimerRegistration),
    Pause(ScheduleId),
    Resume(TimerRegistration),
    Cancel(ScheduleId),
    ScheduleRetry {
        execution_id: ExecutionId,
        schedule_id: ScheduleId,
        retry_at: DateTime<Utc>,
    },
}

/// An in-memory provider that records calls, for tests and embedded use.
#[derive(Debug, Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<ProviderCall>>,
    fail_next: Mutex<Option<String>>,
}

impl RecordingProvider {
    /// Creates an empty recording provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next provider call fail with the given reason.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock().unwrap() = Some(reason.into());
    }

    /// Returns the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ProviderCall) -> Result<(), ProviderError> {
        if let Some(reason) = self.fail_next.lock().unwrap().take() {
            return Err(ProviderError::Unavailable { reason });
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl TimerProvider for RecordingProvider {
    async fn register(&self, registration: TimerRegistration) -> Result<(), ProviderError> {
        self.record(ProviderCall::Register(registration))
    }

    async fn update(&self, registration: TimerRegistration) -> Result<(), ProviderError> {
        self.record(ProviderCall::Update(registration))
    }

    async fn pause(&self, schedule_id: ScheduleId) -> Result<(), ProviderError> {
        self.record(ProviderCall::Pause(schedule_id))
    }

    async fn resume(&self, registration: TimerRegistration) -> Result<(), ProviderError> {
        self.record(ProviderCall::Resume(registration))
    }

    async fn cancel(&self, schedule_id: ScheduleId) -> Result<(), ProviderError> {
        self.record(ProviderCall::Cancel(schedule_id))
    }

    async fn schedule_retry(
        &self,
        execution_id: ExecutionId,
        schedule_id: ScheduleId,
        retry_at: DateTime<Utc>,
    ) -> Result<(), ProviderError> {
        self.record(ProviderCall::ScheduleRetry {
            execution_id,
            schedule_id,
            retry_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn registration() -> TimerRegistration {
        TimerRegistration {
            schedule_id: ScheduleId::from_i64(1),
            kind: ScheduleKind::Interval,
            fire_at: Some(Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).unwrap()),
            cadence_seconds: None,
            timezone: "UTC".to_string(),
        }
    }

    #[tokio::test]
    async fn recording_provider_captures_calls() {
        let provider = RecordingProvider::new();
        provider.register(registration()).await.expect("register");
        provider
            .pause(ScheduleId::from_i64(1))
            .await
            .expect("pause");

        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], ProviderCall::Register(_)));
        assert!(matches!(calls[1], ProviderCall::Pause(_)));
    }

    #[tokio::test]
    async fn fail_next_fails_once() {
        let provider = RecordingProvider::new();
        provider.fail_next("provider outage");

        let err = provider.register(registration()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { .. }));

        provider.register(registration()).await.expect("recovers");
        assert_eq!(provider.calls().len(), 1);
    }
}
