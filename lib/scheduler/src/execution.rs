//! Execution records: single attempted runs of a schedule.

use chrono::{DateTime, Utc};
use minder_core::{ExecutionId, ScheduleId, TraceId};
use serde::{Deserialize, Serialize};

/// Status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet running.
    Queued,
    /// The invoker is running the intent.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Exhausted its attempts.
    Failed,
    /// Canceled before finishing.
    Canceled,
    /// Failed with attempts remaining; a retry timer is registered.
    RetryScheduled,
}

impl ExecutionStatus {
    /// Returns true for states with no further work.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::RetryScheduled => "retry_scheduled",
        }
    }
}

/// A single attempted run of a schedule at a scheduled time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Store-assigned identifier.
    pub id: ExecutionId,
    /// The schedule this execution belongs to.
    pub schedule_id: ScheduleId,
    /// The time the run was scheduled for.
    pub scheduled_for: DateTime<Utc>,
    /// Current status.
    pub status: ExecutionStatus,
    /// Attempts made so far, including the current one.
    pub attempt_count: u32,
    /// Upper bound on attempts, from the retry policy.
    pub max_attempts: u32,
    /// Retries performed (attempts beyond the first).
    pub retry_count: u32,
    /// When the next retry fires, while in `retry_scheduled`.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Error code of the most recent failure.
    pub last_error_code: Option<String>,
    /// Error message of the most recent failure.
    pub last_error_message: Option<String>,
    /// Result code reported by the invoker on success.
    pub result_code: Option<String>,
    /// The single trace identifier tying callback, execution, and audits.
    pub trace_id: TraceId,
    /// Where the callback came from.
    pub trigger_source: String,
    /// When the current attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal or retry-scheduled status.
    pub finished_at: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Execution {
    /// Marks the execution running.
    pub fn start(&mut self, started_at: DateTime<Utc>) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(started_at);
        self.finished_at = None;
        self.next_retry_at = None;
    }

    /// Marks the execution succeeded.
    pub fn succeed(&mut self, finished_at: DateTime<Utc>, result_code: Option<String>) {
        self.status = ExecutionStatus::Succeeded;
        self.finished_at = Some(finished_at);
        self.result_code = result_code;
        self.next_retry_at = None;
    }

    /// Marks the execution failed with no attempts remaining.
    pub fn fail(&mut self, finished_at: DateTime<Utc>, code: String, message: String) {
        self.status = ExecutionStatus::Failed;
        self.finished_at = Some(finished_at);
        self.last_error_code = Some(code);
        self.last_error_message = Some(message);
        self.next_retry_at = None;
    }

    /// Marks the execution failed with a retry registered at `retry_at`.
    pub fn schedule_retry(
        &mut self,
        finished_at: DateTime<Utc>,
        retry_at: DateTime<Utc>,
        code: String,
        message: String,
    ) {
        self.status = ExecutionStatus::RetryScheduled;
        self.finished_at = Some(finished_at);
        self.retry_count += 1;
        self.next_retry_at = Some(retry_at);
        self.last_error_code = Some(code);
        self.last_error_message = Some(message);
    }

    /// Begins the next attempt after a scheduled retry.
    pub fn begin_retry_attempt(&mut self, started_at: DateTime<Utc>) {
        self.attempt_count += 1;
        self.start(started_at);
    }

    /// Marks the execution canceled.
    pub fn cancel(&mut self, finished_at: DateTime<Utc>) {
        self.status = ExecutionStatus::Canceled;
        self.finished_at = Some(finished_at);
        self.next_retry_at = None;
    }

    /// Returns true while the attempt-count invariant holds.
    #[must_use]
    pub fn attempts_within_bounds(&self) -> bool {
        self.attempt_count >= 1 && self.attempt_count <= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn execution() -> Execution {
        let t = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        Execution {
            id: ExecutionId::from_i64(1),
            schedule_id: ScheduleId::from_i64(1),
            scheduled_for: t,
            status: ExecutionStatus::Queued,
            attempt_count: 1,
            max_attempts: 3,
            retry_count: 0,
            next_retry_at: None,
            last_error_code: None,
            last_error_message: None,
            result_code: None,
            trace_id: TraceId::from_string("t1"),
            trigger_source: "scheduler_callback".to_string(),
            started_at: None,
            finished_at: None,
            created_at: t,
        }
    }

    #[test]
    fn status_terminality() {
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::RetryScheduled.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Canceled.is_terminal());
    }

    #[test]
    fn lifecycle_success() {
        let mut exec = execution();
        let started = exec.scheduled_for + chrono::Duration::seconds(2);

        exec.start(started);
        assert_eq!(exec.status, ExecutionStatus::Running);

        let finished = started + chrono::Duration::seconds(5);
        exec.succeed(finished, Some("agent_completed".to_string()));
        assert_eq!(exec.status, ExecutionStatus::Succeeded);
        assert!(exec.finished_at.unwrap() >= exec.started_at.unwrap());
        assert!(exec.started_at.unwrap() >= exec.scheduled_for);
    }

    #[test]
    fn retry_then_second_attempt() {
        let mut exec = execution();
        let started = exec.scheduled_for;
        exec.start(started);

        let finished = started + chrono::Duration::seconds(1);
        let retry_at = finished + chrono::Duration::seconds(30);
        exec.schedule_retry(
            finished,
            retry_at,
            "invoker_failure".to_string(),
            "agent unreachable".to_string(),
        );
        assert_eq!(exec.status, ExecutionStatus::RetryScheduled);
        assert_eq!(exec.retry_count, 1);
        assert_eq!(exec.next_retry_at, Some(retry_at));

        exec.begin_retry_attempt(retry_at);
        assert_eq!(exec.attempt_count, 2);
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(exec.next_retry_at.is_none());
        assert!(exec.attempts_within_bounds());
    }

    #[test]
    fn attempts_out_of_bounds_detected() {
        let mut exec = execution();
        exec.attempt_count = 4;
        assert!(!exec.attempts_within_bounds());
    }
}
