//! Miss detection for due-by schedules.
//!
//! A due-by expiry fires a callback carrying the schedule id. The
//! handler resolves the active linked commitment and moves OPEN
//! commitments to MISSED; the transition hook submits the missed
//! notification and the loop-closure prompt through the router.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_core::{ActorKind, Clock, CommitmentId, ScheduleId, TraceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::commitment::{Commitment, CommitmentState};
use crate::error::CommitmentError;
use crate::notifications::{
    loop_closure_prompt_envelope, missed_commitment_envelope, NotificationSubmitter,
};
use crate::store::CommitmentStore;
use crate::transition::{TransitionHook, TransitionRequest, TransitionService};

/// How the callback was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissDetectionStatus {
    /// The commitment transitioned to MISSED.
    Missed,
    /// The linked commitment was not OPEN.
    Noop,
    /// No active link points at the schedule.
    NoLink,
}

/// Outcome of processing a miss detection callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissDetectionResult {
    /// How the callback was handled.
    pub status: MissDetectionStatus,
    /// The schedule that fired.
    pub schedule_id: ScheduleId,
    /// The resolved commitment, when any.
    pub commitment_id: Option<CommitmentId>,
    /// The commitment's state after handling.
    pub commitment_state: Option<CommitmentState>,
}

/// Transition hook that submits the two miss notifications.
///
/// Submission failures are logged and never fail the transition.
pub struct MissedNotificationHook {
    submitter: Arc<dyn NotificationSubmitter>,
    clock: Arc<dyn Clock>,
}

impl MissedNotificationHook {
    /// Creates the hook.
    #[must_use]
    pub fn new(submitter: Arc<dyn NotificationSubmitter>, clock: Arc<dyn Clock>) -> Self {
        Self { submitter, clock }
    }
}

#[async_trait]
impl TransitionHook for MissedNotificationHook {
    async fn on_transition(
        &self,
        commitment: &Commitment,
        _from: CommitmentState,
        to: CommitmentState,
    ) -> Result<(), CommitmentError> {
        if to != CommitmentState::Missed {
            return Ok(());
        }
        let now = self.clock.now();
        if let Err(err) = self
            .submitter
            .submit(missed_commitment_envelope(commitment, now))
            .await
        {
            tracing::error!(
                commitment_id = commitment.id.as_i64(),
                error = %err,
                "missed notification submission failed"
            );
        }
        if let Err(err) = self
            .submitter
            .submit(loop_closure_prompt_envelope(commitment, now))
            .await
        {
            tracing::error!(
                commitment_id = commitment.id.as_i64(),
                error = %err,
                "loop-closure prompt submission failed"
            );
        }
        Ok(())
    }
}

/// Handles a miss detection callback.
///
/// # Errors
///
/// Returns storage errors from persistence; a missing link or a
/// non-OPEN commitment is a status, not an error.
pub async fn handle_miss_detection_callback(
    store: &dyn CommitmentStore,
    transition_service: &TransitionService,
    schedule_id: ScheduleId,
    trace_id: Option<TraceId>,
    _now: DateTime<Utc>,
) -> Result<MissDetectionResult, CommitmentError> {
    let Some(link) = store.active_link_for_schedule(schedule_id).await? else {
        tracing::info!(
            schedule_id = schedule_id.as_i64(),
            "miss detection callback ignored: no active link"
        );
        return Ok(MissDetectionResult {
            status: MissDetectionStatus::NoLink,
            schedule_id,
            commitment_id: None,
            commitment_state: None,
        });
    };
    let Some(commitment) = store.get_commitment(link.commitment_id).await? else {
        return Ok(MissDetectionResult {
            status: MissDetectionStatus::NoLink,
            schedule_id,
            commitment_id: None,
            commitment_state: None,
        });
    };
    if commitment.state != CommitmentState::Open {
        return Ok(MissDetectionResult {
            status: MissDetectionStatus::Noop,
            schedule_id,
            commitment_id: Some(commitment.id),
            commitment_state: Some(commitment.state),
        });
    }

    let mut context = serde_json::json!({ "schedule_id": schedule_id.as_i64() });
    if let Some(trace_id) = &trace_id {
        context["trace_id"] = serde_json::json!(trace_id.as_str());
    }
    transition_service
        .transition(TransitionRequest {
            commitment_id: commitment.id,
            to_state: CommitmentState::Missed,
            actor: ActorKind::System,
            actor_id: "miss_detection".to_string(),
            reason: "due_by_expired".to_string(),
            context: Some(context),
            confidence: None,
            provenance: trace_id.map(|t| serde_json::json!({ "trace_id": t.as_str() })),
        })
        .await?;

    Ok(MissDetectionResult {
        status: MissDetectionStatus::Missed,
        schedule_id,
        commitment_id: Some(commitment.id),
        commitment_state: Some(CommitmentState::Missed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::NewCommitment;
    use crate::notifications::RecordingSubmitter;
    use crate::store::InMemoryCommitmentStore;
    use crate::transition::TransitionConfig;
    use chrono::{Duration, TimeZone};
    use minder_core::FixedClock;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    struct Harness {
        store: Arc<InMemoryCommitmentStore>,
        submitter: Arc<RecordingSubmitter>,
        service: TransitionService,
        commitment_id: CommitmentId,
        schedule_id: ScheduleId,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryCommitmentStore::new());
        let submitter = Arc::new(RecordingSubmitter::new());
        let clock = Arc::new(FixedClock::new(now() + Duration::hours(2)));

        let commitment = store
            .create_commitment(
                NewCommitment::new("marion", "Send the contract").with_due_by(now() + Duration::hours(1)),
                70,
                now(),
            )
            .await
            .expect("create");
        let schedule_id = ScheduleId::from_i64(8);
        store
            .create_link(commitment.id, schedule_id, now())
            .await
            .expect("link");

        let service = TransitionService::new(
            store.clone(),
            Arc::new(MissedNotificationHook::new(submitter.clone(), clock.clone())),
            TransitionConfig::default(),
            clock,
        );
        Harness {
            store,
            submitter,
            service,
            commitment_id: commitment.id,
            schedule_id,
        }
    }

    #[tokio::test]
    async fn open_commitment_transitions_to_missed() {
        let h = harness().await;

        let result = handle_miss_detection_callback(
            h.store.as_ref(),
            &h.service,
            h.schedule_id,
            Some(TraceId::from_string("t1")),
            now() + Duration::hours(2),
        )
        .await
        .expect("handle");

        assert_eq!(result.status, MissDetectionStatus::Missed);
        assert_eq!(result.commitment_id, Some(h.commitment_id));
        assert_eq!(result.commitment_state, Some(CommitmentState::Missed));

        let commitment = h
            .store
            .get_commitment(h.commitment_id)
            .await
            .expect("lookup")
            .expect("commitment");
        assert_eq!(commitment.state, CommitmentState::Missed);
        assert!(commitment.ever_missed_at.is_some());

        // Both notifications went through the router path.
        let submitted = h.submitter.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].signal_type, "commitment.missed");
        assert_eq!(submitted[1].signal_type, "commitment.loop_closure_prompt");

        // The transition audit row was written.
        let transitions = h
            .store
            .list_transitions(h.commitment_id)
            .await
            .expect("transitions");
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].reason, "due_by_expired");
    }

    #[tokio::test]
    async fn unlinked_schedule_returns_no_link() {
        let h = harness().await;
        let result = handle_miss_detection_callback(
            h.store.as_ref(),
            &h.service,
            ScheduleId::from_i64(999),
            None,
            now(),
        )
        .await
        .expect("handle");
        assert_eq!(result.status, MissDetectionStatus::NoLink);
        assert!(h.submitter.submitted().is_empty());
    }

    #[tokio::test]
    async fn non_open_commitment_is_noop() {
        let h = harness().await;
        handle_miss_detection_callback(
            h.store.as_ref(),
            &h.service,
            h.schedule_id,
            None,
            now(),
        )
        .await
        .expect("first miss");

        let result = handle_miss_detection_callback(
            h.store.as_ref(),
            &h.service,
            h.schedule_id,
            None,
            now(),
        )
        .await
        .expect("second call");
        assert_eq!(result.status, MissDetectionStatus::Noop);
        assert_eq!(result.commitment_state, Some(CommitmentState::Missed));
    }

    #[tokio::test]
    async fn hook_failure_does_not_roll_back_transition() {
        let h = harness().await;
        h.submitter.fail_next();

        let result = handle_miss_detection_callback(
            h.store.as_ref(),
            &h.service,
            h.schedule_id,
            None,
            now(),
        )
        .await
        .expect("handle");
        assert_eq!(result.status, MissDetectionStatus::Missed);

        let commitment = h
            .store
            .get_commitment(h.commitment_id)
            .await
            .expect("lookup")
            .expect("commitment");
        assert_eq!(commitment.state, CommitmentState::Missed);
    }
}
