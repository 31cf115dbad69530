//! Commitment notifications submitted through the attention router.
//!
//! Everything outbound goes through the router; this module builds the
//! envelopes and hides the router behind a submitter trait so services
//! and tests stay decoupled from the full pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_attention::{
    AttentionRouter, Channel, NotificationDescriptor, ProvenanceInput, RoutingEnvelope,
    SignalPayload,
};
use std::sync::{Arc, Mutex};

use crate::commitment::Commitment;
use crate::error::CommitmentError;

/// Submits routing envelopes to the attention router.
#[async_trait]
pub trait NotificationSubmitter: Send + Sync {
    /// Submits one envelope.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the pipeline fails.
    async fn submit(&self, envelope: RoutingEnvelope) -> Result<(), CommitmentError>;
}

/// Submitter backed by the real router.
pub struct RouterSubmitter {
    router: Arc<AttentionRouter>,
}

impl RouterSubmitter {
    /// Creates a submitter over the router.
    #[must_use]
    pub fn new(router: Arc<AttentionRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl NotificationSubmitter for RouterSubmitter {
    async fn submit(&self, envelope: RoutingEnvelope) -> Result<(), CommitmentError> {
        self.router
            .route(&envelope)
            .await
            .map(|_| ())
            .map_err(|e| CommitmentError::Storage {
                reason: e.to_string(),
            })
    }
}

/// Submitter that records envelopes, for tests.
#[derive(Debug, Default)]
pub struct RecordingSubmitter {
    submitted: Mutex<Vec<RoutingEnvelope>>,
    fail_next: Mutex<bool>,
}

impl RecordingSubmitter {
    /// Creates an empty recording submitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next submission fail.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    /// Returns the envelopes submitted so far.
    #[must_use]
    pub fn submitted(&self) -> Vec<RoutingEnvelope> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSubmitter for RecordingSubmitter {
    async fn submit(&self, envelope: RoutingEnvelope) -> Result<(), CommitmentError> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(CommitmentError::Storage {
                reason: "submitter failure injected".to_string(),
            });
        }
        self.submitted.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// Builds the missed-commitment notification envelope.
#[must_use]
pub fn missed_commitment_envelope(
    commitment: &Commitment,
    now: DateTime<Utc>,
) -> RoutingEnvelope {
    commitment_envelope(
        commitment,
        "commitment.missed",
        format!(
            "Commitment missed: {}. Reply with complete, cancel, a new date, or review.",
            commitment.description
        ),
        0.7,
        now,
    )
}

/// Builds the loop-closure prompt envelope.
#[must_use]
pub fn loop_closure_prompt_envelope(
    commitment: &Commitment,
    now: DateTime<Utc>,
) -> RoutingEnvelope {
    commitment_envelope(
        commitment,
        "commitment.loop_closure_prompt",
        format!(
            "What should happen with \"{}\"? complete / cancel / new date (YYYY-MM-DD) / review",
            commitment.description
        ),
        0.6,
        now,
    )
}

fn commitment_envelope(
    commitment: &Commitment,
    signal_type: &str,
    message: String,
    urgency: f64,
    now: DateTime<Utc>,
) -> RoutingEnvelope {
    RoutingEnvelope {
        version: minder_attention::envelope::ENVELOPE_VERSION,
        signal_type: signal_type.to_string(),
        signal_reference: format!("{signal_type}:{}", commitment.id),
        actor: "system".to_string(),
        owner: commitment.owner.clone(),
        channel_hint: Some(Channel::Signal),
        urgency,
        channel_cost: 0.3,
        content_type: "text".to_string(),
        timestamp: now,
        signal_payload: Some(SignalPayload {
            from: "minder".to_string(),
            to: commitment.owner.clone(),
            message,
        }),
        notification: Some(NotificationDescriptor::new(
            "commitment_engine",
            format!("commitment:{}", commitment.id),
            1.0,
            vec![ProvenanceInput::new(
                "commitment",
                commitment.id.to_string(),
            )],
        )),
        escalation: Default::default(),
        metadata: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::{CommitmentState, compute_urgency};
    use chrono::TimeZone;
    use minder_core::CommitmentId;

    fn commitment() -> Commitment {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        Commitment {
            id: CommitmentId::from_i64(5),
            owner: "marion".to_string(),
            description: "Book dentist appointment".to_string(),
            state: CommitmentState::Open,
            importance: 2,
            effort: 2,
            due_by: None,
            urgency: compute_urgency(2, 2, None, now),
            provenance_reference: None,
            next_schedule_id: None,
            last_progress_at: None,
            ever_missed_at: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn missed_envelope_carries_provenance() {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let env = missed_commitment_envelope(&commitment(), now);
        assert_eq!(env.signal_type, "commitment.missed");
        assert_eq!(env.signal_reference, "commitment.missed:cmt_5");
        let descriptor = env.notification.expect("descriptor");
        assert_eq!(descriptor.source_component, "commitment_engine");
        assert_eq!(descriptor.provenance.len(), 1);
    }

    #[tokio::test]
    async fn recording_submitter_captures_and_fails() {
        let submitter = RecordingSubmitter::new();
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();

        submitter
            .submit(loop_closure_prompt_envelope(&commitment(), now))
            .await
            .expect("submit");
        assert_eq!(submitter.submitted().len(), 1);

        submitter.fail_next();
        assert!(submitter
            .submit(loop_closure_prompt_envelope(&commitment(), now))
            .await
            .is_err());
    }
}
