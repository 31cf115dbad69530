//! Commitment state transitions and the authority gate.
//!
//! Every transition passes the authority evaluator: users are always
//! allowed, system transitions to MISSED are always allowed, and other
//! system transitions require confidence at or above the autonomy
//! threshold. Denied transitions become pending proposals instead of
//! state changes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use minder_core::{ActorKind, Clock, CommitmentId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::commitment::{Commitment, CommitmentState};
use crate::error::CommitmentError;
use crate::proposals::{ProposalStatus, TransitionProposal};
use crate::store::CommitmentStore;

/// Authority configuration for transitions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Confidence cutoff for autonomous system transitions.
    pub autonomous_transition_threshold: f64,
    /// How long transition audit rows are retained, in days.
    pub audit_retention_days: u32,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            autonomous_transition_threshold: 0.8,
            audit_retention_days: 365,
        }
    }
}

/// The authority evaluator's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorityDecision {
    /// Whether the transition may be applied.
    pub allow: bool,
    /// The confidence used for the verdict.
    pub effective_confidence: f64,
    /// The threshold compared against.
    pub threshold: f64,
    /// Why the evaluator decided as it did.
    pub reason: &'static str,
}

/// Evaluates whether a transition can be applied autonomously.
#[must_use]
pub fn evaluate_transition_authority(
    to_state: CommitmentState,
    actor: ActorKind,
    confidence: Option<f64>,
    threshold: f64,
) -> AuthorityDecision {
    if actor == ActorKind::Human {
        return AuthorityDecision {
            allow: true,
            effective_confidence: 1.0,
            threshold,
            reason: "user_initiated",
        };
    }
    if to_state == CommitmentState::Missed {
        return AuthorityDecision {
            allow: true,
            effective_confidence: 1.0,
            threshold,
            reason: "missed_is_autonomous",
        };
    }
    let Some(confidence) = confidence else {
        return AuthorityDecision {
            allow: false,
            effective_confidence: 0.0,
            threshold,
            reason: "missing_confidence",
        };
    };
    AuthorityDecision {
        allow: confidence >= threshold,
        effective_confidence: confidence,
        threshold,
        reason: "autonomy_confidence_gate",
    }
}

/// One applied transition, persisted append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Store-assigned row id, zero before insertion.
    pub id: i64,
    /// The transitioned commitment (denormalized).
    pub commitment_id: CommitmentId,
    /// State before.
    pub from_state: CommitmentState,
    /// State after.
    pub to_state: CommitmentState,
    /// Actor category.
    pub actor: ActorKind,
    /// Actor identity.
    pub actor_id: String,
    /// Why the transition happened.
    pub reason: String,
    /// Free-form audit context.
    pub context: Option<JsonValue>,
    /// Confidence behind a system transition.
    pub confidence: Option<f64>,
    /// Provenance behind the transition.
    pub provenance: Option<JsonValue>,
    /// When the transition was applied.
    pub transitioned_at: DateTime<Utc>,
}

/// A transition request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    /// The commitment to transition.
    pub commitment_id: CommitmentId,
    /// The target state.
    pub to_state: CommitmentState,
    /// Actor category.
    pub actor: ActorKind,
    /// Actor identity.
    pub actor_id: String,
    /// Why the transition is requested.
    pub reason: String,
    /// Free-form audit context.
    pub context: Option<JsonValue>,
    /// Confidence behind a system transition.
    pub confidence: Option<f64>,
    /// Provenance behind the transition.
    pub provenance: Option<JsonValue>,
}

/// What the transition service did with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The transition was applied and audited.
    Applied {
        commitment: Commitment,
        audit_id: i64,
    },
    /// Authority denied the transition; a proposal is pending.
    Proposed { proposal: TransitionProposal },
}

/// Side effects attached to applied transitions.
///
/// Hook failures are logged, never rolled back into the transition.
#[async_trait]
pub trait TransitionHook: Send + Sync {
    /// Runs after a transition has been applied and audited.
    async fn on_transition(
        &self,
        commitment: &Commitment,
        from: CommitmentState,
        to: CommitmentState,
    ) -> Result<(), CommitmentError>;
}

/// A hook that does nothing.
#[derive(Debug, Default)]
pub struct NullTransitionHook;

#[async_trait]
impl TransitionHook for NullTransitionHook {
    async fn on_transition(
        &self,
        _commitment: &Commitment,
        _from: CommitmentState,
        _to: CommitmentState,
    ) -> Result<(), CommitmentError> {
        Ok(())
    }
}

/// Applies commitment state transitions through the authority gate.
pub struct TransitionService {
    store: Arc<dyn CommitmentStore>,
    hook: Arc<dyn TransitionHook>,
    config: TransitionConfig,
    clock: Arc<dyn Clock>,
}

impl TransitionService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn CommitmentStore>,
        hook: Arc<dyn TransitionHook>,
        config: TransitionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hook,
            config,
            clock,
        }
    }

    /// Processes a transition request.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for a missing commitment, `conflict` for an
    /// illegal state transition, and storage errors from persistence.
    pub async fn transition(
        &self,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, CommitmentError> {
        let mut commitment = self
            .store
            .get_commitment(request.commitment_id)
            .await?
            .ok_or(CommitmentError::NotFound {
                entity: "commitment",
                id: request.commitment_id.as_i64(),
            })?;
        let from = commitment.state;
        if !from.can_transition_to(request.to_state) {
            return Err(CommitmentError::IllegalTransition {
                commitment_id: commitment.id,
                from,
                to: request.to_state,
            });
        }

        let now = self.clock.now();
        let authority = evaluate_transition_authority(
            request.to_state,
            request.actor,
            request.confidence,
            self.config.autonomous_transition_threshold,
        );
        if !authority.allow {
            let proposal = self
                .store
                .create_transition_proposal(TransitionProposal {
                    id: minder_core::ProposalId::from_i64(0),
                    commitment_id: commitment.id,
                    from_state: from,
                    to_state: request.to_state,
                    actor: request.actor,
                    confidence: request.confidence,
                    threshold: authority.threshold,
                    reason: request.reason.clone(),
                    status: ProposalStatus::Pending,
                    proposed_at: now,
                    decided_at: None,
                    decided_by: None,
                    decision_reason: None,
                })
                .await?;
            tracing::info!(
                commitment_id = commitment.id.as_i64(),
                to_state = request.to_state.as_str(),
                authority_reason = authority.reason,
                "transition denied by authority; proposal created"
            );
            return Ok(TransitionOutcome::Proposed { proposal });
        }

        commitment.state = request.to_state;
        if request.to_state == CommitmentState::Missed && commitment.ever_missed_at.is_none() {
            commitment.ever_missed_at = Some(now);
        }
        commitment.updated_at = now;

        let audit_id = self
            .store
            .apply_transition(
                &commitment,
                TransitionRecord {
                    id: 0,
                    commitment_id: commitment.id,
                    from_state: from,
                    to_state: request.to_state,
                    actor: request.actor,
                    actor_id: request.actor_id,
                    reason: request.reason,
                    context: request.context,
                    confidence: request.confidence,
                    provenance: request.provenance,
                    transitioned_at: now,
                },
            )
            .await?;

        if let Err(err) = self
            .hook
            .on_transition(&commitment, from, request.to_state)
            .await
        {
            tracing::error!(
                commitment_id = commitment.id.as_i64(),
                error = %err,
                "transition hook failed; transition stands"
            );
        }

        Ok(TransitionOutcome::Applied {
            commitment,
            audit_id,
        })
    }

    /// Deletes transition audit rows older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns storage errors from persistence.
    pub async fn sweep_audits(&self) -> Result<usize, CommitmentError> {
        let cutoff =
            self.clock.now() - Duration::days(i64::from(self.config.audit_retention_days));
        let removed = self.store.sweep_transitions(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, "swept old transition audit rows");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::NewCommitment;
    use crate::store::InMemoryCommitmentStore;
    use chrono::TimeZone;
    use minder_core::FixedClock;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn user_transitions_always_allowed() {
        let decision = evaluate_transition_authority(
            CommitmentState::Completed,
            ActorKind::Human,
            None,
            0.8,
        );
        assert!(decision.allow);
        assert_eq!(decision.reason, "user_initiated");
    }

    #[test]
    fn system_missed_always_allowed() {
        let decision =
            evaluate_transition_authority(CommitmentState::Missed, ActorKind::System, None, 0.8);
        assert!(decision.allow);
        assert_eq!(decision.reason, "missed_is_autonomous");
    }

    #[test]
    fn system_needs_confidence() {
        let decision = evaluate_transition_authority(
            CommitmentState::Completed,
            ActorKind::System,
            None,
            0.8,
        );
        assert!(!decision.allow);
        assert_eq!(decision.reason, "missing_confidence");

        let below = evaluate_transition_authority(
            CommitmentState::Completed,
            ActorKind::System,
            Some(0.5),
            0.8,
        );
        assert!(!below.allow);

        let above = evaluate_transition_authority(
            CommitmentState::Completed,
            ActorKind::System,
            Some(0.9),
            0.8,
        );
        assert!(above.allow);
        assert_eq!(above.reason, "autonomy_confidence_gate");
    }

    async fn seeded() -> (Arc<InMemoryCommitmentStore>, TransitionService, Commitment) {
        let store = Arc::new(InMemoryCommitmentStore::new());
        let commitment = store
            .create_commitment(NewCommitment::new("marion", "Call the bank"), 40, now())
            .await
            .expect("create");
        let service = TransitionService::new(
            store.clone(),
            Arc::new(NullTransitionHook),
            TransitionConfig::default(),
            Arc::new(FixedClock::new(now())),
        );
        (store, service, commitment)
    }

    fn request(
        commitment_id: CommitmentId,
        to: CommitmentState,
        actor: ActorKind,
        confidence: Option<f64>,
    ) -> TransitionRequest {
        TransitionRequest {
            commitment_id,
            to_state: to,
            actor,
            actor_id: "test".to_string(),
            reason: "test".to_string(),
            context: None,
            confidence,
            provenance: None,
        }
    }

    #[tokio::test]
    async fn applied_transition_writes_audit() {
        let (store, service, commitment) = seeded().await;

        let outcome = service
            .transition(request(
                commitment.id,
                CommitmentState::Completed,
                ActorKind::Human,
                None,
            ))
            .await
            .expect("transition");
        let TransitionOutcome::Applied {
            commitment: updated,
            ..
        } = outcome
        else {
            panic!("expected applied outcome");
        };
        assert_eq!(updated.state, CommitmentState::Completed);

        let transitions = store.list_transitions(commitment.id).await.expect("list");
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_state, CommitmentState::Open);
        assert_eq!(transitions[0].to_state, CommitmentState::Completed);
    }

    #[tokio::test]
    async fn low_confidence_system_transition_becomes_proposal() {
        let (store, service, commitment) = seeded().await;

        let outcome = service
            .transition(request(
                commitment.id,
                CommitmentState::Completed,
                ActorKind::System,
                Some(0.4),
            ))
            .await
            .expect("transition");
        let TransitionOutcome::Proposed { proposal } = outcome else {
            panic!("expected proposed outcome");
        };
        assert_eq!(proposal.status, ProposalStatus::Pending);
        assert_eq!(proposal.confidence, Some(0.4));

        // The commitment did not move.
        let unchanged = store
            .get_commitment(commitment.id)
            .await
            .expect("lookup")
            .expect("commitment");
        assert_eq!(unchanged.state, CommitmentState::Open);
    }

    #[tokio::test]
    async fn illegal_transition_rejected() {
        let (_, service, commitment) = seeded().await;
        service
            .transition(request(
                commitment.id,
                CommitmentState::Completed,
                ActorKind::Human,
                None,
            ))
            .await
            .expect("complete");

        let err = service
            .transition(request(
                commitment.id,
                CommitmentState::Open,
                ActorKind::Human,
                None,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, CommitmentError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn missed_sets_ever_missed_at_once() {
        let (store, service, commitment) = seeded().await;

        service
            .transition(request(
                commitment.id,
                CommitmentState::Missed,
                ActorKind::System,
                None,
            ))
            .await
            .expect("miss");
        let missed = store
            .get_commitment(commitment.id)
            .await
            .expect("lookup")
            .expect("commitment");
        let first_missed_at = missed.ever_missed_at.expect("ever_missed_at set");

        // Reopen and miss again: the first-missed stamp is preserved.
        service
            .transition(request(
                commitment.id,
                CommitmentState::Open,
                ActorKind::Human,
                None,
            ))
            .await
            .expect("reopen");
        service
            .transition(request(
                commitment.id,
                CommitmentState::Missed,
                ActorKind::System,
                None,
            ))
            .await
            .expect("miss again");
        let again = store
            .get_commitment(commitment.id)
            .await
            .expect("lookup")
            .expect("commitment");
        assert_eq!(again.ever_missed_at, Some(first_missed_at));
    }

    #[tokio::test]
    async fn sweep_removes_old_audits() {
        let (store, _, commitment) = seeded().await;
        store
            .apply_transition(
                &store
                    .get_commitment(commitment.id)
                    .await
                    .expect("lookup")
                    .expect("commitment"),
                TransitionRecord {
                    id: 0,
                    commitment_id: commitment.id,
                    from_state: CommitmentState::Open,
                    to_state: CommitmentState::Missed,
                    actor: ActorKind::System,
                    actor_id: "miss_detection".to_string(),
                    reason: "due_by_expired".to_string(),
                    context: None,
                    confidence: None,
                    provenance: None,
                    transitioned_at: now() - Duration::days(400),
                },
            )
            .await
            .expect("seed old audit");

        let service = TransitionService::new(
            store.clone(),
            Arc::new(NullTransitionHook),
            TransitionConfig {
                autonomous_transition_threshold: 0.8,
                audit_retention_days: 365,
            },
            Arc::new(FixedClock::new(now())),
        );
        let removed = service.sweep_audits().await.expect("sweep");
        assert_eq!(removed, 1);
    }
}
