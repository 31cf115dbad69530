//! Transition and creation proposals.
//!
//! Denied system transitions and sub-threshold agent creations become
//! pending proposals instead of state changes. Creation proposals carry
//! a deterministic fingerprint reference quoted in the operator
//! notification, so a later reply can be correlated back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_ai::SimilarityScorer;
use minder_attention::{ProvenanceInput, RoutingEnvelope};
use minder_core::{ActorKind, Clock, CommitmentId, ProposalId};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::sync::Arc;

use crate::commitment::{compute_urgency, Commitment, CommitmentState, NewCommitment};
use crate::error::CommitmentError;
use crate::notifications::NotificationSubmitter;
use crate::store::{CommitmentFilter, CommitmentStore};

/// Proposal lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Canceled,
}

impl ProposalStatus {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
        }
    }
}

/// A proposal to apply a denied system transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionProposal {
    /// Store-assigned identifier, zero before insertion.
    pub id: ProposalId,
    /// The commitment the transition targets.
    pub commitment_id: CommitmentId,
    /// State the commitment was in.
    pub from_state: CommitmentState,
    /// Proposed target state.
    pub to_state: CommitmentState,
    /// Actor behind the denied transition.
    pub actor: ActorKind,
    /// Confidence the actor supplied.
    pub confidence: Option<f64>,
    /// Threshold the confidence was compared against.
    pub threshold: f64,
    /// Why the transition was requested.
    pub reason: String,
    /// Proposal status.
    pub status: ProposalStatus,
    /// When the proposal was created.
    pub proposed_at: DateTime<Utc>,
    /// When the proposal was decided.
    pub decided_at: Option<DateTime<Utc>>,
    /// Who decided it.
    pub decided_by: Option<String>,
    /// Why it was decided that way.
    pub decision_reason: Option<String>,
}

/// Creation proposal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationProposalKind {
    /// A suspected duplicate of an existing commitment.
    Dedupe,
    /// An agent-sourced commitment below the autonomy threshold.
    Approval,
}

impl CreationProposalKind {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dedupe => "dedupe",
            Self::Approval => "approval",
        }
    }
}

/// A pending or decided creation proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationProposal {
    /// Store-assigned identifier, zero before insertion.
    pub id: ProposalId,
    /// Deterministic reference: `{scope}:{kind}:{16-hex fingerprint}`.
    pub proposal_ref: String,
    /// Proposal kind.
    pub kind: CreationProposalKind,
    /// The draft the proposal would create.
    pub draft: CommitmentDraft,
    /// The suspected duplicate, for dedupe proposals.
    pub suggested_duplicate_id: Option<CommitmentId>,
    /// Word-capped summary of the dedupe candidate.
    pub summary: Option<String>,
    /// Channel the draft came in on.
    pub source_channel: String,
    /// Acting identity behind the draft.
    pub source_actor: Option<String>,
    /// Proposal status.
    pub status: ProposalStatus,
    /// The commitment created on approval, for idempotent re-approval.
    pub created_commitment_id: Option<CommitmentId>,
    /// When the proposal was created.
    pub proposed_at: DateTime<Utc>,
    /// When the proposal was decided.
    pub decided_at: Option<DateTime<Utc>>,
    /// Who decided it.
    pub decided_by: Option<String>,
    /// Why it was decided that way.
    pub decision_reason: Option<String>,
}

/// A commitment waiting to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentDraft {
    /// The owner the commitment is for.
    pub owner: String,
    /// What is promised.
    pub description: String,
    /// Importance, 1 to 3.
    pub importance: u8,
    /// Effort, 1 to 3.
    pub effort: u8,
    /// Optional due-by instant.
    pub due_by: Option<DateTime<Utc>>,
    /// Where the draft came from.
    pub provenance_reference: Option<String>,
    /// Extraction confidence for agent-sourced drafts.
    pub confidence: Option<f64>,
}

impl CommitmentDraft {
    fn to_new_commitment(&self) -> NewCommitment {
        NewCommitment {
            owner: self.owner.clone(),
            description: self.description.clone(),
            importance: self.importance,
            effort: self.effort,
            due_by: self.due_by,
            provenance_reference: self.provenance_reference.clone(),
        }
    }
}

/// Who is creating the commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationSource {
    /// The user themselves; always allowed.
    User,
    /// The agent; gated on confidence and dedupe.
    Agent,
}

/// Creation workflow configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationConfig {
    /// Confidence cutoff for autonomous agent creations.
    pub autonomous_creation_threshold: f64,
    /// Similarity cutoff above which a dedupe proposal is raised.
    pub dedupe_threshold: f64,
    /// Word cap on dedupe candidate summaries.
    pub dedupe_summary_word_cap: usize,
    /// Scope prefix on proposal references.
    pub proposal_scope: String,
}

impl Default for CreationConfig {
    fn default() -> Self {
        Self {
            autonomous_creation_threshold: 0.8,
            dedupe_threshold: 0.8,
            dedupe_summary_word_cap: 40,
            proposal_scope: "signal".to_string(),
        }
    }
}

/// What the creation workflow did with a draft.
#[derive(Debug, Clone, PartialEq)]
pub enum CreationOutcome {
    /// The commitment was created directly.
    Created(Commitment),
    /// A dedupe proposal is pending operator decision.
    DedupeProposed(CreationProposal),
    /// An approval proposal is pending operator decision.
    ApprovalRequested(CreationProposal),
}

/// Builds the deterministic proposal reference
/// `{scope}:{kind}:{16-hex-of-sha1(components)}`.
#[must_use]
pub fn build_proposal_ref(
    scope: &str,
    kind: CreationProposalKind,
    components: &[&str],
) -> String {
    let digest = Sha1::digest(components.join("|").as_bytes());
    let fingerprint = hex::encode(digest);
    format!("{scope}:{}:{}", kind.as_str(), &fingerprint[..16])
}

/// Runs the commitment creation workflow: dedupe, authority, proposal
/// routing.
pub struct CreationService {
    store: Arc<dyn CommitmentStore>,
    similarity: Arc<dyn SimilarityScorer>,
    submitter: Arc<dyn NotificationSubmitter>,
    config: CreationConfig,
    clock: Arc<dyn Clock>,
}

impl CreationService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn CommitmentStore>,
        similarity: Arc<dyn SimilarityScorer>,
        submitter: Arc<dyn NotificationSubmitter>,
        config: CreationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            similarity,
            submitter,
            config,
            clock,
        }
    }

    /// Processes a creation request.
    ///
    /// User-sourced drafts create directly. Agent-sourced drafts first
    /// run the dedupe comparison against OPEN commitments, then the
    /// creation authority; either gate failing produces a pending
    /// proposal and an operator notification instead of a commitment.
    ///
    /// # Errors
    ///
    /// Returns validation and storage errors; similarity failures are
    /// logged and skip dedupe rather than failing the request.
    pub async fn create(
        &self,
        draft: CommitmentDraft,
        source: CreationSource,
    ) -> Result<CreationOutcome, CommitmentError> {
        let new_commitment = draft.to_new_commitment();
        new_commitment.validate()?;
        let now = self.clock.now();

        if source == CreationSource::User {
            let commitment = self.insert(&new_commitment, now).await?;
            return Ok(CreationOutcome::Created(commitment));
        }

        if let Some((duplicate, score)) = self.find_duplicate(&draft).await? {
            let proposal = self
                .raise_proposal(
                    &draft,
                    CreationProposalKind::Dedupe,
                    Some(duplicate.id),
                    Some(cap_words(
                        &duplicate.description,
                        self.config.dedupe_summary_word_cap,
                    )),
                    now,
                )
                .await?;
            tracing::info!(
                proposal_ref = %proposal.proposal_ref,
                duplicate_id = duplicate.id.as_i64(),
                score,
                "dedupe proposal raised"
            );
            return Ok(CreationOutcome::DedupeProposed(proposal));
        }

        let confidence = draft.confidence.unwrap_or(0.0);
        if confidence >= self.config.autonomous_creation_threshold {
            let commitment = self.insert(&new_commitment, now).await?;
            return Ok(CreationOutcome::Created(commitment));
        }

        let proposal = self
            .raise_proposal(&draft, CreationProposalKind::Approval, None, None, now)
            .await?;
        tracing::info!(
            proposal_ref = %proposal.proposal_ref,
            confidence,
            threshold = self.config.autonomous_creation_threshold,
            "creation approval proposal raised"
        );
        Ok(CreationOutcome::ApprovalRequested(proposal))
    }

    /// Approves a creation proposal by reference.
    ///
    /// Approval-kind proposals create the commitment; dedupe-kind
    /// proposals only record the decision. Approving an
    /// already-approved proposal is a no-op on the created commitment.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for an unknown reference and `conflict` for
    /// rejected or canceled proposals.
    pub async fn approve(
        &self,
        proposal_ref: &str,
        decided_by: &str,
    ) -> Result<CreationProposal, CommitmentError> {
        let mut proposal = self.load(proposal_ref).await?;
        match proposal.status {
            ProposalStatus::Approved => return Ok(proposal),
            ProposalStatus::Rejected | ProposalStatus::Canceled => {
                return Err(CommitmentError::Conflict {
                    reason: format!(
                        "proposal {proposal_ref} is already {}",
                        proposal.status.as_str()
                    ),
                });
            }
            ProposalStatus::Pending => {}
        }

        let now = self.clock.now();
        if proposal.kind == CreationProposalKind::Approval {
            let commitment = self.insert(&proposal.draft.to_new_commitment(), now).await?;
            proposal.created_commitment_id = Some(commitment.id);
        }
        proposal.status = ProposalStatus::Approved;
        proposal.decided_at = Some(now);
        proposal.decided_by = Some(decided_by.to_string());
        self.store.update_creation_proposal(&proposal).await?;
        Ok(proposal)
    }

    /// Rejects a pending creation proposal by reference.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for an unknown reference.
    pub async fn reject(
        &self,
        proposal_ref: &str,
        decided_by: &str,
        reason: Option<String>,
    ) -> Result<CreationProposal, CommitmentError> {
        let mut proposal = self.load(proposal_ref).await?;
        if proposal.status != ProposalStatus::Pending {
            return Ok(proposal);
        }
        proposal.status = ProposalStatus::Rejected;
        proposal.decided_at = Some(self.clock.now());
        proposal.decided_by = Some(decided_by.to_string());
        proposal.decision_reason = reason;
        self.store.update_creation_proposal(&proposal).await?;
        Ok(proposal)
    }

    async fn load(&self, proposal_ref: &str) -> Result<CreationProposal, CommitmentError> {
        self.store
            .get_creation_proposal(proposal_ref)
            .await?
            .ok_or(CommitmentError::NotFound {
                entity: "creation_proposal",
                id: 0,
            })
    }

    async fn insert(
        &self,
        new_commitment: &NewCommitment,
        now: DateTime<Utc>,
    ) -> Result<Commitment, CommitmentError> {
        let urgency = compute_urgency(
            new_commitment.importance,
            new_commitment.effort,
            new_commitment.due_by,
            now,
        );
        Ok(self
            .store
            .create_commitment(new_commitment.clone(), urgency, now)
            .await?)
    }

    async fn find_duplicate(
        &self,
        draft: &CommitmentDraft,
    ) -> Result<Option<(Commitment, f64)>, CommitmentError> {
        let open = self
            .store
            .list_commitments(CommitmentFilter {
                owner: Some(draft.owner.clone()),
                state: Some(CommitmentState::Open),
            })
            .await?;
        let mut best: Option<(Commitment, f64)> = None;
        for candidate in open {
            match self
                .similarity
                .similarity(&draft.description, &candidate.description)
                .await
            {
                Ok(score) => {
                    if score >= self.config.dedupe_threshold
                        && best.as_ref().is_none_or(|(_, s)| score > *s)
                    {
                        best = Some((candidate, score));
                    }
                }
                Err(err) => {
                    // The comparison is advisory: a failed judgment
                    // skips dedupe rather than blocking creation.
                    tracing::warn!(
                        commitment_id = candidate.id.as_i64(),
                        error = %err,
                        "similarity comparison failed"
                    );
                }
            }
        }
        Ok(best)
    }

    async fn raise_proposal(
        &self,
        draft: &CommitmentDraft,
        kind: CreationProposalKind,
        suggested_duplicate_id: Option<CommitmentId>,
        summary: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CreationProposal, CommitmentError> {
        let proposal_ref = build_proposal_ref(
            &self.config.proposal_scope,
            kind,
            &[
                draft.owner.as_str(),
                draft.description.as_str(),
                draft.provenance_reference.as_deref().unwrap_or_default(),
            ],
        );
        let proposal = self
            .store
            .upsert_pending_creation_proposal(CreationProposal {
                id: ProposalId::from_i64(0),
                proposal_ref: proposal_ref.clone(),
                kind,
                draft: draft.clone(),
                suggested_duplicate_id,
                summary,
                source_channel: self.config.proposal_scope.clone(),
                source_actor: None,
                status: ProposalStatus::Pending,
                created_commitment_id: None,
                proposed_at: now,
                decided_at: None,
                decided_by: None,
                decision_reason: None,
            })
            .await?;

        if let Err(err) = self
            .submitter
            .submit(proposal_envelope(&proposal, now))
            .await
        {
            // The proposal stands even when the notification fails.
            tracing::error!(
                proposal_ref = %proposal.proposal_ref,
                error = %err,
                "failed to route creation proposal notification"
            );
        }
        Ok(proposal)
    }
}

fn proposal_envelope(proposal: &CreationProposal, now: DateTime<Utc>) -> RoutingEnvelope {
    let signal_type = match proposal.kind {
        CreationProposalKind::Dedupe => "commitment.dedupe_proposal",
        CreationProposalKind::Approval => "commitment.creation_approval_proposal",
    };
    let message = match proposal.kind {
        CreationProposalKind::Dedupe => format!(
            "Possible duplicate of \"{}\": \"{}\". Approve or reject. proposal_ref={}",
            proposal.summary.as_deref().unwrap_or("an open commitment"),
            proposal.draft.description,
            proposal.proposal_ref
        ),
        CreationProposalKind::Approval => format!(
            "Create commitment \"{}\"? Approve or reject. proposal_ref={}",
            proposal.draft.description, proposal.proposal_ref
        ),
    };
    let mut provenance = vec![ProvenanceInput::new("proposal_ref", &proposal.proposal_ref)
        .with_description("Stable proposal reference for reply-based decisions.")];
    if let Some(reference) = &proposal.draft.provenance_reference {
        provenance.push(ProvenanceInput::new("source", reference));
    }
    RoutingEnvelope {
        version: minder_attention::envelope::ENVELOPE_VERSION,
        signal_type: signal_type.to_string(),
        signal_reference: format!("{signal_type}:{}", proposal.proposal_ref),
        actor: "system".to_string(),
        owner: proposal.draft.owner.clone(),
        channel_hint: Some(minder_attention::Channel::Signal),
        urgency: 0.6,
        channel_cost: 0.3,
        content_type: "text".to_string(),
        timestamp: now,
        signal_payload: Some(minder_attention::SignalPayload {
            from: "minder".to_string(),
            to: proposal.draft.owner.clone(),
            message,
        }),
        notification: Some(minder_attention::NotificationDescriptor::new(
            "commitment_engine",
            proposal.proposal_ref.clone(),
            proposal.draft.confidence.unwrap_or(0.0),
            provenance,
        )),
        escalation: Default::default(),
        metadata: None,
    }
}

pub(crate) fn cap_words(text: &str, cap: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= cap {
        return text.trim().to_string();
    }
    format!("{} ...", words[..cap].join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::RecordingSubmitter;
    use crate::store::InMemoryCommitmentStore;
    use chrono::TimeZone;
    use minder_ai::FixedSimilarity;
    use minder_core::FixedClock;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    fn draft(description: &str, confidence: Option<f64>) -> CommitmentDraft {
        CommitmentDraft {
            owner: "marion".to_string(),
            description: description.to_string(),
            importance: 2,
            effort: 2,
            due_by: None,
            provenance_reference: Some("signal:msg-7".to_string()),
            confidence,
        }
    }

    struct Harness {
        store: Arc<InMemoryCommitmentStore>,
        submitter: Arc<RecordingSubmitter>,
        service: CreationService,
    }

    fn harness(similarity: f64) -> Harness {
        let store = Arc::new(InMemoryCommitmentStore::new());
        let submitter = Arc::new(RecordingSubmitter::new());
        let service = CreationService::new(
            store.clone(),
            Arc::new(FixedSimilarity(similarity)),
            submitter.clone(),
            CreationConfig::default(),
            Arc::new(FixedClock::new(now())),
        );
        Harness {
            store,
            submitter,
            service,
        }
    }

    #[test]
    fn proposal_ref_is_deterministic() {
        let a = build_proposal_ref("signal", CreationProposalKind::Dedupe, &["x", "y"]);
        let b = build_proposal_ref("signal", CreationProposalKind::Dedupe, &["x", "y"]);
        assert_eq!(a, b);
        assert!(a.starts_with("signal:dedupe:"));
        let fingerprint = a.rsplit(':').next().unwrap();
        assert_eq!(fingerprint.len(), 16);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));

        let c = build_proposal_ref("signal", CreationProposalKind::Dedupe, &["x", "z"]);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn user_creation_is_direct() {
        let h = harness(0.0);
        let outcome = h
            .service
            .create(draft("Water plants", None), CreationSource::User)
            .await
            .expect("create");
        assert!(matches!(outcome, CreationOutcome::Created(_)));
        assert!(h.submitter.submitted().is_empty());
    }

    #[tokio::test]
    async fn dedupe_proposal_raised_above_threshold() {
        // Scenario: existing "Book dentist appointment", agent draft
        // "Schedule dentist visit" at confidence 0.55, similarity 0.92.
        let h = harness(0.92);
        h.store
            .create_commitment(
                NewCommitment::new("marion", "Book dentist appointment"),
                40,
                now(),
            )
            .await
            .expect("existing");

        let outcome = h
            .service
            .create(
                draft("Schedule dentist visit", Some(0.55)),
                CreationSource::Agent,
            )
            .await
            .expect("create");
        let CreationOutcome::DedupeProposed(proposal) = outcome else {
            panic!("expected dedupe proposal");
        };
        assert_eq!(proposal.kind, CreationProposalKind::Dedupe);
        assert_eq!(proposal.status, ProposalStatus::Pending);
        assert!(proposal.suggested_duplicate_id.is_some());
        assert!(proposal.proposal_ref.starts_with("signal:dedupe:"));

        // No commitment was created for the draft.
        let open = h
            .store
            .list_commitments(CommitmentFilter {
                owner: Some("marion".to_string()),
                state: Some(CommitmentState::Open),
            })
            .await
            .expect("list");
        assert_eq!(open.len(), 1);

        // The operator notification quotes the reference.
        let submitted = h.submitter.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].signal_type, "commitment.dedupe_proposal");
        assert!(submitted[0]
            .signal_payload
            .as_ref()
            .unwrap()
            .message
            .contains(&proposal.proposal_ref));
    }

    #[tokio::test]
    async fn low_confidence_agent_creation_requests_approval() {
        let h = harness(0.1);
        let outcome = h
            .service
            .create(draft("Renew passport", Some(0.3)), CreationSource::Agent)
            .await
            .expect("create");
        let CreationOutcome::ApprovalRequested(proposal) = outcome else {
            panic!("expected approval proposal");
        };
        assert_eq!(proposal.kind, CreationProposalKind::Approval);

        // Approving creates the commitment.
        let approved = h
            .service
            .approve(&proposal.proposal_ref, "marion")
            .await
            .expect("approve");
        let created_id = approved.created_commitment_id.expect("created");

        // Re-approving is a no-op on the created commitment.
        let again = h
            .service
            .approve(&proposal.proposal_ref, "marion")
            .await
            .expect("re-approve");
        assert_eq!(again.created_commitment_id, Some(created_id));
        let open = h
            .store
            .list_commitments(CommitmentFilter {
                owner: Some("marion".to_string()),
                state: Some(CommitmentState::Open),
            })
            .await
            .expect("list");
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn high_confidence_agent_creation_is_autonomous() {
        let h = harness(0.1);
        let outcome = h
            .service
            .create(draft("Submit expense report", Some(0.95)), CreationSource::Agent)
            .await
            .expect("create");
        assert!(matches!(outcome, CreationOutcome::Created(_)));
    }

    #[tokio::test]
    async fn reject_records_decision() {
        let h = harness(0.1);
        let CreationOutcome::ApprovalRequested(proposal) = h
            .service
            .create(draft("Renew passport", Some(0.3)), CreationSource::Agent)
            .await
            .expect("create")
        else {
            panic!("expected approval proposal");
        };

        let rejected = h
            .service
            .reject(&proposal.proposal_ref, "marion", Some("not mine".to_string()))
            .await
            .expect("reject");
        assert_eq!(rejected.status, ProposalStatus::Rejected);
        assert_eq!(rejected.decision_reason.as_deref(), Some("not mine"));
        assert!(rejected.created_commitment_id.is_none());
    }

    #[test]
    fn word_cap() {
        assert_eq!(cap_words("one two three", 5), "one two three");
        assert_eq!(cap_words("one two three four", 2), "one two ...");
    }
}
