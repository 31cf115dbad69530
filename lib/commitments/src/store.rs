//! Persistence operations for the commitment engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_core::{CommitmentId, ProposalId, ScheduleId};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::commitment::{Commitment, CommitmentState, NewCommitment};
use crate::error::CommitmentStoreError;
use crate::links::CommitmentScheduleLink;
use crate::progress::CommitmentProgress;
use crate::proposals::{CreationProposal, ProposalStatus, TransitionProposal};
use crate::transition::TransitionRecord;

/// Filter for commitment listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitmentFilter {
    /// Restrict to one owner.
    pub owner: Option<String>,
    /// Restrict to one state.
    pub state: Option<CommitmentState>,
}

/// Transactional store of commitment state.
#[async_trait]
pub trait CommitmentStore: Send + Sync {
    /// Creates a commitment with the given computed urgency.
    async fn create_commitment(
        &self,
        commitment: NewCommitment,
        urgency: u8,
        now: DateTime<Utc>,
    ) -> Result<Commitment, CommitmentStoreError>;

    /// Fetches a commitment.
    async fn get_commitment(
        &self,
        id: CommitmentId,
    ) -> Result<Option<Commitment>, CommitmentStoreError>;

    /// Lists commitments matching the filter.
    async fn list_commitments(
        &self,
        filter: CommitmentFilter,
    ) -> Result<Vec<Commitment>, CommitmentStoreError>;

    /// Persists a mutated commitment.
    async fn update_commitment(
        &self,
        commitment: &Commitment,
    ) -> Result<(), CommitmentStoreError>;

    /// Deletes a commitment, cascading to its schedule links.
    async fn delete_commitment(&self, id: CommitmentId) -> Result<(), CommitmentStoreError>;

    /// Persists a state change and its transition audit row in one
    /// transaction. Returns the audit row id.
    async fn apply_transition(
        &self,
        commitment: &Commitment,
        record: TransitionRecord,
    ) -> Result<i64, CommitmentStoreError>;

    /// Lists transition audit rows for a commitment, oldest first.
    async fn list_transitions(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<TransitionRecord>, CommitmentStoreError>;

    /// Deletes transition audit rows older than the cutoff. Returns the
    /// number removed.
    async fn sweep_transitions(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<usize, CommitmentStoreError>;

    /// Persists a progress entry and the commitment's
    /// `last_progress_at` stamp in one transaction.
    async fn record_progress(
        &self,
        commitment: &Commitment,
        progress: CommitmentProgress,
    ) -> Result<CommitmentProgress, CommitmentStoreError>;

    /// Lists progress entries for a commitment, oldest first.
    async fn list_progress(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<CommitmentProgress>, CommitmentStoreError>;

    /// Creates a new active link, deactivating existing active links
    /// for the commitment and updating its schedule reference, all in
    /// one transaction.
    async fn create_link(
        &self,
        commitment_id: CommitmentId,
        schedule_id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<CommitmentScheduleLink, CommitmentStoreError>;

    /// Deactivates a link and clears the commitment's schedule
    /// reference.
    async fn deactivate_link(
        &self,
        commitment_id: CommitmentId,
        schedule_id: ScheduleId,
    ) -> Result<CommitmentScheduleLink, CommitmentStoreError>;

    /// Returns the active link pointing at a schedule, when any.
    async fn active_link_for_schedule(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<Option<CommitmentScheduleLink>, CommitmentStoreError>;

    /// Returns the commitment's active schedule, when any.
    async fn active_schedule_for_commitment(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Option<ScheduleId>, CommitmentStoreError>;

    /// Counts a commitment's active links, for invariant checks.
    async fn active_link_count(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<usize, CommitmentStoreError>;

    /// Creates a transition proposal.
    async fn create_transition_proposal(
        &self,
        proposal: TransitionProposal,
    ) -> Result<TransitionProposal, CommitmentStoreError>;

    /// Lists pending transition proposals for a commitment.
    async fn pending_transition_proposals(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<TransitionProposal>, CommitmentStoreError>;

    /// Decides a transition proposal.
    async fn decide_transition_proposal(
        &self,
        id: ProposalId,
        status: ProposalStatus,
        decided_by: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionProposal, CommitmentStoreError>;

    /// Cancels all pending transition proposals for a commitment.
    /// Returns the number canceled.
    async fn cancel_pending_transition_proposals(
        &self,
        commitment_id: CommitmentId,
        now: DateTime<Utc>,
    ) -> Result<usize, CommitmentStoreError>;

    /// Creates a creation proposal, replacing any pending proposal with
    /// the same reference.
    async fn upsert_pending_creation_proposal(
        &self,
        proposal: CreationProposal,
    ) -> Result<CreationProposal, CommitmentStoreError>;

    /// Fetches a creation proposal by reference.
    async fn get_creation_proposal(
        &self,
        proposal_ref: &str,
    ) -> Result<Option<CreationProposal>, CommitmentStoreError>;

    /// Persists a mutated creation proposal.
    async fn update_creation_proposal(
        &self,
        proposal: &CreationProposal,
    ) -> Result<(), CommitmentStoreError>;

    /// Returns the last review run for an owner, when any.
    async fn last_review_run(
        &self,
        owner: &str,
    ) -> Result<Option<DateTime<Utc>>, CommitmentStoreError>;

    /// Records a review run for an owner.
    async fn record_review_run(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CommitmentStoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    next_commitment_id: i64,
    next_row_id: i64,
    commitments: BTreeMap<i64, Commitment>,
    transitions: Vec<TransitionRecord>,
    progress: Vec<CommitmentProgress>,
    links: Vec<CommitmentScheduleLink>,
    transition_proposals: BTreeMap<i64, TransitionProposal>,
    creation_proposals: Vec<CreationProposal>,
    review_runs: BTreeMap<String, DateTime<Utc>>,
}

impl Inner {
    fn next_row_id(&mut self) -> i64 {
        self.next_row_id += 1;
        self.next_row_id
    }
}

/// In-memory commitment store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryCommitmentStore {
    inner: Mutex<Inner>,
}

impl InMemoryCommitmentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of transition audit rows, for test
    /// assertions.
    #[must_use]
    pub fn transition_count(&self) -> usize {
        self.inner.lock().unwrap().transitions.len()
    }
}

#[async_trait]
impl CommitmentStore for InMemoryCommitmentStore {
    async fn create_commitment(
        &self,
        commitment: NewCommitment,
        urgency: u8,
        now: DateTime<Utc>,
    ) -> Result<Commitment, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_commitment_id += 1;
        let id = CommitmentId::from_i64(inner.next_commitment_id);
        let commitment = Commitment {
            id,
            owner: commitment.owner,
            description: commitment.description,
            state: CommitmentState::Open,
            importance: commitment.importance,
            effort: commitment.effort,
            due_by: commitment.due_by,
            urgency,
            provenance_reference: commitment.provenance_reference,
            next_schedule_id: None,
            last_progress_at: None,
            ever_missed_at: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.commitments.insert(id.as_i64(), commitment.clone());
        Ok(commitment)
    }

    async fn get_commitment(
        &self,
        id: CommitmentId,
    ) -> Result<Option<Commitment>, CommitmentStoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .commitments
            .get(&id.as_i64())
            .cloned())
    }

    async fn list_commitments(
        &self,
        filter: CommitmentFilter,
    ) -> Result<Vec<Commitment>, CommitmentStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .commitments
            .values()
            .filter(|c| filter.owner.as_deref().is_none_or(|owner| c.owner == owner))
            .filter(|c| filter.state.is_none_or(|state| c.state == state))
            .cloned()
            .collect())
    }

    async fn update_commitment(
        &self,
        commitment: &Commitment,
    ) -> Result<(), CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.commitments.contains_key(&commitment.id.as_i64()) {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: commitment.id.as_i64(),
            });
        }
        inner
            .commitments
            .insert(commitment.id.as_i64(), commitment.clone());
        Ok(())
    }

    async fn delete_commitment(&self, id: CommitmentId) -> Result<(), CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.commitments.remove(&id.as_i64()).is_none() {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: id.as_i64(),
            });
        }
        // Links cascade with the commitment; audit rows stay.
        inner.links.retain(|link| link.commitment_id != id);
        Ok(())
    }

    async fn apply_transition(
        &self,
        commitment: &Commitment,
        mut record: TransitionRecord,
    ) -> Result<i64, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.commitments.contains_key(&commitment.id.as_i64()) {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: commitment.id.as_i64(),
            });
        }
        inner
            .commitments
            .insert(commitment.id.as_i64(), commitment.clone());
        let id = inner.next_row_id();
        record.id = id;
        inner.transitions.push(record);
        Ok(id)
    }

    async fn list_transitions(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<TransitionRecord>, CommitmentStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transitions
            .iter()
            .filter(|t| t.commitment_id == commitment_id)
            .cloned()
            .collect())
    }

    async fn sweep_transitions(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<usize, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.transitions.len();
        inner
            .transitions
            .retain(|t| t.transitioned_at >= older_than);
        Ok(before - inner.transitions.len())
    }

    async fn record_progress(
        &self,
        commitment: &Commitment,
        mut progress: CommitmentProgress,
    ) -> Result<CommitmentProgress, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.commitments.contains_key(&commitment.id.as_i64()) {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: commitment.id.as_i64(),
            });
        }
        inner
            .commitments
            .insert(commitment.id.as_i64(), commitment.clone());
        let id = inner.next_row_id();
        progress.id = id;
        inner.progress.push(progress.clone());
        Ok(progress)
    }

    async fn list_progress(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<CommitmentProgress>, CommitmentStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .progress
            .iter()
            .filter(|p| p.commitment_id == commitment_id)
            .cloned()
            .collect())
    }

    async fn create_link(
        &self,
        commitment_id: CommitmentId,
        schedule_id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<CommitmentScheduleLink, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(mut commitment) = inner.commitments.get(&commitment_id.as_i64()).cloned()
        else {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: commitment_id.as_i64(),
            });
        };
        for link in inner.links.iter_mut() {
            if link.commitment_id == commitment_id && link.is_active {
                link.is_active = false;
            }
        }
        let id = inner.next_row_id();
        let link = CommitmentScheduleLink {
            id,
            commitment_id,
            schedule_id,
            is_active: true,
            created_at: now,
        };
        inner.links.push(link.clone());
        commitment.next_schedule_id = Some(schedule_id);
        commitment.updated_at = now;
        inner.commitments.insert(commitment_id.as_i64(), commitment);
        Ok(link)
    }

    async fn deactivate_link(
        &self,
        commitment_id: CommitmentId,
        schedule_id: ScheduleId,
    ) -> Result<CommitmentScheduleLink, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let link = inner
            .links
            .iter_mut()
            .find(|l| l.commitment_id == commitment_id && l.schedule_id == schedule_id)
            .ok_or(CommitmentStoreError::NotFound {
                entity: "commitment_schedule_link",
                id: schedule_id.as_i64(),
            })?;
        link.is_active = false;
        let link = link.clone();
        if let Some(commitment) = inner.commitments.get_mut(&commitment_id.as_i64()) {
            commitment.next_schedule_id = None;
        }
        Ok(link)
    }

    async fn active_link_for_schedule(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<Option<CommitmentScheduleLink>, CommitmentStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .links
            .iter()
            .find(|l| l.schedule_id == schedule_id && l.is_active)
            .cloned())
    }

    async fn active_schedule_for_commitment(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Option<ScheduleId>, CommitmentStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .links
            .iter()
            .rev()
            .find(|l| l.commitment_id == commitment_id && l.is_active)
            .map(|l| l.schedule_id))
    }

    async fn active_link_count(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<usize, CommitmentStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .links
            .iter()
            .filter(|l| l.commitment_id == commitment_id && l.is_active)
            .count())
    }

    async fn create_transition_proposal(
        &self,
        mut proposal: TransitionProposal,
    ) -> Result<TransitionProposal, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_row_id();
        proposal.id = ProposalId::from_i64(id);
        inner.transition_proposals.insert(id, proposal.clone());
        Ok(proposal)
    }

    async fn pending_transition_proposals(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<TransitionProposal>, CommitmentStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transition_proposals
            .values()
            .filter(|p| p.commitment_id == commitment_id && p.status == ProposalStatus::Pending)
            .cloned()
            .collect())
    }

    async fn decide_transition_proposal(
        &self,
        id: ProposalId,
        status: ProposalStatus,
        decided_by: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionProposal, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let proposal = inner.transition_proposals.get_mut(&id.as_i64()).ok_or(
            CommitmentStoreError::NotFound {
                entity: "transition_proposal",
                id: id.as_i64(),
            },
        )?;
        proposal.status = status;
        proposal.decided_at = Some(now);
        proposal.decided_by = Some(decided_by.to_string());
        proposal.decision_reason = reason;
        Ok(proposal.clone())
    }

    async fn cancel_pending_transition_proposals(
        &self,
        commitment_id: CommitmentId,
        now: DateTime<Utc>,
    ) -> Result<usize, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut canceled = 0;
        for proposal in inner.transition_proposals.values_mut() {
            if proposal.commitment_id == commitment_id
                && proposal.status == ProposalStatus::Pending
            {
                proposal.status = ProposalStatus::Canceled;
                proposal.decided_at = Some(now);
                canceled += 1;
            }
        }
        Ok(canceled)
    }

    async fn upsert_pending_creation_proposal(
        &self,
        mut proposal: CreationProposal,
    ) -> Result<CreationProposal, CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.creation_proposals.retain(|p| {
            !(p.proposal_ref == proposal.proposal_ref && p.status == ProposalStatus::Pending)
        });
        let id = inner.next_row_id();
        proposal.id = ProposalId::from_i64(id);
        inner.creation_proposals.push(proposal.clone());
        Ok(proposal)
    }

    async fn get_creation_proposal(
        &self,
        proposal_ref: &str,
    ) -> Result<Option<CreationProposal>, CommitmentStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .creation_proposals
            .iter()
            .rev()
            .find(|p| p.proposal_ref == proposal_ref)
            .cloned())
    }

    async fn update_creation_proposal(
        &self,
        proposal: &CreationProposal,
    ) -> Result<(), CommitmentStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let existing = inner
            .creation_proposals
            .iter_mut()
            .find(|p| p.id == proposal.id)
            .ok_or(CommitmentStoreError::NotFound {
                entity: "creation_proposal",
                id: proposal.id.as_i64(),
            })?;
        *existing = proposal.clone();
        Ok(())
    }

    async fn last_review_run(
        &self,
        owner: &str,
    ) -> Result<Option<DateTime<Utc>>, CommitmentStoreError> {
        Ok(self.inner.lock().unwrap().review_runs.get(owner).copied())
    }

    async fn record_review_run(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CommitmentStoreError> {
        self.inner
            .lock()
            .unwrap()
            .review_runs
            .insert(owner.to_string(), now);
        Ok(())
    }
}
