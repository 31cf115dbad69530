//! Postgres repository for the commitment store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_commitments::commitment::{Commitment, CommitmentState, NewCommitment};
use minder_commitments::error::CommitmentStoreError;
use minder_commitments::links::CommitmentScheduleLink;
use minder_commitments::progress::CommitmentProgress;
use minder_commitments::proposals::{
    CommitmentDraft, CreationProposal, CreationProposalKind, ProposalStatus, TransitionProposal,
};
use minder_commitments::store::{CommitmentFilter, CommitmentStore};
use minder_commitments::transition::TransitionRecord;
use minder_core::{ActorKind, CommitmentId, ProposalId, ScheduleId};
use sqlx::{FromRow, PgPool};

use super::backend_reason;

/// Postgres-backed commitment store.
pub struct PgCommitmentStore {
    pool: PgPool,
}

impl PgCommitmentStore {
    /// Creates a repository over the pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(err: sqlx::Error) -> CommitmentStoreError {
    CommitmentStoreError::Backend {
        reason: backend_reason(err),
    }
}

fn decode(reason: impl Into<String>) -> CommitmentStoreError {
    CommitmentStoreError::Backend {
        reason: reason.into(),
    }
}

fn state_from(value: &str) -> Result<CommitmentState, CommitmentStoreError> {
    match value {
        "OPEN" => Ok(CommitmentState::Open),
        "COMPLETED" => Ok(CommitmentState::Completed),
        "MISSED" => Ok(CommitmentState::Missed),
        "CANCELED" => Ok(CommitmentState::Canceled),
        other => Err(decode(format!("unknown commitment state '{other}'"))),
    }
}

fn actor_kind_from(value: &str) -> ActorKind {
    match value {
        "human" => ActorKind::Human,
        "scheduled" => ActorKind::Scheduled,
        _ => ActorKind::System,
    }
}

fn proposal_status_from(value: &str) -> Result<ProposalStatus, CommitmentStoreError> {
    match value {
        "pending" => Ok(ProposalStatus::Pending),
        "approved" => Ok(ProposalStatus::Approved),
        "rejected" => Ok(ProposalStatus::Rejected),
        "canceled" => Ok(ProposalStatus::Canceled),
        other => Err(decode(format!("unknown proposal status '{other}'"))),
    }
}

fn proposal_kind_from(value: &str) -> Result<CreationProposalKind, CommitmentStoreError> {
    match value {
        "dedupe" => Ok(CreationProposalKind::Dedupe),
        "approval" => Ok(CreationProposalKind::Approval),
        other => Err(decode(format!("unknown proposal kind '{other}'"))),
    }
}

#[derive(FromRow)]
struct CommitmentRow {
    id: i64,
    owner: String,
    description: String,
    state: String,
    importance: i16,
    effort: i16,
    due_by: Option<DateTime<Utc>>,
    urgency: i16,
    provenance_reference: Option<String>,
    next_schedule_id: Option<i64>,
    last_progress_at: Option<DateTime<Utc>>,
    ever_missed_at: Option<DateTime<Utc>>,
    reviewed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CommitmentRow {
    fn into_commitment(self) -> Result<Commitment, CommitmentStoreError> {
        Ok(Commitment {
            id: CommitmentId::from_i64(self.id),
            owner: self.owner,
            description: self.description,
            state: state_from(&self.state)?,
            importance: self.importance.clamp(1, 3) as u8,
            effort: self.effort.clamp(1, 3) as u8,
            due_by: self.due_by,
            urgency: self.urgency.clamp(1, 100) as u8,
            provenance_reference: self.provenance_reference,
            next_schedule_id: self.next_schedule_id.map(ScheduleId::from_i64),
            last_progress_at: self.last_progress_at,
            ever_missed_at: self.ever_missed_at,
            reviewed_at: self.reviewed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TransitionRow {
    id: i64,
    commitment_id: i64,
    from_state: String,
    to_state: String,
    actor_kind: String,
    actor_id: String,
    reason: String,
    context: Option<serde_json::Value>,
    confidence: Option<f64>,
    provenance: Option<serde_json::Value>,
    transitioned_at: DateTime<Utc>,
}

impl TransitionRow {
    fn into_record(self) -> Result<TransitionRecord, CommitmentStoreError> {
        Ok(TransitionRecord {
            id: self.id,
            commitment_id: CommitmentId::from_i64(self.commitment_id),
            from_state: state_from(&self.from_state)?,
            to_state: state_from(&self.to_state)?,
            actor: actor_kind_from(&self.actor_kind),
            actor_id: self.actor_id,
            reason: self.reason,
            context: self.context,
            confidence: self.confidence,
            provenance: self.provenance,
            transitioned_at: self.transitioned_at,
        })
    }
}

#[derive(FromRow)]
struct ProgressRow {
    id: i64,
    commitment_id: i64,
    provenance_reference: String,
    occurred_at: DateTime<Utc>,
    summary: String,
    snippet: Option<String>,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl ProgressRow {
    fn into_progress(self) -> CommitmentProgress {
        CommitmentProgress {
            id: self.id,
            commitment_id: CommitmentId::from_i64(self.commitment_id),
            provenance_reference: self.provenance_reference,
            occurred_at: self.occurred_at,
            summary: self.summary,
            snippet: self.snippet,
            metadata: self.metadata,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct LinkRow {
    id: i64,
    commitment_id: i64,
    schedule_id: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl LinkRow {
    fn into_link(self) -> CommitmentScheduleLink {
        CommitmentScheduleLink {
            id: self.id,
            commitment_id: CommitmentId::from_i64(self.commitment_id),
            schedule_id: ScheduleId::from_i64(self.schedule_id),
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct TransitionProposalRow {
    id: i64,
    commitment_id: i64,
    from_state: String,
    to_state: String,
    actor_kind: String,
    confidence: Option<f64>,
    threshold: f64,
    reason: String,
    status: String,
    proposed_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
    decided_by: Option<String>,
    decision_reason: Option<String>,
}

impl TransitionProposalRow {
    fn into_proposal(self) -> Result<TransitionProposal, CommitmentStoreError> {
        Ok(TransitionProposal {
            id: ProposalId::from_i64(self.id),
            commitment_id: CommitmentId::from_i64(self.commitment_id),
            from_state: state_from(&self.from_state)?,
            to_state: state_from(&self.to_state)?,
            actor: actor_kind_from(&self.actor_kind),
            confidence: self.confidence,
            threshold: self.threshold,
            reason: self.reason,
            status: proposal_status_from(&self.status)?,
            proposed_at: self.proposed_at,
            decided_at: self.decided_at,
            decided_by: self.decided_by,
            decision_reason: self.decision_reason,
        })
    }
}

#[derive(FromRow)]
struct CreationProposalRow {
    id: i64,
    proposal_ref: String,
    kind: String,
    draft: serde_json::Value,
    suggested_duplicate_id: Option<i64>,
    summary: Option<String>,
    source_channel: String,
    source_actor: Option<String>,
    status: String,
    created_commitment_id: Option<i64>,
    proposed_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
    decided_by: Option<String>,
    decision_reason: Option<String>,
}

impl CreationProposalRow {
    fn into_proposal(self) -> Result<CreationProposal, CommitmentStoreError> {
        let draft: CommitmentDraft = serde_json::from_value(self.draft)
            .map_err(|e| decode(format!("invalid stored draft: {e}")))?;
        Ok(CreationProposal {
            id: ProposalId::from_i64(self.id),
            proposal_ref: self.proposal_ref,
            kind: proposal_kind_from(&self.kind)?,
            draft,
            suggested_duplicate_id: self.suggested_duplicate_id.map(CommitmentId::from_i64),
            summary: self.summary,
            source_channel: self.source_channel,
            source_actor: self.source_actor,
            status: proposal_status_from(&self.status)?,
            created_commitment_id: self.created_commitment_id.map(CommitmentId::from_i64),
            proposed_at: self.proposed_at,
            decided_at: self.decided_at,
            decided_by: self.decided_by,
            decision_reason: self.decision_reason,
        })
    }
}

const COMMITMENT_COLUMNS: &str = "id, owner, description, state, importance, effort, due_by, \
    urgency, provenance_reference, next_schedule_id, last_progress_at, ever_missed_at, \
    reviewed_at, created_at, updated_at";

const CREATION_PROPOSAL_COLUMNS: &str = "id, proposal_ref, kind, draft, \
    suggested_duplicate_id, summary, source_channel, source_actor, status, \
    created_commitment_id, proposed_at, decided_at, decided_by, decision_reason";

async fn update_commitment_row(
    executor: impl sqlx::PgExecutor<'_>,
    commitment: &Commitment,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE commitments
        SET description = $2, state = $3, importance = $4, effort = $5, due_by = $6,
            urgency = $7, provenance_reference = $8, next_schedule_id = $9,
            last_progress_at = $10, ever_missed_at = $11, reviewed_at = $12,
            updated_at = $13
        WHERE id = $1
        "#,
    )
    .bind(commitment.id.as_i64())
    .bind(&commitment.description)
    .bind(commitment.state.as_str())
    .bind(i16::from(commitment.importance))
    .bind(i16::from(commitment.effort))
    .bind(commitment.due_by)
    .bind(i16::from(commitment.urgency))
    .bind(&commitment.provenance_reference)
    .bind(commitment.next_schedule_id.map(|id| id.as_i64()))
    .bind(commitment.last_progress_at)
    .bind(commitment.ever_missed_at)
    .bind(commitment.reviewed_at)
    .bind(commitment.updated_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl CommitmentStore for PgCommitmentStore {
    async fn create_commitment(
        &self,
        commitment: NewCommitment,
        urgency: u8,
        now: DateTime<Utc>,
    ) -> Result<Commitment, CommitmentStoreError> {
        let row: CommitmentRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO commitments
                (owner, description, state, importance, effort, due_by, urgency,
                 provenance_reference, created_at, updated_at)
            VALUES ($1, $2, 'OPEN', $3, $4, $5, $6, $7, $8, $8)
            RETURNING {COMMITMENT_COLUMNS}
            "#
        ))
        .bind(&commitment.owner)
        .bind(&commitment.description)
        .bind(i16::from(commitment.importance))
        .bind(i16::from(commitment.effort))
        .bind(commitment.due_by)
        .bind(i16::from(urgency))
        .bind(&commitment.provenance_reference)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        row.into_commitment()
    }

    async fn get_commitment(
        &self,
        id: CommitmentId,
    ) -> Result<Option<Commitment>, CommitmentStoreError> {
        let row: Option<CommitmentRow> = sqlx::query_as(&format!(
            "SELECT {COMMITMENT_COLUMNS} FROM commitments WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(CommitmentRow::into_commitment).transpose()
    }

    async fn list_commitments(
        &self,
        filter: CommitmentFilter,
    ) -> Result<Vec<Commitment>, CommitmentStoreError> {
        let rows: Vec<CommitmentRow> = sqlx::query_as(&format!(
            r#"
            SELECT {COMMITMENT_COLUMNS}
            FROM commitments
            WHERE ($1::text IS NULL OR owner = $1)
              AND ($2::text IS NULL OR state = $2)
            ORDER BY id
            "#
        ))
        .bind(filter.owner)
        .bind(filter.state.map(|s| s.as_str().to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(CommitmentRow::into_commitment).collect()
    }

    async fn update_commitment(
        &self,
        commitment: &Commitment,
    ) -> Result<(), CommitmentStoreError> {
        let affected = update_commitment_row(&self.pool, commitment)
            .await
            .map_err(backend)?;
        if affected == 0 {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: commitment.id.as_i64(),
            });
        }
        Ok(())
    }

    async fn delete_commitment(&self, id: CommitmentId) -> Result<(), CommitmentStoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM commitment_schedule_links WHERE commitment_id = $1")
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let result = sqlx::query("DELETE FROM commitments WHERE id = $1")
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: id.as_i64(),
            });
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn apply_transition(
        &self,
        commitment: &Commitment,
        record: TransitionRecord,
    ) -> Result<i64, CommitmentStoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        // Row lock serializes concurrent transitions per commitment.
        sqlx::query("SELECT id FROM commitments WHERE id = $1 FOR UPDATE")
            .bind(commitment.id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let affected = update_commitment_row(&mut *tx, commitment)
            .await
            .map_err(backend)?;
        if affected == 0 {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: commitment.id.as_i64(),
            });
        }
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO commitment_state_transitions
                (commitment_id, from_state, to_state, actor_kind, actor_id, reason,
                 context, confidence, provenance, transitioned_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(record.commitment_id.as_i64())
        .bind(record.from_state.as_str())
        .bind(record.to_state.as_str())
        .bind(record.actor.as_str())
        .bind(&record.actor_id)
        .bind(&record.reason)
        .bind(&record.context)
        .bind(record.confidence)
        .bind(&record.provenance)
        .bind(record.transitioned_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(id)
    }

    async fn list_transitions(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<TransitionRecord>, CommitmentStoreError> {
        let rows: Vec<TransitionRow> = sqlx::query_as(
            r#"
            SELECT id, commitment_id, from_state, to_state, actor_kind, actor_id,
                   reason, context, confidence, provenance, transitioned_at
            FROM commitment_state_transitions
            WHERE commitment_id = $1
            ORDER BY id
            "#,
        )
        .bind(commitment_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(TransitionRow::into_record).collect()
    }

    async fn sweep_transitions(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<usize, CommitmentStoreError> {
        let result =
            sqlx::query("DELETE FROM commitment_state_transitions WHERE transitioned_at < $1")
                .bind(older_than)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        Ok(result.rows_affected() as usize)
    }

    async fn record_progress(
        &self,
        commitment: &Commitment,
        progress: CommitmentProgress,
    ) -> Result<CommitmentProgress, CommitmentStoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("SELECT id FROM commitments WHERE id = $1 FOR UPDATE")
            .bind(commitment.id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let affected = update_commitment_row(&mut *tx, commitment)
            .await
            .map_err(backend)?;
        if affected == 0 {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: commitment.id.as_i64(),
            });
        }
        let row: ProgressRow = sqlx::query_as(
            r#"
            INSERT INTO commitment_progress
                (commitment_id, provenance_reference, occurred_at, summary, snippet,
                 metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, commitment_id, provenance_reference, occurred_at, summary,
                      snippet, metadata, created_at
            "#,
        )
        .bind(progress.commitment_id.as_i64())
        .bind(&progress.provenance_reference)
        .bind(progress.occurred_at)
        .bind(&progress.summary)
        .bind(&progress.snippet)
        .bind(&progress.metadata)
        .bind(progress.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(row.into_progress())
    }

    async fn list_progress(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<CommitmentProgress>, CommitmentStoreError> {
        let rows: Vec<ProgressRow> = sqlx::query_as(
            r#"
            SELECT id, commitment_id, provenance_reference, occurred_at, summary,
                   snippet, metadata, created_at
            FROM commitment_progress
            WHERE commitment_id = $1
            ORDER BY id
            "#,
        )
        .bind(commitment_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(ProgressRow::into_progress).collect())
    }

    async fn create_link(
        &self,
        commitment_id: CommitmentId,
        schedule_id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<CommitmentScheduleLink, CommitmentStoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("SELECT id FROM commitments WHERE id = $1 FOR UPDATE")
            .bind(commitment_id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query(
            r#"
            UPDATE commitment_schedule_links
            SET is_active = FALSE
            WHERE commitment_id = $1 AND is_active
            "#,
        )
        .bind(commitment_id.as_i64())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        let row: LinkRow = sqlx::query_as(
            r#"
            INSERT INTO commitment_schedule_links
                (commitment_id, schedule_id, is_active, created_at)
            VALUES ($1, $2, TRUE, $3)
            RETURNING id, commitment_id, schedule_id, is_active, created_at
            "#,
        )
        .bind(commitment_id.as_i64())
        .bind(schedule_id.as_i64())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        let result = sqlx::query(
            "UPDATE commitments SET next_schedule_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(commitment_id.as_i64())
        .bind(schedule_id.as_i64())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment",
                id: commitment_id.as_i64(),
            });
        }
        tx.commit().await.map_err(backend)?;
        Ok(row.into_link())
    }

    async fn deactivate_link(
        &self,
        commitment_id: CommitmentId,
        schedule_id: ScheduleId,
    ) -> Result<CommitmentScheduleLink, CommitmentStoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let row: Option<LinkRow> = sqlx::query_as(
            r#"
            UPDATE commitment_schedule_links
            SET is_active = FALSE
            WHERE commitment_id = $1 AND schedule_id = $2
            RETURNING id, commitment_id, schedule_id, is_active, created_at
            "#,
        )
        .bind(commitment_id.as_i64())
        .bind(schedule_id.as_i64())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;
        let Some(row) = row else {
            return Err(CommitmentStoreError::NotFound {
                entity: "commitment_schedule_link",
                id: schedule_id.as_i64(),
            });
        };
        sqlx::query("UPDATE commitments SET next_schedule_id = NULL WHERE id = $1")
            .bind(commitment_id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(row.into_link())
    }

    async fn active_link_for_schedule(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<Option<CommitmentScheduleLink>, CommitmentStoreError> {
        let row: Option<LinkRow> = sqlx::query_as(
            r#"
            SELECT id, commitment_id, schedule_id, is_active, created_at
            FROM commitment_schedule_links
            WHERE schedule_id = $1 AND is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(schedule_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(LinkRow::into_link))
    }

    async fn active_schedule_for_commitment(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Option<ScheduleId>, CommitmentStoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT schedule_id
            FROM commitment_schedule_links
            WHERE commitment_id = $1 AND is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(commitment_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(|(id,)| ScheduleId::from_i64(id)))
    }

    async fn active_link_count(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<usize, CommitmentStoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM commitment_schedule_links WHERE commitment_id = $1 AND is_active",
        )
        .bind(commitment_id.as_i64())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(count.max(0) as usize)
    }

    async fn create_transition_proposal(
        &self,
        proposal: TransitionProposal,
    ) -> Result<TransitionProposal, CommitmentStoreError> {
        let row: TransitionProposalRow = sqlx::query_as(
            r#"
            INSERT INTO commitment_transition_proposals
                (commitment_id, from_state, to_state, actor_kind, confidence, threshold,
                 reason, status, proposed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, commitment_id, from_state, to_state, actor_kind, confidence,
                      threshold, reason, status, proposed_at, decided_at, decided_by,
                      decision_reason
            "#,
        )
        .bind(proposal.commitment_id.as_i64())
        .bind(proposal.from_state.as_str())
        .bind(proposal.to_state.as_str())
        .bind(proposal.actor.as_str())
        .bind(proposal.confidence)
        .bind(proposal.threshold)
        .bind(&proposal.reason)
        .bind(proposal.status.as_str())
        .bind(proposal.proposed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        row.into_proposal()
    }

    async fn pending_transition_proposals(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<TransitionProposal>, CommitmentStoreError> {
        let rows: Vec<TransitionProposalRow> = sqlx::query_as(
            r#"
            SELECT id, commitment_id, from_state, to_state, actor_kind, confidence,
                   threshold, reason, status, proposed_at, decided_at, decided_by,
                   decision_reason
            FROM commitment_transition_proposals
            WHERE commitment_id = $1 AND status = 'pending'
            ORDER BY id
            "#,
        )
        .bind(commitment_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter()
            .map(TransitionProposalRow::into_proposal)
            .collect()
    }

    async fn decide_transition_proposal(
        &self,
        id: ProposalId,
        status: ProposalStatus,
        decided_by: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionProposal, CommitmentStoreError> {
        let row: Option<TransitionProposalRow> = sqlx::query_as(
            r#"
            UPDATE commitment_transition_proposals
            SET status = $2, decided_at = $3, decided_by = $4, decision_reason = $5
            WHERE id = $1
            RETURNING id, commitment_id, from_state, to_state, actor_kind, confidence,
                      threshold, reason, status, proposed_at, decided_at, decided_by,
                      decision_reason
            "#,
        )
        .bind(id.as_i64())
        .bind(status.as_str())
        .bind(now)
        .bind(decided_by)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.ok_or(CommitmentStoreError::NotFound {
            entity: "transition_proposal",
            id: id.as_i64(),
        })?
        .into_proposal()
    }

    async fn cancel_pending_transition_proposals(
        &self,
        commitment_id: CommitmentId,
        now: DateTime<Utc>,
    ) -> Result<usize, CommitmentStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE commitment_transition_proposals
            SET status = 'canceled', decided_at = $2
            WHERE commitment_id = $1 AND status = 'pending'
            "#,
        )
        .bind(commitment_id.as_i64())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() as usize)
    }

    async fn upsert_pending_creation_proposal(
        &self,
        proposal: CreationProposal,
    ) -> Result<CreationProposal, CommitmentStoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(
            "DELETE FROM commitment_creation_proposals WHERE proposal_ref = $1 AND status = 'pending'",
        )
        .bind(&proposal.proposal_ref)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        let row: CreationProposalRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO commitment_creation_proposals
                (proposal_ref, kind, draft, suggested_duplicate_id, summary,
                 source_channel, source_actor, status, proposed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {CREATION_PROPOSAL_COLUMNS}
            "#
        ))
        .bind(&proposal.proposal_ref)
        .bind(proposal.kind.as_str())
        .bind(serde_json::to_value(&proposal.draft).unwrap_or_default())
        .bind(proposal.suggested_duplicate_id.map(|id| id.as_i64()))
        .bind(&proposal.summary)
        .bind(&proposal.source_channel)
        .bind(&proposal.source_actor)
        .bind(proposal.status.as_str())
        .bind(proposal.proposed_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        row.into_proposal()
    }

    async fn get_creation_proposal(
        &self,
        proposal_ref: &str,
    ) -> Result<Option<CreationProposal>, CommitmentStoreError> {
        let row: Option<CreationProposalRow> = sqlx::query_as(&format!(
            r#"
            SELECT {CREATION_PROPOSAL_COLUMNS}
            FROM commitment_creation_proposals
            WHERE proposal_ref = $1
            ORDER BY id DESC
            LIMIT 1
            "#
        ))
        .bind(proposal_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(CreationProposalRow::into_proposal).transpose()
    }

    async fn update_creation_proposal(
        &self,
        proposal: &CreationProposal,
    ) -> Result<(), CommitmentStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE commitment_creation_proposals
            SET status = $2, created_commitment_id = $3, decided_at = $4, decided_by = $5,
                decision_reason = $6
            WHERE id = $1
            "#,
        )
        .bind(proposal.id.as_i64())
        .bind(proposal.status.as_str())
        .bind(proposal.created_commitment_id.map(|id| id.as_i64()))
        .bind(proposal.decided_at)
        .bind(&proposal.decided_by)
        .bind(&proposal.decision_reason)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(CommitmentStoreError::NotFound {
                entity: "creation_proposal",
                id: proposal.id.as_i64(),
            });
        }
        Ok(())
    }

    async fn last_review_run(
        &self,
        owner: &str,
    ) -> Result<Option<DateTime<Utc>>, CommitmentStoreError> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT MAX(ran_at) FROM commitment_review_runs WHERE owner = $1 HAVING MAX(ran_at) IS NOT NULL",
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(|(ran_at,)| ran_at))
    }

    async fn record_review_run(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CommitmentStoreError> {
        sqlx::query("INSERT INTO commitment_review_runs (owner, ran_at) VALUES ($1, $2)")
            .bind(owner)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
