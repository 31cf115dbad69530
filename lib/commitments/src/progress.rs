//! Commitment progress recording.
//!
//! Progress on a commitment is an append-only log of provenance-linked
//! entries. Recording an entry and stamping the commitment's
//! `last_progress_at` happen in one transaction.

use chrono::{DateTime, Utc};
use minder_core::{Clock, CommitmentId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::CommitmentError;
use crate::store::CommitmentStore;

/// One recorded progress entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentProgress {
    /// Store-assigned row id, zero before insertion.
    pub id: i64,
    /// The commitment progressed on.
    pub commitment_id: CommitmentId,
    /// Reference to the input that evidences the progress.
    pub provenance_reference: String,
    /// When the progress happened.
    pub occurred_at: DateTime<Utc>,
    /// What happened.
    pub summary: String,
    /// Supporting excerpt from the source, when any.
    pub snippet: Option<String>,
    /// Free-form metadata.
    pub metadata: Option<JsonValue>,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

/// Input for recording a progress entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProgress {
    /// Reference to the input that evidences the progress.
    pub provenance_reference: String,
    /// When the progress happened.
    pub occurred_at: DateTime<Utc>,
    /// What happened.
    pub summary: String,
    /// Supporting excerpt from the source, when any.
    pub snippet: Option<String>,
    /// Free-form metadata.
    pub metadata: Option<JsonValue>,
}

impl NewProgress {
    /// Creates an input with the required fields.
    #[must_use]
    pub fn new(
        provenance_reference: impl Into<String>,
        occurred_at: DateTime<Utc>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            provenance_reference: provenance_reference.into(),
            occurred_at,
            summary: summary.into(),
            snippet: None,
            metadata: None,
        }
    }

    /// Adds a supporting excerpt.
    #[must_use]
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    fn validate(&self) -> Result<(), CommitmentError> {
        if self.provenance_reference.trim().is_empty() {
            return Err(CommitmentError::validation(
                "provenance_reference is required",
            ));
        }
        if self.summary.trim().is_empty() {
            return Err(CommitmentError::validation("summary is required"));
        }
        Ok(())
    }
}

/// Records progress entries and stamps `last_progress_at` atomically.
pub struct ProgressService {
    store: Arc<dyn CommitmentStore>,
    clock: Arc<dyn Clock>,
}

impl ProgressService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn CommitmentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records a progress entry for a commitment.
    ///
    /// The entry insert and the commitment's `last_progress_at` stamp
    /// commit in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `validation_error` for blank fields, `not_found` for a
    /// missing commitment, and storage errors from persistence.
    pub async fn record_progress(
        &self,
        commitment_id: CommitmentId,
        progress: NewProgress,
    ) -> Result<CommitmentProgress, CommitmentError> {
        progress.validate()?;
        let mut commitment = self
            .store
            .get_commitment(commitment_id)
            .await?
            .ok_or(CommitmentError::NotFound {
                entity: "commitment",
                id: commitment_id.as_i64(),
            })?;

        let now = self.clock.now();
        commitment.last_progress_at = Some(progress.occurred_at);
        commitment.updated_at = now;

        let record = self
            .store
            .record_progress(
                &commitment,
                CommitmentProgress {
                    id: 0,
                    commitment_id,
                    provenance_reference: progress.provenance_reference,
                    occurred_at: progress.occurred_at,
                    summary: progress.summary,
                    snippet: progress.snippet,
                    metadata: progress.metadata,
                    created_at: now,
                },
            )
            .await?;
        tracing::debug!(
            commitment_id = commitment_id.as_i64(),
            progress_id = record.id,
            "commitment progress recorded"
        );
        Ok(record)
    }

    /// Lists progress entries for a commitment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns storage errors from persistence.
    pub async fn list_progress(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Vec<CommitmentProgress>, CommitmentError> {
        Ok(self.store.list_progress(commitment_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::NewCommitment;
    use crate::store::InMemoryCommitmentStore;
    use chrono::{Duration, TimeZone};
    use minder_core::FixedClock;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    async fn service() -> (Arc<InMemoryCommitmentStore>, ProgressService, CommitmentId) {
        let store = Arc::new(InMemoryCommitmentStore::new());
        let commitment = store
            .create_commitment(NewCommitment::new("marion", "Write the proposal"), 50, now())
            .await
            .expect("create");
        let progress_service =
            ProgressService::new(store.clone(), Arc::new(FixedClock::new(now())));
        (store, progress_service, commitment.id)
    }

    #[tokio::test]
    async fn record_progress_stamps_last_progress_at() {
        let (store, service, commitment_id) = service().await;
        let occurred_at = now() - Duration::hours(1);

        let record = service
            .record_progress(
                commitment_id,
                NewProgress::new("signal:msg-42", occurred_at, "Drafted the outline")
                    .with_snippet("sent the first two sections"),
            )
            .await
            .expect("record");
        assert!(record.id > 0);
        assert_eq!(record.commitment_id, commitment_id);
        assert_eq!(record.occurred_at, occurred_at);

        let commitment = store
            .get_commitment(commitment_id)
            .await
            .expect("lookup")
            .expect("commitment");
        assert_eq!(commitment.last_progress_at, Some(occurred_at));

        let entries = service
            .list_progress(commitment_id)
            .await
            .expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].summary, "Drafted the outline");
    }

    #[tokio::test]
    async fn later_entries_move_the_stamp() {
        let (store, service, commitment_id) = service().await;

        service
            .record_progress(
                commitment_id,
                NewProgress::new("signal:msg-1", now() - Duration::days(2), "Started"),
            )
            .await
            .expect("first");
        service
            .record_progress(
                commitment_id,
                NewProgress::new("signal:msg-2", now() - Duration::hours(3), "Nearly there"),
            )
            .await
            .expect("second");

        let commitment = store
            .get_commitment(commitment_id)
            .await
            .expect("lookup")
            .expect("commitment");
        assert_eq!(
            commitment.last_progress_at,
            Some(now() - Duration::hours(3))
        );
        assert_eq!(
            service
                .list_progress(commitment_id)
                .await
                .expect("list")
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn blank_fields_rejected() {
        let (_, service, commitment_id) = service().await;
        let err = service
            .record_progress(
                commitment_id,
                NewProgress::new("  ", now(), "Did a thing"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommitmentError::Validation { .. }));

        let err = service
            .record_progress(commitment_id, NewProgress::new("signal:msg-1", now(), " "))
            .await
            .unwrap_err();
        assert!(matches!(err, CommitmentError::Validation { .. }));
    }

    #[tokio::test]
    async fn missing_commitment_rejected() {
        let (_, service, _) = service().await;
        let err = service
            .record_progress(
                CommitmentId::from_i64(999),
                NewProgress::new("signal:msg-1", now(), "Did a thing"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommitmentError::NotFound { .. }));
    }
}
