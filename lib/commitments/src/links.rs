//! Commitment-to-schedule links.
//!
//! A commitment has at most one active link at a time. Creating a link
//! deactivates any existing active links in the same transaction;
//! deleting a commitment cascades to its links.

use chrono::{DateTime, Utc};
use minder_core::{Clock, CommitmentId, ScheduleId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CommitmentError;
use crate::store::CommitmentStore;

/// One link between a commitment and a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentScheduleLink {
    /// Store-assigned row id, zero before insertion.
    pub id: i64,
    /// The linked commitment.
    pub commitment_id: CommitmentId,
    /// The linked schedule.
    pub schedule_id: ScheduleId,
    /// Whether this is the commitment's active link.
    pub is_active: bool,
    /// When the link was created.
    pub created_at: DateTime<Utc>,
}

/// Enforces the one-active-link invariant.
pub struct LinkService {
    store: Arc<dyn CommitmentStore>,
    clock: Arc<dyn Clock>,
}

impl LinkService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn CommitmentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Creates a new active link, deactivating any existing active
    /// links for the commitment in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for a missing commitment.
    pub async fn create_link(
        &self,
        commitment_id: CommitmentId,
        schedule_id: ScheduleId,
    ) -> Result<CommitmentScheduleLink, CommitmentError> {
        let link = self
            .store
            .create_link(commitment_id, schedule_id, self.clock.now())
            .await?;
        tracing::debug!(
            commitment_id = commitment_id.as_i64(),
            schedule_id = schedule_id.as_i64(),
            "active schedule link created"
        );
        Ok(link)
    }

    /// Deactivates a link and clears the commitment's schedule
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns `not_found` when the link does not exist.
    pub async fn deactivate_link(
        &self,
        commitment_id: CommitmentId,
        schedule_id: ScheduleId,
    ) -> Result<CommitmentScheduleLink, CommitmentError> {
        Ok(self
            .store
            .deactivate_link(commitment_id, schedule_id)
            .await?)
    }

    /// Resolves the commitment behind a schedule via its active link.
    ///
    /// # Errors
    ///
    /// Returns storage errors from persistence.
    pub async fn resolve_commitment_by_schedule(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<Option<CommitmentId>, CommitmentError> {
        Ok(self
            .store
            .active_link_for_schedule(schedule_id)
            .await?
            .map(|link| link.commitment_id))
    }

    /// Returns the commitment's active schedule, when any.
    ///
    /// # Errors
    ///
    /// Returns storage errors from persistence.
    pub async fn active_schedule(
        &self,
        commitment_id: CommitmentId,
    ) -> Result<Option<ScheduleId>, CommitmentError> {
        Ok(self
            .store
            .active_schedule_for_commitment(commitment_id)
            .await?)
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

    async fn service() -> (Arc<InMemoryCommitmentStore>, LinkService, CommitmentId) {
        let store = Arc::new(InMemoryCommitmentStore::new());
        let commitment = store
            .create_commitment(NewCommitment::new("marion", "File taxes"), 60, now())
            .await
            .expect("create");
        let service = LinkService::new(store.clone(), Arc::new(FixedClock::new(now())));
        (store, service, commitment.id)
    }

    #[tokio::test]
    async fn one_active_link_invariant() {
        let (store, service, commitment_id) = service().await;

        service
            .create_link(commitment_id, ScheduleId::from_i64(10))
            .await
            .expect("first link");
        service
            .create_link(commitment_id, ScheduleId::from_i64(11))
            .await
            .expect("second link");

        assert_eq!(
            store
                .active_link_count(commitment_id)
                .await
                .expect("count"),
            1
        );
        assert_eq!(
            service
                .active_schedule(commitment_id)
                .await
                .expect("active"),
            Some(ScheduleId::from_i64(11))
        );

        let commitment = store
            .get_commitment(commitment_id)
            .await
            .expect("lookup")
            .expect("commitment");
        assert_eq!(commitment.next_schedule_id, Some(ScheduleId::from_i64(11)));
    }

    #[tokio::test]
    async fn resolve_by_schedule_follows_active_link() {
        let (_, service, commitment_id) = service().await;
        service
            .create_link(commitment_id, ScheduleId::from_i64(10))
            .await
            .expect("link");

        assert_eq!(
            service
                .resolve_commitment_by_schedule(ScheduleId::from_i64(10))
                .await
                .expect("resolve"),
            Some(commitment_id)
        );
        assert_eq!(
            service
                .resolve_commitment_by_schedule(ScheduleId::from_i64(99))
                .await
                .expect("resolve"),
            None
        );
    }

    #[tokio::test]
    async fn deactivate_clears_schedule_reference() {
        let (store, service, commitment_id) = service().await;
        service
            .create_link(commitment_id, ScheduleId::from_i64(10))
            .await
            .expect("link");

        let link = service
            .deactivate_link(commitment_id, ScheduleId::from_i64(10))
            .await
            .expect("deactivate");
        assert!(!link.is_active);

        let commitment = store
            .get_commitment(commitment_id)
            .await
            .expect("lookup")
            .expect("commitment");
        assert!(commitment.next_schedule_id.is_none());
        assert_eq!(
            service
                .resolve_commitment_by_schedule(ScheduleId::from_i64(10))
                .await
                .expect("resolve"),
            None
        );
    }
}
