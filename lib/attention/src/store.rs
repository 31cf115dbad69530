//! Persistence operations for the attention subsystem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::channel::Channel;
use crate::error::AttentionStoreError;
use crate::escalation::EscalationLevel;
use crate::history::{
    Batch, BatchSummary, BatchedSignal, DecisionRecord, DeferredSignal, EscalationLogEntry,
    FailClosedEntry, NotificationHistoryEntry,
};
use crate::preferences::OwnerPreferences;

/// Transactional store of attention state.
#[async_trait]
pub trait AttentionStore: Send + Sync {
    /// Appends a notification-history row. Returns the row id.
    async fn record_history(
        &self,
        entry: NotificationHistoryEntry,
    ) -> Result<i64, AttentionStoreError>;

    /// Counts delivered outcomes (NOTIFY*/ESCALATE*) for an owner and
    /// channel with `created_at` inside `[window_start, window_end]`.
    async fn count_recent_notifications(
        &self,
        owner: &str,
        channel: Channel,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<u32, AttentionStoreError>;

    /// Finds a delivered history row for the same owner and signal
    /// reference since `window_start`, for delivery idempotency.
    async fn find_recent_delivery(
        &self,
        owner: &str,
        signal_reference: &str,
        window_start: DateTime<Utc>,
    ) -> Result<Option<NotificationHistoryEntry>, AttentionStoreError>;

    /// Loads the owner's preferences.
    async fn owner_preferences(
        &self,
        owner: &str,
    ) -> Result<Option<OwnerPreferences>, AttentionStoreError>;

    /// Creates or replaces the owner's preferences.
    async fn upsert_preferences(
        &self,
        preferences: OwnerPreferences,
    ) -> Result<(), AttentionStoreError>;

    /// Persists a deferred signal. Returns the row id.
    async fn enqueue_deferred(&self, signal: DeferredSignal) -> Result<i64, AttentionStoreError>;

    /// Persists a signal into the batching holding area. Returns the
    /// row id.
    async fn enqueue_batched(&self, signal: BatchedSignal) -> Result<i64, AttentionStoreError>;

    /// Lists unassigned holding-area signals for an owner.
    async fn pending_batched(&self, owner: &str)
        -> Result<Vec<BatchedSignal>, AttentionStoreError>;

    /// Creates a batch row. Returns the batch id.
    async fn create_batch(&self, batch: Batch) -> Result<i64, AttentionStoreError>;

    /// Assigns holding-area signals to a batch.
    async fn assign_to_batch(
        &self,
        batch_id: i64,
        signal_ids: &[i64],
    ) -> Result<(), AttentionStoreError>;

    /// Lists the signals assigned to a batch, newest first.
    async fn batch_signals(&self, batch_id: i64)
        -> Result<Vec<BatchedSignal>, AttentionStoreError>;

    /// Fetches a batch.
    async fn get_batch(&self, batch_id: i64) -> Result<Option<Batch>, AttentionStoreError>;

    /// Stores a batch summary.
    async fn store_batch_summary(&self, summary: BatchSummary)
        -> Result<(), AttentionStoreError>;

    /// Appends an escalation log entry. Returns the row id.
    async fn append_escalation(
        &self,
        entry: EscalationLogEntry,
    ) -> Result<i64, AttentionStoreError>;

    /// Returns the latest escalation level for an owner and signal
    /// type, NONE when there is none.
    async fn latest_escalation_level(
        &self,
        owner: &str,
        signal_type: &str,
    ) -> Result<EscalationLevel, AttentionStoreError>;

    /// Persists a routing decision record. Returns the row id.
    async fn persist_decision(&self, record: DecisionRecord)
        -> Result<i64, AttentionStoreError>;

    /// Persists a fail-closed queue entry. Returns the row id.
    async fn enqueue_fail_closed(
        &self,
        entry: FailClosedEntry,
    ) -> Result<i64, AttentionStoreError>;

    /// Lists fail-closed entries with `retry_at <= now`.
    async fn due_fail_closed(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, FailClosedEntry)>, AttentionStoreError>;

    /// Removes a fail-closed entry after reprocessing.
    async fn delete_fail_closed(&self, id: i64) -> Result<(), AttentionStoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    history: Vec<(i64, NotificationHistoryEntry)>,
    preferences: BTreeMap<String, OwnerPreferences>,
    deferred: Vec<(i64, DeferredSignal)>,
    batched: Vec<BatchedSignal>,
    batches: BTreeMap<i64, Batch>,
    batch_summaries: Vec<BatchSummary>,
    escalations: Vec<(i64, EscalationLogEntry)>,
    decisions: Vec<(i64, DecisionRecord)>,
    fail_closed: BTreeMap<i64, FailClosedEntry>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory attention store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryAttentionStore {
    inner: Mutex<Inner>,
}

impl InMemoryAttentionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all history rows, for test assertions.
    #[must_use]
    pub fn history(&self) -> Vec<NotificationHistoryEntry> {
        self.inner
            .lock()
            .unwrap()
            .history
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Returns all decision records, for test assertions.
    #[must_use]
    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.inner
            .lock()
            .unwrap()
            .decisions
            .iter()
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// Returns all deferred signals, for test assertions.
    #[must_use]
    pub fn deferred(&self) -> Vec<DeferredSignal> {
        self.inner
            .lock()
            .unwrap()
            .deferred
            .iter()
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// Returns stored batch summaries, for test assertions.
    #[must_use]
    pub fn batch_summaries(&self) -> Vec<BatchSummary> {
        self.inner.lock().unwrap().batch_summaries.clone()
    }
}

fn is_delivered_outcome(outcome: &str) -> bool {
    outcome.starts_with("NOTIFY") || outcome.starts_with("ESCALATE")
}

#[async_trait]
impl AttentionStore for InMemoryAttentionStore {
    async fn record_history(
        &self,
        entry: NotificationHistoryEntry,
    ) -> Result<i64, AttentionStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        inner.history.push((id, entry));
        Ok(id)
    }

    async fn count_recent_notifications(
        &self,
        owner: &str,
        channel: Channel,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<u32, AttentionStoreError> {
        let inner = self.inner.lock().unwrap();
        let count = inner
            .history
            .iter()
            .filter(|(_, e)| {
                e.owner == owner
                    && e.channel == Some(channel)
                    && e.created_at >= window_start
                    && e.created_at <= window_end
                    && is_delivered_outcome(&e.outcome)
            })
            .count();
        Ok(count as u32)
    }

    async fn find_recent_delivery(
        &self,
        owner: &str,
        signal_reference: &str,
        window_start: DateTime<Utc>,
    ) -> Result<Option<NotificationHistoryEntry>, AttentionStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .history
            .iter()
            .rev()
            .find(|(_, e)| {
                e.owner == owner
                    && e.signal_reference == signal_reference
                    && e.created_at >= window_start
                    && is_delivered_outcome(&e.outcome)
            })
            .map(|(_, e)| e.clone()))
    }

    async fn owner_preferences(
        &self,
        owner: &str,
    ) -> Result<Option<OwnerPreferences>, AttentionStoreError> {
        Ok(self.inner.lock().unwrap().preferences.get(owner).cloned())
    }

    async fn upsert_preferences(
        &self,
        preferences: OwnerPreferences,
    ) -> Result<(), AttentionStoreError> {
        self.inner
            .lock()
            .unwrap()
            .preferences
            .insert(preferences.owner.clone(), preferences);
        Ok(())
    }

    async fn enqueue_deferred(&self, signal: DeferredSignal) -> Result<i64, AttentionStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        inner.deferred.push((id, signal));
        Ok(id)
    }

    async fn enqueue_batched(
        &self,
        mut signal: BatchedSignal,
    ) -> Result<i64, AttentionStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        signal.id = id;
        inner.batched.push(signal);
        Ok(id)
    }

    async fn pending_batched(
        &self,
        owner: &str,
    ) -> Result<Vec<BatchedSignal>, AttentionStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .batched
            .iter()
            .filter(|s| s.owner == owner && s.batch_id.is_none())
            .cloned()
            .collect())
    }

    async fn create_batch(&self, mut batch: Batch) -> Result<i64, AttentionStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        batch.id = id;
        inner.batches.insert(id, batch);
        Ok(id)
    }

    async fn assign_to_batch(
        &self,
        batch_id: i64,
        signal_ids: &[i64],
    ) -> Result<(), AttentionStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.batches.contains_key(&batch_id) {
            return Err(AttentionStoreError::NotFound {
                entity: "batch",
                id: batch_id,
            });
        }
        for signal in inner.batched.iter_mut() {
            if signal_ids.contains(&signal.id) {
                signal.batch_id = Some(batch_id);
            }
        }
        Ok(())
    }

    async fn batch_signals(
        &self,
        batch_id: i64,
    ) -> Result<Vec<BatchedSignal>, AttentionStoreError> {
        let inner = self.inner.lock().unwrap();
        let mut signals: Vec<BatchedSignal> = inner
            .batched
            .iter()
            .filter(|s| s.batch_id == Some(batch_id))
            .cloned()
            .collect();
        signals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(signals)
    }

    async fn get_batch(&self, batch_id: i64) -> Result<Option<Batch>, AttentionStoreError> {
        Ok(self.inner.lock().unwrap().batches.get(&batch_id).cloned())
    }

    async fn store_batch_summary(
        &self,
        summary: BatchSummary,
    ) -> Result<(), AttentionStoreError> {
        self.inner.lock().unwrap().batch_summaries.push(summary);
        Ok(())
    }

    async fn append_escalation(
        &self,
        entry: EscalationLogEntry,
    ) -> Result<i64, AttentionStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        inner.escalations.push((id, entry));
        Ok(id)
    }

    async fn latest_escalation_level(
        &self,
        owner: &str,
        signal_type: &str,
    ) -> Result<EscalationLevel, AttentionStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .escalations
            .iter()
            .rev()
            .find(|(_, e)| e.owner == owner && e.signal_type == signal_type)
            .map(|(_, e)| e.level)
            .unwrap_or(EscalationLevel::None))
    }

    async fn persist_decision(
        &self,
        record: DecisionRecord,
    ) -> Result<i64, AttentionStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        inner.decisions.push((id, record));
        Ok(id)
    }

    async fn enqueue_fail_closed(
        &self,
        entry: FailClosedEntry,
    ) -> Result<i64, AttentionStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        inner.fail_closed.insert(id, entry);
        Ok(id)
    }

    async fn due_fail_closed(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, FailClosedEntry)>, AttentionStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .fail_closed
            .iter()
            .filter(|(_, e)| e.retry_at <= now)
            .map(|(id, e)| (*id, e.clone()))
            .collect())
    }

    async fn delete_fail_closed(&self, id: i64) -> Result<(), AttentionStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_closed.remove(&id).is_none() {
            return Err(AttentionStoreError::NotFound {
                entity: "fail_closed_entry",
                id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn history_counting_filters_outcome_and_window() {
        let store = InMemoryAttentionStore::new();
        for (outcome, age) in [
            ("NOTIFY:signal", 10),
            ("ESCALATE:signal", 20),
            ("LOG_ONLY", 5),
            ("NOTIFY:signal", 700),
        ] {
            store
                .record_history(NotificationHistoryEntry {
                    owner: "marion".to_string(),
                    signal_reference: format!("r{age}"),
                    signal_type: "status.update".to_string(),
                    outcome: outcome.to_string(),
                    channel: Some(Channel::Signal),
                    created_at: now() - chrono::Duration::seconds(age),
                })
                .await
                .expect("record");
        }

        let count = store
            .count_recent_notifications(
                "marion",
                Channel::Signal,
                now() - chrono::Duration::seconds(600),
                now(),
            )
            .await
            .expect("count");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn batch_assignment_flow() {
        let store = InMemoryAttentionStore::new();
        let env = crate::envelope::tests::envelope();
        let id1 = store
            .enqueue_batched(BatchedSignal::from_envelope(&env))
            .await
            .expect("enqueue");
        let id2 = store
            .enqueue_batched(BatchedSignal::from_envelope(&env))
            .await
            .expect("enqueue");

        assert_eq!(store.pending_batched("marion").await.expect("pending").len(), 2);

        let batch_id = store
            .create_batch(Batch {
                id: 0,
                owner: "marion".to_string(),
                batch_type: crate::history::BatchType::Daily,
                topic: None,
                category: None,
                scheduled_for: now(),
                created_at: now(),
            })
            .await
            .expect("create batch");
        store
            .assign_to_batch(batch_id, &[id1, id2])
            .await
            .expect("assign");

        assert!(store.pending_batched("marion").await.expect("pending").is_empty());
        assert_eq!(store.batch_signals(batch_id).await.expect("signals").len(), 2);
    }

    #[tokio::test]
    async fn fail_closed_queue_roundtrip() {
        let store = InMemoryAttentionStore::new();
        let env = crate::envelope::tests::envelope();
        let id = store
            .enqueue_fail_closed(FailClosedEntry {
                owner: "marion".to_string(),
                envelope: env,
                reason: "router_unavailable".to_string(),
                queued_at: now(),
                retry_at: now() + chrono::Duration::minutes(15),
            })
            .await
            .expect("enqueue");

        assert!(store.due_fail_closed(now()).await.expect("due").is_empty());
        let due = store
            .due_fail_closed(now() + chrono::Duration::minutes(20))
            .await
            .expect("due");
        assert_eq!(due.len(), 1);

        store.delete_fail_closed(id).await.expect("delete");
        assert!(store
            .due_fail_closed(now() + chrono::Duration::minutes(20))
            .await
            .expect("due")
            .is_empty());
    }

    #[tokio::test]
    async fn latest_escalation_level_defaults_to_none() {
        let store = InMemoryAttentionStore::new();
        assert_eq!(
            store
                .latest_escalation_level("marion", "commitment.missed")
                .await
                .expect("level"),
            EscalationLevel::None
        );

        store
            .append_escalation(EscalationLogEntry {
                owner: "marion".to_string(),
                signal_type: "commitment.missed".to_string(),
                signal_reference: "cmt_5".to_string(),
                trigger: "approaching_deadline".to_string(),
                level: EscalationLevel::Medium,
                timestamp: now(),
            })
            .await
            .expect("append");
        assert_eq!(
            store
                .latest_escalation_level("marion", "commitment.missed")
                .await
                .expect("level"),
            EscalationLevel::Medium
        );
    }
}
