//! Postgres repository for the attention store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minder_attention::error::AttentionStoreError;
use minder_attention::escalation::EscalationLevel;
use minder_attention::history::{
    Batch, BatchSummary, BatchType, BatchedSignal, DecisionRecord, DeferredSignal,
    EscalationLogEntry, FailClosedEntry, NotificationHistoryEntry,
};
use minder_attention::preferences::OwnerPreferences;
use minder_attention::store::AttentionStore;
use minder_attention::Channel;
use sqlx::{FromRow, PgPool};

use super::backend_reason;

/// Postgres-backed attention store.
pub struct PgAttentionStore {
    pool: PgPool,
}

impl PgAttentionStore {
    /// Creates a repository over the pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(err: sqlx::Error) -> AttentionStoreError {
    AttentionStoreError::Backend {
        reason: backend_reason(err),
    }
}

fn decode(reason: impl Into<String>) -> AttentionStoreError {
    AttentionStoreError::Backend {
        reason: reason.into(),
    }
}

fn batch_type_from(value: &str) -> Result<BatchType, AttentionStoreError> {
    match value {
        "daily" => Ok(BatchType::Daily),
        "weekly" => Ok(BatchType::Weekly),
        "topic" => Ok(BatchType::Topic),
        other => Err(decode(format!("unknown batch type '{other}'"))),
    }
}

#[derive(FromRow)]
struct HistoryRow {
    owner: String,
    signal_reference: String,
    signal_type: String,
    outcome: String,
    channel: Option<String>,
    created_at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_entry(self) -> NotificationHistoryEntry {
        NotificationHistoryEntry {
            owner: self.owner,
            signal_reference: self.signal_reference,
            signal_type: self.signal_type,
            outcome: self.outcome,
            channel: self.channel.as_deref().and_then(Channel::parse),
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct BatchedSignalRow {
    id: i64,
    owner: String,
    topic: Option<String>,
    category: Option<String>,
    signal_type: String,
    signal_reference: String,
    message: String,
    batch_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl BatchedSignalRow {
    fn into_signal(self) -> BatchedSignal {
        BatchedSignal {
            id: self.id,
            owner: self.owner,
            topic: self.topic,
            category: self.category,
            signal_type: self.signal_type,
            signal_reference: self.signal_reference,
            message: self.message,
            batch_id: self.batch_id,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct BatchRow {
    id: i64,
    owner: String,
    batch_type: String,
    topic: Option<String>,
    category: Option<String>,
    scheduled_for: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl BatchRow {
    fn into_batch(self) -> Result<Batch, AttentionStoreError> {
        Ok(Batch {
            id: self.id,
            owner: self.owner,
            batch_type: batch_type_from(&self.batch_type)?,
            topic: self.topic,
            category: self.category,
            scheduled_for: self.scheduled_for,
            created_at: self.created_at,
        })
    }
}

const BATCHED_SIGNAL_COLUMNS: &str =
    "id, owner, topic, category, signal_type, signal_reference, message, batch_id, created_at";

#[async_trait]
impl AttentionStore for PgAttentionStore {
    async fn record_history(
        &self,
        entry: NotificationHistoryEntry,
    ) -> Result<i64, AttentionStoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO attention_notification_history
                (owner, signal_reference, signal_type, outcome, channel, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&entry.owner)
        .bind(&entry.signal_reference)
        .bind(&entry.signal_type)
        .bind(&entry.outcome)
        .bind(entry.channel.map(|c| c.as_str().to_string()))
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(id)
    }

    async fn count_recent_notifications(
        &self,
        owner: &str,
        channel: Channel,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<u32, AttentionStoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM attention_notification_history
            WHERE owner = $1
              AND channel = $2
              AND created_at >= $3
              AND created_at <= $4
              AND (outcome LIKE 'NOTIFY%' OR outcome LIKE 'ESCALATE%')
            "#,
        )
        .bind(owner)
        .bind(channel.as_str())
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(count.max(0) as u32)
    }

    async fn find_recent_delivery(
        &self,
        owner: &str,
        signal_reference: &str,
        window_start: DateTime<Utc>,
    ) -> Result<Option<NotificationHistoryEntry>, AttentionStoreError> {
        let row: Option<HistoryRow> = sqlx::query_as(
            r#"
            SELECT owner, signal_reference, signal_type, outcome, channel, created_at
            FROM attention_notification_history
            WHERE owner = $1
              AND signal_reference = $2
              AND created_at >= $3
              AND (outcome LIKE 'NOTIFY%' OR outcome LIKE 'ESCALATE%')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner)
        .bind(signal_reference)
        .bind(window_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(HistoryRow::into_entry))
    }

    async fn owner_preferences(
        &self,
        owner: &str,
    ) -> Result<Option<OwnerPreferences>, AttentionStoreError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT preferences FROM attention_preferences WHERE owner = $1",
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|(value,)| {
            serde_json::from_value(value)
                .map_err(|e| decode(format!("invalid stored preferences: {e}")))
        })
        .transpose()
    }

    async fn upsert_preferences(
        &self,
        preferences: OwnerPreferences,
    ) -> Result<(), AttentionStoreError> {
        sqlx::query(
            r#"
            INSERT INTO attention_preferences (owner, preferences)
            VALUES ($1, $2)
            ON CONFLICT (owner) DO UPDATE SET preferences = EXCLUDED.preferences
            "#,
        )
        .bind(&preferences.owner)
        .bind(serde_json::to_value(&preferences).unwrap_or_default())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn enqueue_deferred(
        &self,
        signal: DeferredSignal,
    ) -> Result<i64, AttentionStoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO attention_deferred_signals
                (owner, signal_type, signal_reference, message, reason, deferred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&signal.owner)
        .bind(&signal.signal_type)
        .bind(&signal.signal_reference)
        .bind(&signal.message)
        .bind(&signal.reason)
        .bind(signal.deferred_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(id)
    }

    async fn enqueue_batched(
        &self,
        signal: BatchedSignal,
    ) -> Result<i64, AttentionStoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO attention_batched_signals
                (owner, topic, category, signal_type, signal_reference, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&signal.owner)
        .bind(&signal.topic)
        .bind(&signal.category)
        .bind(&signal.signal_type)
        .bind(&signal.signal_reference)
        .bind(&signal.message)
        .bind(signal.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(id)
    }

    async fn pending_batched(
        &self,
        owner: &str,
    ) -> Result<Vec<BatchedSignal>, AttentionStoreError> {
        let rows: Vec<BatchedSignalRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BATCHED_SIGNAL_COLUMNS}
            FROM attention_batched_signals
            WHERE owner = $1 AND batch_id IS NULL
            ORDER BY id
            "#
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(BatchedSignalRow::into_signal).collect())
    }

    async fn create_batch(&self, batch: Batch) -> Result<i64, AttentionStoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO attention_batches
                (owner, batch_type, topic, category, scheduled_for, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&batch.owner)
        .bind(batch.batch_type.as_str())
        .bind(&batch.topic)
        .bind(&batch.category)
        .bind(batch.scheduled_for)
        .bind(batch.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(id)
    }

    async fn assign_to_batch(
        &self,
        batch_id: i64,
        signal_ids: &[i64],
    ) -> Result<(), AttentionStoreError> {
        sqlx::query(
            "UPDATE attention_batched_signals SET batch_id = $1 WHERE id = ANY($2)",
        )
        .bind(batch_id)
        .bind(signal_ids)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn batch_signals(
        &self,
        batch_id: i64,
    ) -> Result<Vec<BatchedSignal>, AttentionStoreError> {
        let rows: Vec<BatchedSignalRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BATCHED_SIGNAL_COLUMNS}
            FROM attention_batched_signals
            WHERE batch_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(BatchedSignalRow::into_signal).collect())
    }

    async fn get_batch(&self, batch_id: i64) -> Result<Option<Batch>, AttentionStoreError> {
        let row: Option<BatchRow> = sqlx::query_as(
            r#"
            SELECT id, owner, batch_type, topic, category, scheduled_for, created_at
            FROM attention_batches
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(BatchRow::into_batch).transpose()
    }

    async fn store_batch_summary(
        &self,
        summary: BatchSummary,
    ) -> Result<(), AttentionStoreError> {
        sqlx::query(
            r#"
            INSERT INTO attention_batch_summaries
                (batch_id, summary, ranked_references, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(summary.batch_id)
        .bind(&summary.summary)
        .bind(serde_json::to_value(&summary.ranked_references).unwrap_or_default())
        .bind(summary.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn append_escalation(
        &self,
        entry: EscalationLogEntry,
    ) -> Result<i64, AttentionStoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO attention_escalation_logs
                (owner, signal_type, signal_reference, "trigger", level, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&entry.owner)
        .bind(&entry.signal_type)
        .bind(&entry.signal_reference)
        .bind(&entry.trigger)
        .bind(entry.level.as_i32())
        .bind(entry.timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(id)
    }

    async fn latest_escalation_level(
        &self,
        owner: &str,
        signal_type: &str,
    ) -> Result<EscalationLevel, AttentionStoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT level
            FROM attention_escalation_logs
            WHERE owner = $1 AND signal_type = $2
            ORDER BY occurred_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner)
        .bind(signal_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map_or(EscalationLevel::None, |(level,)| {
            EscalationLevel::from_i32(level)
        }))
    }

    async fn persist_decision(
        &self,
        record: DecisionRecord,
    ) -> Result<i64, AttentionStoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO attention_decision_records
                (signal_reference, owner, channel, base_assessment, policy_id,
                 final_decision, explanation, decided_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&record.signal_reference)
        .bind(&record.owner)
        .bind(record.channel.map(|c| c.as_str().to_string()))
        .bind(&record.base_assessment)
        .bind(&record.policy_id)
        .bind(&record.final_decision)
        .bind(&record.explanation)
        .bind(record.decided_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(id)
    }

    async fn enqueue_fail_closed(
        &self,
        entry: FailClosedEntry,
    ) -> Result<i64, AttentionStoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO attention_fail_closed_queue
                (owner, envelope, reason, queued_at, retry_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&entry.owner)
        .bind(serde_json::to_value(&entry.envelope).unwrap_or_default())
        .bind(&entry.reason)
        .bind(entry.queued_at)
        .bind(entry.retry_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(id)
    }

    async fn due_fail_closed(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, FailClosedEntry)>, AttentionStoreError> {
        #[derive(FromRow)]
        struct Row {
            id: i64,
            owner: String,
            envelope: serde_json::Value,
            reason: String,
            queued_at: DateTime<Utc>,
            retry_at: DateTime<Utc>,
        }

        let rows: Vec<Row> = sqlx::query_as(
            r#"
            SELECT id, owner, envelope, reason, queued_at, retry_at
            FROM attention_fail_closed_queue
            WHERE retry_at <= $1
            ORDER BY id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let envelope = serde_json::from_value(row.envelope)
                    .map_err(|e| decode(format!("invalid queued envelope: {e}")))?;
                Ok((
                    row.id,
                    FailClosedEntry {
                        owner: row.owner,
                        envelope,
                        reason: row.reason,
                        queued_at: row.queued_at,
                        retry_at: row.retry_at,
                    },
                ))
            })
            .collect()
    }

    async fn delete_fail_closed(&self, id: i64) -> Result<(), AttentionStoreError> {
        let result = sqlx::query("DELETE FROM attention_fail_closed_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(AttentionStoreError::NotFound {
                entity: "fail_closed_entry",
                id,
            });
        }
        Ok(())
    }
}
