//! Batch materialization, summarization, and digest delivery.
//!
//! Deferred-for-batching signals sit in a holding area keyed by owner,
//! topic, and category. A scheduled task materializes them into daily,
//! weekly, or per-topic batches, stores a summary with per-item ranks,
//! and delivers the digest back through the router pipeline. The digest
//! envelope is tagged with its origin so it can never re-enter the
//! holding area.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use minder_core::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::channel::Channel;
use crate::envelope::{NotificationDescriptor, ProvenanceInput, RoutingEnvelope, SignalPayload};
use crate::error::RouterError;
use crate::history::{Batch, BatchSummary, BatchType, BatchedSignal};
use crate::router::{AttentionRouter, RoutingOutcome};
use crate::store::AttentionStore;

/// When batches materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchScheduleConfig {
    /// Time of day the daily batch materializes, UTC.
    pub daily_time: Option<NaiveTime>,
    /// Weekday the weekly batch materializes.
    pub weekly_day: Option<Weekday>,
    /// Time of day the weekly batch materializes, UTC.
    pub weekly_time: Option<NaiveTime>,
}

/// Result of a materialization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCreationResult {
    /// Batches created this pass.
    pub batch_ids: Vec<i64>,
}

/// Result of summarizing one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummaryResult {
    /// The summarized batch.
    pub batch_id: i64,
    /// The stored summary text.
    pub summary: String,
    /// Signal references in rank order.
    pub ranked_references: Vec<String>,
}

/// Materializes, summarizes, and delivers batches.
pub struct BatchingService {
    store: Arc<dyn AttentionStore>,
    router: Arc<AttentionRouter>,
    clock: Arc<dyn Clock>,
}

impl BatchingService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn AttentionStore>,
        router: Arc<AttentionRouter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            router,
            clock,
        }
    }

    /// Materializes due batches for an owner: the daily batch when its
    /// time has passed, the weekly batch on its day, and a topic batch
    /// per distinct (topic, category) key in the holding area.
    ///
    /// # Errors
    ///
    /// Returns a router error when the holding area cannot be read or
    /// written.
    pub async fn materialize_batches(
        &self,
        owner: &str,
        config: &BatchScheduleConfig,
    ) -> Result<BatchCreationResult, RouterError> {
        let now = self.clock.now();
        let pending = self.store.pending_batched(owner).await?;
        if pending.is_empty() {
            return Ok(BatchCreationResult {
                batch_ids: Vec::new(),
            });
        }

        let mut batch_ids = Vec::new();
        if let Some(daily_time) = config.daily_time {
            if now.time() >= daily_time {
                let ids: Vec<i64> = pending.iter().map(|s| s.id).collect();
                let batch_id = self
                    .create_and_assign(owner, BatchType::Daily, None, None, now, &ids)
                    .await?;
                batch_ids.push(batch_id);
                return Ok(BatchCreationResult { batch_ids });
            }
        }
        if let (Some(weekly_day), Some(weekly_time)) = (config.weekly_day, config.weekly_time) {
            if now.weekday() == weekly_day && now.time() >= weekly_time {
                let ids: Vec<i64> = pending.iter().map(|s| s.id).collect();
                let batch_id = self
                    .create_and_assign(owner, BatchType::Weekly, None, None, now, &ids)
                    .await?;
                batch_ids.push(batch_id);
                return Ok(BatchCreationResult { batch_ids });
            }
        }

        // Topic batches: one per distinct (topic, category) key.
        let mut by_key: BTreeMap<(String, String), Vec<i64>> = BTreeMap::new();
        for signal in &pending {
            let key = (
                signal.topic.clone().unwrap_or_default(),
                signal.category.clone().unwrap_or_default(),
            );
            by_key.entry(key).or_default().push(signal.id);
        }
        for ((topic, category), ids) in by_key {
            let batch_id = self
                .create_and_assign(
                    owner,
                    BatchType::Topic,
                    Some(topic),
                    Some(category),
                    now,
                    &ids,
                )
                .await?;
            batch_ids.push(batch_id);
        }
        Ok(BatchCreationResult { batch_ids })
    }

    /// Summarizes a batch: stores summary text and ranked items.
    ///
    /// # Errors
    ///
    /// Returns a router error when the batch is missing or persistence
    /// fails.
    pub async fn summarize_batch(&self, batch_id: i64) -> Result<BatchSummaryResult, RouterError> {
        let Some(batch) = self.store.get_batch(batch_id).await? else {
            return Err(RouterError::Storage {
                reason: format!("batch not found: {batch_id}"),
            });
        };
        let signals = self.store.batch_signals(batch_id).await?;
        let summary = build_summary(&batch, &signals);
        let ranked_references: Vec<String> = signals
            .iter()
            .map(|s| s.signal_reference.clone())
            .collect();
        self.store
            .store_batch_summary(BatchSummary {
                batch_id,
                summary: summary.clone(),
                ranked_references: ranked_references.clone(),
                created_at: self.clock.now(),
            })
            .await?;
        Ok(BatchSummaryResult {
            batch_id,
            summary,
            ranked_references,
        })
    }

    /// Delivers a summarized batch as a digest through the router.
    ///
    /// # Errors
    ///
    /// Returns a router error when the pipeline fails.
    pub async fn deliver_batch(
        &self,
        batch_id: i64,
        summary: &BatchSummaryResult,
    ) -> Result<RoutingOutcome, RouterError> {
        let Some(batch) = self.store.get_batch(batch_id).await? else {
            return Err(RouterError::Storage {
                reason: format!("batch not found: {batch_id}"),
            });
        };
        let provenance: Vec<ProvenanceInput> = summary
            .ranked_references
            .iter()
            .map(|reference| ProvenanceInput::new("batched_signal", reference.clone()))
            .collect();
        let provenance = if provenance.is_empty() {
            vec![ProvenanceInput::new(
                "batch",
                format!("batch_{batch_id}"),
            )]
        } else {
            provenance
        };
        let now = self.clock.now();
        let envelope = RoutingEnvelope {
            version: crate::envelope::ENVELOPE_VERSION,
            signal_type: "digest.ready".to_string(),
            signal_reference: format!("digest:batch_{batch_id}"),
            actor: "system".to_string(),
            owner: batch.owner.clone(),
            channel_hint: Some(Channel::Digest),
            urgency: 0.3,
            channel_cost: 0.1,
            content_type: "digest".to_string(),
            timestamp: now,
            signal_payload: Some(SignalPayload {
                from: "minder".to_string(),
                to: batch.owner.clone(),
                message: summary.summary.clone(),
            }),
            notification: Some(NotificationDescriptor::new(
                "attention_batching",
                format!("batch_{batch_id}"),
                1.0,
                provenance,
            )),
            escalation: Default::default(),
            metadata: None,
        };
        self.router.route(&envelope).await
    }

    async fn create_and_assign(
        &self,
        owner: &str,
        batch_type: BatchType,
        topic: Option<String>,
        category: Option<String>,
        now: DateTime<Utc>,
        signal_ids: &[i64],
    ) -> Result<i64, RouterError> {
        let batch_id = self
            .store
            .create_batch(Batch {
                id: 0,
                owner: owner.to_string(),
                batch_type,
                topic,
                category,
                scheduled_for: now,
                created_at: now,
            })
            .await?;
        self.store.assign_to_batch(batch_id, signal_ids).await?;
        tracing::info!(
            owner,
            batch_id,
            batch_type = batch_type.as_str(),
            signals = signal_ids.len(),
            "batch materialized"
        );
        Ok(batch_id)
    }
}

fn build_summary(batch: &Batch, signals: &[BatchedSignal]) -> String {
    let topic_label = match (&batch.topic, &batch.category) {
        (Some(topic), Some(category)) if !topic.is_empty() => format!(" ({topic}/{category})"),
        (Some(topic), None) if !topic.is_empty() => format!(" ({topic})"),
        _ => String::new(),
    };
    format!("Batch {}{}: {} items.", batch.id, topic_label, signals.len())
}
