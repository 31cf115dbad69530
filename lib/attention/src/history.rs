//! Persisted attention records: notification history, deferred and
//! batched signals, batches, escalation logs, decision records, and
//! fail-closed queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::envelope::RoutingEnvelope;
use crate::escalation::EscalationLevel;

/// One routed signal, as consumed by rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationHistoryEntry {
    /// The owner the signal was for.
    pub owner: String,
    /// Stable reference of the signal.
    pub signal_reference: String,
    /// The signal type.
    pub signal_type: String,
    /// Rendered outcome string (`NOTIFY:signal`, `LOG_ONLY`, ...).
    pub outcome: String,
    /// The channel delivered on, when delivered.
    pub channel: Option<Channel>,
    /// When the decision was made.
    pub created_at: DateTime<Utc>,
}

/// A deferred signal held for later review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredSignal {
    /// The owner the signal is for.
    pub owner: String,
    /// The signal type.
    pub signal_type: String,
    /// Stable reference of the signal.
    pub signal_reference: String,
    /// Deliverable body.
    pub message: String,
    /// Why the signal was deferred.
    pub reason: String,
    /// When it was deferred.
    pub deferred_at: DateTime<Utc>,
}

/// A signal in the batching holding area, keyed by owner, topic, and
/// category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchedSignal {
    /// Store-assigned id, zero before insertion.
    pub id: i64,
    /// The owner the signal is for.
    pub owner: String,
    /// Batching topic.
    pub topic: Option<String>,
    /// Batching category.
    pub category: Option<String>,
    /// The signal type.
    pub signal_type: String,
    /// Stable reference of the signal.
    pub signal_reference: String,
    /// Deliverable body.
    pub message: String,
    /// The batch the signal was assigned to, once materialized.
    pub batch_id: Option<i64>,
    /// When the signal entered the holding area.
    pub created_at: DateTime<Utc>,
}

impl BatchedSignal {
    /// Builds a holding-area entry from an envelope.
    #[must_use]
    pub fn from_envelope(envelope: &RoutingEnvelope) -> Self {
        // Topic is the signal-type prefix before the first dot.
        let topic = envelope
            .signal_type
            .split('.')
            .next()
            .map(ToString::to_string);
        Self {
            id: 0,
            owner: envelope.owner.clone(),
            topic,
            category: Some(envelope.content_type.clone()),
            signal_type: envelope.signal_type.clone(),
            signal_reference: envelope.signal_reference.clone(),
            message: envelope
                .signal_payload
                .as_ref()
                .map(|p| p.message.clone())
                .unwrap_or_else(|| envelope.signal_reference.clone()),
            batch_id: None,
            created_at: envelope.timestamp,
        }
    }
}

/// How a batch is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    Daily,
    Weekly,
    Topic,
}

impl BatchType {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Topic => "topic",
        }
    }
}

/// A materialized batch of held signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Store-assigned id, zero before insertion.
    pub id: i64,
    /// The owner the batch is for.
    pub owner: String,
    /// How the batch was scheduled.
    pub batch_type: BatchType,
    /// Topic, for topic batches.
    pub topic: Option<String>,
    /// Category, for topic batches.
    pub category: Option<String>,
    /// When the batch was scheduled for.
    pub scheduled_for: DateTime<Utc>,
    /// When the batch row was created.
    pub created_at: DateTime<Utc>,
}

/// Stored summary and ranking of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// The summarized batch.
    pub batch_id: i64,
    /// Summary text.
    pub summary: String,
    /// Signal references in rank order, most recent first.
    pub ranked_references: Vec<String>,
    /// When the summary was produced.
    pub created_at: DateTime<Utc>,
}

/// One escalation decision, persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationLogEntry {
    /// The owner the signal was for.
    pub owner: String,
    /// The signal type.
    pub signal_type: String,
    /// Stable reference of the signal.
    pub signal_reference: String,
    /// Which rule triggered the escalation.
    pub trigger: String,
    /// The level escalated to.
    pub level: EscalationLevel,
    /// When the escalation was decided.
    pub timestamp: DateTime<Utc>,
}

/// A persisted routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Stable reference of the signal.
    pub signal_reference: String,
    /// The owner the signal was for.
    pub owner: String,
    /// Channel delivered on, when delivered.
    pub channel: Option<Channel>,
    /// The base assessment the pipeline started from.
    pub base_assessment: String,
    /// The matched policy id, when one matched.
    pub policy_id: Option<String>,
    /// The final rendered decision.
    pub final_decision: String,
    /// Why the pipeline decided as it did.
    pub explanation: String,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// An outbound signal persisted while failing closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailClosedEntry {
    /// The owner the signal is for.
    pub owner: String,
    /// The envelope that could not be routed.
    pub envelope: RoutingEnvelope,
    /// Why the router failed closed.
    pub reason: String,
    /// When the entry was queued.
    pub queued_at: DateTime<Utc>,
    /// When the entry becomes eligible for reprocessing.
    pub retry_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batched_signal_from_envelope_derives_topic() {
        let env = crate::envelope::tests::envelope();
        let signal = BatchedSignal::from_envelope(&env);
        assert_eq!(signal.topic.as_deref(), Some("status"));
        assert_eq!(signal.owner, "marion");
        assert_eq!(signal.message, "Heads up");
        assert!(signal.batch_id.is_none());
    }

    #[test]
    fn batched_signal_without_payload_falls_back_to_reference() {
        let mut env = crate::envelope::tests::envelope();
        env.signal_payload = None;
        let signal = BatchedSignal::from_envelope(&env);
        assert_eq!(signal.message, env.signal_reference);
    }

    #[test]
    fn batch_type_strings() {
        assert_eq!(BatchType::Daily.as_str(), "daily");
        assert_eq!(BatchType::Weekly.as_str(), "weekly");
        assert_eq!(BatchType::Topic.as_str(), "topic");
    }
}
