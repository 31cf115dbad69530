//! Weekly review aggregation and loop-closure delivery.
//!
//! Aggregates commitments completed, missed, and modified since the
//! previous review run, plus open items without a due-by, composes a
//! narrative, and delivers it through the router. Engagement stamps
//! `reviewed_at` on the included commitments. Review preparation also
//! scans the OPEN set pairwise for duplicates through the similarity
//! judge; flagged pairs ride along in the summary.

use chrono::{DateTime, Duration, Utc};
use minder_ai::SimilarityScorer;
use minder_attention::{NotificationDescriptor, ProvenanceInput, RoutingEnvelope, SignalPayload};
use minder_core::{Clock, CommitmentId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::commitment::{Commitment, CommitmentState};
use crate::error::CommitmentError;
use crate::notifications::NotificationSubmitter;
use crate::proposals::cap_words;
use crate::store::{CommitmentFilter, CommitmentStore};

/// A potential duplicate pair identified during review preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDedupePair {
    /// The earlier commitment of the pair.
    pub primary: CommitmentId,
    /// Its description.
    pub primary_description: String,
    /// The later commitment of the pair.
    pub secondary: CommitmentId,
    /// Its description, word-capped for the narrative.
    pub secondary_summary: String,
    /// The judged similarity.
    pub confidence: f64,
    /// The threshold the confidence was compared against.
    pub threshold: f64,
}

/// Configuration for the review-time duplicate scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewDedupeConfig {
    /// Similarity cutoff above which a pair is flagged.
    pub threshold: f64,
    /// Word cap on pair summaries.
    pub summary_word_cap: usize,
}

impl Default for ReviewDedupeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            summary_word_cap: 40,
        }
    }
}

/// The structured weekly review summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    /// The owner reviewed.
    pub owner: String,
    /// Start of the aggregation window.
    pub since: DateTime<Utc>,
    /// Commitments completed in the window.
    pub completed: Vec<CommitmentId>,
    /// Commitments missed in the window.
    pub missed: Vec<CommitmentId>,
    /// Open commitments modified in the window.
    pub modified: Vec<CommitmentId>,
    /// Open commitments without a due-by.
    pub open_without_due_by: Vec<CommitmentId>,
    /// Potential duplicate pairs among OPEN commitments.
    pub duplicates: Vec<ReviewDedupePair>,
    /// The composed narrative.
    pub narrative: String,
}

/// Runs the weekly review.
pub struct WeeklyReviewService {
    store: Arc<dyn CommitmentStore>,
    submitter: Arc<dyn NotificationSubmitter>,
    clock: Arc<dyn Clock>,
    similarity: Option<Arc<dyn SimilarityScorer>>,
    dedupe_config: ReviewDedupeConfig,
}

impl WeeklyReviewService {
    /// Creates the service. Without a similarity judge the duplicate
    /// scan is skipped.
    #[must_use]
    pub fn new(
        store: Arc<dyn CommitmentStore>,
        submitter: Arc<dyn NotificationSubmitter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            submitter,
            clock,
            similarity: None,
            dedupe_config: ReviewDedupeConfig::default(),
        }
    }

    /// Enables the review-time duplicate scan.
    #[must_use]
    pub fn with_dedupe(
        mut self,
        similarity: Arc<dyn SimilarityScorer>,
        config: ReviewDedupeConfig,
    ) -> Self {
        self.similarity = Some(similarity);
        self.dedupe_config = config;
        self
    }

    /// Aggregates, composes, delivers, and stamps the review.
    ///
    /// # Errors
    ///
    /// Returns storage errors from persistence and submission errors
    /// from the router path.
    pub async fn run_review(&self, owner: &str) -> Result<ReviewSummary, CommitmentError> {
        let now = self.clock.now();
        let since = self
            .store
            .last_review_run(owner)
            .await?
            .unwrap_or(now - Duration::days(7));

        let all = self
            .store
            .list_commitments(CommitmentFilter {
                owner: Some(owner.to_string()),
                state: None,
            })
            .await?;

        let mut completed = Vec::new();
        let mut missed = Vec::new();
        let mut modified = Vec::new();
        let mut open_without_due_by = Vec::new();
        let mut included: Vec<Commitment> = Vec::new();

        for commitment in all {
            let in_window = commitment.updated_at >= since;
            let include = match commitment.state {
                CommitmentState::Completed if in_window => {
                    completed.push(commitment.id);
                    true
                }
                CommitmentState::Missed if in_window => {
                    missed.push(commitment.id);
                    true
                }
                CommitmentState::Open => {
                    let mut include = false;
                    if in_window {
                        modified.push(commitment.id);
                        include = true;
                    }
                    if commitment.due_by.is_none() {
                        open_without_due_by.push(commitment.id);
                        include = true;
                    }
                    include
                }
                _ => false,
            };
            if include {
                included.push(commitment);
            }
        }

        let duplicates = self.scan_duplicates(owner).await?;

        let narrative = compose_narrative(
            owner,
            completed.len(),
            missed.len(),
            modified.len(),
            &included,
            &duplicates,
        );
        let summary = ReviewSummary {
            owner: owner.to_string(),
            since,
            completed,
            missed,
            modified,
            open_without_due_by,
            duplicates,
            narrative,
        };

        self.submitter
            .submit(review_envelope(&summary, now))
            .await?;

        for mut commitment in included {
            commitment.reviewed_at = Some(now);
            commitment.updated_at = now;
            self.store.update_commitment(&commitment).await?;
        }
        self.store.record_review_run(owner, now).await?;
        Ok(summary)
    }

    /// Compares the owner's OPEN commitments pairwise through the
    /// similarity judge; pairs at or above the threshold are flagged.
    ///
    /// The judgment is advisory: a failed comparison skips the pair
    /// rather than failing the review, and fewer than two OPEN
    /// commitments skip the scan entirely.
    async fn scan_duplicates(
        &self,
        owner: &str,
    ) -> Result<Vec<ReviewDedupePair>, CommitmentError> {
        let Some(similarity) = &self.similarity else {
            return Ok(Vec::new());
        };
        let open = self
            .store
            .list_commitments(CommitmentFilter {
                owner: Some(owner.to_string()),
                state: Some(CommitmentState::Open),
            })
            .await?;
        if open.len() < 2 {
            return Ok(Vec::new());
        }

        let mut pairs = Vec::new();
        for (index, primary) in open.iter().enumerate() {
            for secondary in &open[index + 1..] {
                let score = match similarity
                    .similarity(&primary.description, &secondary.description)
                    .await
                {
                    Ok(score) => score,
                    Err(err) => {
                        tracing::warn!(
                            primary = primary.id.as_i64(),
                            secondary = secondary.id.as_i64(),
                            error = %err,
                            "review dedupe comparison failed"
                        );
                        continue;
                    }
                };
                if score < self.dedupe_config.threshold {
                    continue;
                }
                pairs.push(ReviewDedupePair {
                    primary: primary.id,
                    primary_description: primary.description.clone(),
                    secondary: secondary.id,
                    secondary_summary: cap_words(
                        &secondary.description,
                        self.dedupe_config.summary_word_cap,
                    ),
                    confidence: score,
                    threshold: self.dedupe_config.threshold,
                });
            }
        }
        Ok(pairs)
    }
}

fn compose_narrative(
    owner: &str,
    completed: usize,
    missed: usize,
    modified: usize,
    included: &[Commitment],
    duplicates: &[ReviewDedupePair],
) -> String {
    let mut lines = vec![format!(
        "Weekly review for {owner}: {completed} completed, {missed} missed, {modified} touched."
    )];
    let mut undated: Vec<&Commitment> = included
        .iter()
        .filter(|c| c.state == CommitmentState::Open && c.due_by.is_none())
        .collect();
    undated.sort_by(|a, b| b.urgency.cmp(&a.urgency));
    if !undated.is_empty() {
        lines.push("Open with no deadline:".to_string());
        for commitment in undated {
            lines.push(format!("- {} ({})", commitment.description, commitment.id));
        }
    }
    if !duplicates.is_empty() {
        lines.push("Possible duplicates:".to_string());
        for pair in duplicates {
            lines.push(format!(
                "- {} ({}) looks like \"{}\" ({})",
                pair.primary_description, pair.primary, pair.secondary_summary, pair.secondary
            ));
        }
    }
    lines.join("\n")
}

fn review_envelope(summary: &ReviewSummary, now: DateTime<Utc>) -> RoutingEnvelope {
    let provenance: Vec<ProvenanceInput> = summary
        .completed
        .iter()
        .chain(&summary.missed)
        .chain(&summary.modified)
        .chain(&summary.open_without_due_by)
        .map(|id| ProvenanceInput::new("commitment", id.to_string()))
        .collect();
    let provenance = if provenance.is_empty() {
        vec![ProvenanceInput::new(
            "review",
            format!("review:{}", summary.owner),
        )]
    } else {
        provenance
    };
    RoutingEnvelope {
        version: minder_attention::envelope::ENVELOPE_VERSION,
        signal_type: "review.weekly".to_string(),
        signal_reference: format!("review.weekly:{}:{}", summary.owner, now.timestamp()),
        actor: "system".to_string(),
        owner: summary.owner.clone(),
        channel_hint: None,
        urgency: 0.4,
        channel_cost: 0.5,
        content_type: "analysis".to_string(),
        timestamp: now,
        signal_payload: Some(SignalPayload {
            from: "minder".to_string(),
            to: summary.owner.clone(),
            message: summary.narrative.clone(),
        }),
        notification: Some(NotificationDescriptor::new(
            "weekly_review",
            format!("review.weekly:{}", summary.owner),
            1.0,
            provenance,
        )),
        escalation: Default::default(),
        metadata: None,
    }
}
