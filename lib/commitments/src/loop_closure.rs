//! Loop-closure reply parsing and resolution.
//!
//! Replies to loop-closure prompts are parsed with keyword and date
//! matching into a structured intent. Ambiguous replies parse to
//! `None` and callers take no action; they never guess.

use chrono::{DateTime, NaiveDate, Utc};
use minder_core::{ActorKind, CommitmentId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::commitment::{CommitmentState, UpdateCommitment};
use crate::error::CommitmentError;
use crate::store::{CommitmentFilter, CommitmentStore};
use crate::transition::{TransitionOutcome, TransitionRequest, TransitionService};

const COMPLETE_KEYWORDS: &[&str] = &["complete", "done", "finished"];
const CANCEL_KEYWORDS: &[&str] = &["cancel", "canceled", "cancelled", "won't do", "wont do"];
const REVIEW_KEYWORDS: &[&str] = &["review"];

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})[-/](\d{2})[-/](\d{2})\b").unwrap());
static COMMITMENT_REF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bcmt_(\d+)\b").unwrap());

/// Structured intent extracted from a loop-closure reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum LoopClosureIntent {
    /// The commitment is done.
    Complete,
    /// The commitment is withdrawn.
    Cancel,
    /// The commitment gets a new due date.
    Renegotiate { new_due_by: NaiveDate },
    /// The commitment should go into the next review.
    Review,
}

/// Parses a loop-closure reply into a structured intent.
///
/// Keyword matches win over dates; replies with neither parse to
/// `None`.
#[must_use]
pub fn parse_loop_closure_reply(text: &str) -> Option<LoopClosureIntent> {
    let normalized = text.trim().to_lowercase().replace('\u{2019}', "'");
    if contains_keyword(&normalized, COMPLETE_KEYWORDS) {
        return Some(LoopClosureIntent::Complete);
    }
    if contains_keyword(&normalized, CANCEL_KEYWORDS) {
        return Some(LoopClosureIntent::Cancel);
    }
    if contains_keyword(&normalized, REVIEW_KEYWORDS) {
        return Some(LoopClosureIntent::Review);
    }
    extract_date(&normalized).map(|new_due_by| LoopClosureIntent::Renegotiate { new_due_by })
}

fn contains_keyword(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

fn extract_date(text: &str) -> Option<NaiveDate> {
    for capture in DATE_PATTERN.captures_iter(text) {
        let year = capture[1].parse().ok()?;
        let month = capture[2].parse().ok()?;
        let day = capture[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    None
}

/// An incoming loop-closure reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopClosureReply {
    /// The sender's identity.
    pub sender: String,
    /// The reply body.
    pub body: String,
    /// The signal reference the reply responds to, when known.
    pub signal_reference: Option<String>,
}

/// What the loop-closure service did with a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopClosureOutcome {
    /// The commitment completed.
    Completed(CommitmentId),
    /// The commitment was canceled.
    Canceled(CommitmentId),
    /// The commitment got a new due date (and reopened when missed).
    Renegotiated {
        commitment_id: CommitmentId,
        new_due_by: DateTime<Utc>,
    },
    /// The commitment was flagged for the next review.
    FlaggedForReview(CommitmentId),
    /// The reply was ambiguous or matched no commitment.
    NoAction,
}

/// Resolves loop-closure replies to commitments and applies intents.
pub struct LoopClosureService {
    store: Arc<dyn CommitmentStore>,
    transitions: Arc<TransitionService>,
}

impl LoopClosureService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn CommitmentStore>, transitions: Arc<TransitionService>) -> Self {
        Self { store, transitions }
    }

    /// Parses, resolves, and applies a reply.
    ///
    /// Ambiguous replies and unresolvable commitments produce
    /// `NoAction`; nothing is guessed.
    ///
    /// # Errors
    ///
    /// Returns storage errors from persistence and transition errors
    /// when the resolved commitment is in an incompatible state.
    pub async fn handle_reply(
        &self,
        reply: &LoopClosureReply,
        now: DateTime<Utc>,
    ) -> Result<LoopClosureOutcome, CommitmentError> {
        let Some(intent) = parse_loop_closure_reply(&reply.body) else {
            tracing::debug!(sender = %reply.sender, "ambiguous loop-closure reply");
            return Ok(LoopClosureOutcome::NoAction);
        };
        let Some(commitment_id) = self.resolve(reply).await? else {
            tracing::info!(sender = %reply.sender, "loop-closure reply matched no commitment");
            return Ok(LoopClosureOutcome::NoAction);
        };

        match intent {
            LoopClosureIntent::Complete => {
                self.apply_transition(commitment_id, CommitmentState::Completed, &reply.sender)
                    .await?;
                Ok(LoopClosureOutcome::Completed(commitment_id))
            }
            LoopClosureIntent::Cancel => {
                self.apply_transition(commitment_id, CommitmentState::Canceled, &reply.sender)
                    .await?;
                Ok(LoopClosureOutcome::Canceled(commitment_id))
            }
            LoopClosureIntent::Renegotiate { new_due_by } => {
                let new_due_by = new_due_by
                    .and_hms_opt(17, 0, 0)
                    .map(|dt| dt.and_utc())
                    .ok_or_else(|| CommitmentError::validation("invalid renegotiated date"))?;
                let mut commitment = self
                    .store
                    .get_commitment(commitment_id)
                    .await?
                    .ok_or(CommitmentError::NotFound {
                        entity: "commitment",
                        id: commitment_id.as_i64(),
                    })?;
                if commitment.state == CommitmentState::Missed {
                    self.apply_transition(commitment_id, CommitmentState::Open, &reply.sender)
                        .await?;
                    commitment = self
                        .store
                        .get_commitment(commitment_id)
                        .await?
                        .ok_or(CommitmentError::NotFound {
                            entity: "commitment",
                            id: commitment_id.as_i64(),
                        })?;
                }
                commitment.apply_update(
                    UpdateCommitment {
                        due_by: Some(Some(new_due_by)),
                        ..UpdateCommitment::default()
                    },
                    now,
                )?;
                self.store.update_commitment(&commitment).await?;
                Ok(LoopClosureOutcome::Renegotiated {
                    commitment_id,
                    new_due_by,
                })
            }
            LoopClosureIntent::Review => {
                let mut commitment = self
                    .store
                    .get_commitment(commitment_id)
                    .await?
                    .ok_or(CommitmentError::NotFound {
                        entity: "commitment",
                        id: commitment_id.as_i64(),
                    })?;
                commitment.reviewed_at = None;
                commitment.updated_at = now;
                self.store.update_commitment(&commitment).await?;
                Ok(LoopClosureOutcome::FlaggedForReview(commitment_id))
            }
        }
    }

    async fn apply_transition(
        &self,
        commitment_id: CommitmentId,
        to_state: CommitmentState,
        sender: &str,
    ) -> Result<(), CommitmentError> {
        let outcome = self
            .transitions
            .transition(TransitionRequest {
                commitment_id,
                to_state,
                actor: ActorKind::Human,
                actor_id: sender.to_string(),
                reason: "loop_closure_reply".to_string(),
                context: None,
                confidence: None,
                provenance: None,
            })
            .await?;
        debug_assert!(matches!(outcome, TransitionOutcome::Applied { .. }));
        Ok(())
    }

    /// Resolves the commitment a reply refers to: the explicit signal
    /// reference, then in-body reference ids, then the sender's latest
    /// unresolved commitment.
    async fn resolve(
        &self,
        reply: &LoopClosureReply,
    ) -> Result<Option<CommitmentId>, CommitmentError> {
        if let Some(reference) = &reply.signal_reference {
            if let Some(capture) = COMMITMENT_REF_PATTERN.captures(reference) {
                if let Ok(id) = capture[1].parse::<i64>() {
                    return Ok(Some(CommitmentId::from_i64(id)));
                }
            }
        }
        if let Some(capture) = COMMITMENT_REF_PATTERN.captures(&reply.body) {
            if let Ok(id) = capture[1].parse::<i64>() {
                return Ok(Some(CommitmentId::from_i64(id)));
            }
        }

        // Fall back to the sender's latest unresolved commitment:
        // missed first, then open.
        for state in [CommitmentState::Missed, CommitmentState::Open] {
            let mut candidates = self
                .store
                .list_commitments(CommitmentFilter {
                    owner: Some(reply.sender.clone()),
                    state: Some(state),
                })
                .await?;
            candidates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            if let Some(latest) = candidates.first() {
                return Ok(Some(latest.id));
            }
        }
        Ok(None)
    }
}
