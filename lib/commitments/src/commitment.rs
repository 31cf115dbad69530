//! Commitment entities and the urgency score.

use chrono::{DateTime, Utc};
use minder_core::{CommitmentId, ScheduleId};
use serde::{Deserialize, Serialize};

use crate::error::CommitmentError;

/// Horizon over which time pressure ramps from 0 to 1.
const URGENCY_HORIZON_SECONDS: f64 = 14.0 * 86_400.0;
/// Baseline time pressure for commitments without a due-by.
const NO_DUE_BY_PRESSURE: f64 = 0.25;
/// Urgency weights: time pressure dominates, importance second, small
/// effort gives a quick-win boost.
const WEIGHT_TIME_PRESSURE: f64 = 0.5;
const WEIGHT_IMPORTANCE: f64 = 0.35;
const WEIGHT_EFFORT: f64 = 0.15;

/// Commitment lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitmentState {
    Open,
    Completed,
    Missed,
    Canceled,
}

impl CommitmentState {
    /// Returns true for sink states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// Returns whether a transition to `target` is legal.
    ///
    /// `OPEN` may complete, miss, or cancel; `MISSED` may only reopen;
    /// terminal states are sinks.
    #[must_use]
    pub fn can_transition_to(&self, target: CommitmentState) -> bool {
        match (self, target) {
            (Self::Open, Self::Completed)
            | (Self::Open, Self::Missed)
            | (Self::Open, Self::Canceled)
            | (Self::Missed, Self::Open) => true,
            _ => false,
        }
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Completed => "COMPLETED",
            Self::Missed => "MISSED",
            Self::Canceled => "CANCELED",
        }
    }
}

/// A user-made promise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    /// Store-assigned identifier.
    pub id: CommitmentId,
    /// The owner the commitment belongs to.
    pub owner: String,
    /// What was promised.
    pub description: String,
    /// Lifecycle state.
    pub state: CommitmentState,
    /// Importance, 1 (low) to 3 (high).
    pub importance: u8,
    /// Effort, 1 (small) to 3 (large).
    pub effort: u8,
    /// Optional due-by instant.
    pub due_by: Option<DateTime<Utc>>,
    /// Computed urgency in [1, 100].
    pub urgency: u8,
    /// Where the commitment came from.
    pub provenance_reference: Option<String>,
    /// The schedule currently linked for reminders, when any.
    pub next_schedule_id: Option<ScheduleId>,
    /// When progress was last recorded.
    pub last_progress_at: Option<DateTime<Utc>>,
    /// The first time the commitment was ever missed.
    pub ever_missed_at: Option<DateTime<Utc>>,
    /// When the commitment was last included in a review.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a commitment. Importance and effort default to 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommitment {
    /// The owner the commitment belongs to.
    pub owner: String,
    /// What is promised.
    pub description: String,
    /// Importance, 1 to 3.
    pub importance: u8,
    /// Effort, 1 to 3.
    pub effort: u8,
    /// Optional due-by instant.
    pub due_by: Option<DateTime<Utc>>,
    /// Where the commitment came from.
    pub provenance_reference: Option<String>,
}

impl NewCommitment {
    /// Creates an input with default importance and effort.
    #[must_use]
    pub fn new(owner: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            description: description.into(),
            importance: 2,
            effort: 2,
            due_by: None,
            provenance_reference: None,
        }
    }

    /// Sets the due-by instant.
    #[must_use]
    pub fn with_due_by(mut self, due_by: DateTime<Utc>) -> Self {
        self.due_by = Some(due_by);
        self
    }

    /// Sets importance and effort.
    #[must_use]
    pub fn with_weights(mut self, importance: u8, effort: u8) -> Self {
        self.importance = importance;
        self.effort = effort;
        self
    }

    /// Validates the input ranges.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty description or
    /// out-of-range importance/effort.
    pub fn validate(&self) -> Result<(), CommitmentError> {
        if self.description.trim().is_empty() {
            return Err(CommitmentError::validation("description is required"));
        }
        if !(1..=3).contains(&self.importance) {
            return Err(CommitmentError::validation("importance must be 1, 2, or 3"));
        }
        if !(1..=3).contains(&self.effort) {
            return Err(CommitmentError::validation("effort must be 1, 2, or 3"));
        }
        Ok(())
    }
}

/// Partial update of a commitment's attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateCommitment {
    /// New description.
    pub description: Option<String>,
    /// New importance.
    pub importance: Option<u8>,
    /// New effort.
    pub effort: Option<u8>,
    /// New due-by; `Some(None)` clears it.
    pub due_by: Option<Option<DateTime<Utc>>>,
}

impl Commitment {
    /// Applies an update, recomputing urgency when importance, effort,
    /// or due-by changed.
    ///
    /// # Errors
    ///
    /// Returns a validation error for out-of-range attributes.
    pub fn apply_update(
        &mut self,
        update: UpdateCommitment,
        now: DateTime<Utc>,
    ) -> Result<(), CommitmentError> {
        let mut urgency_inputs_changed = false;
        if let Some(description) = update.description {
            if description.trim().is_empty() {
                return Err(CommitmentError::validation("description is required"));
            }
            self.description = description;
        }
        if let Some(importance) = update.importance {
            if !(1..=3).contains(&importance) {
                return Err(CommitmentError::validation("importance must be 1, 2, or 3"));
            }
            self.importance = importance;
            urgency_inputs_changed = true;
        }
        if let Some(effort) = update.effort {
            if !(1..=3).contains(&effort) {
                return Err(CommitmentError::validation("effort must be 1, 2, or 3"));
            }
            self.effort = effort;
            urgency_inputs_changed = true;
        }
        if let Some(due_by) = update.due_by {
            self.due_by = due_by;
            urgency_inputs_changed = true;
        }
        if urgency_inputs_changed {
            self.urgency = compute_urgency(self.importance, self.effort, self.due_by, now);
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Computes the urgency score in [1, 100].
///
/// Deterministic in its inputs. Time pressure ramps linearly over a
/// 14-day horizon and clamps to 1.0 once overdue; commitments without
/// a due-by sit at a 0.25 baseline. Importance raises urgency; small
/// effort raises it slightly (quick wins surface earlier).
#[must_use]
pub fn compute_urgency(
    importance: u8,
    effort: u8,
    due_by: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> u8 {
    let time_pressure = match due_by {
        None => NO_DUE_BY_PRESSURE,
        Some(due_by) => {
            let remaining = (due_by - now).num_seconds();
            if remaining <= 0 {
                1.0
            } else {
                (1.0 - (remaining as f64 / URGENCY_HORIZON_SECONDS)).max(0.0)
            }
        }
    };
    let importance_norm = f64::from(importance.clamp(1, 3) - 1) / 2.0;
    let effort_boost = f64::from(3 - effort.clamp(1, 3)) / 2.0;
    let raw = WEIGHT_TIME_PRESSURE * time_pressure
        + WEIGHT_IMPORTANCE * importance_norm
        + WEIGHT_EFFORT * effort_boost;
    let score = 1.0 + (raw * 99.0).round();
    score.clamp(1.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn state_machine_matrix() {
        use CommitmentState::*;
        assert!(Open.can_transition_to(Completed));
        assert!(Open.can_transition_to(Missed));
        assert!(Open.can_transition_to(Canceled));
        assert!(Missed.can_transition_to(Open));

        assert!(!Missed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Open));
        assert!(!Canceled.can_transition_to(Open));
        assert!(!Open.can_transition_to(Open));
    }

    #[test]
    fn urgency_is_deterministic() {
        let due = Some(now() + Duration::days(3));
        let a = compute_urgency(3, 1, due, now());
        let b = compute_urgency(3, 1, due, now());
        assert_eq!(a, b);
    }

    #[test]
    fn urgency_bounds() {
        assert!(compute_urgency(1, 3, None, now()) >= 1);
        assert!(compute_urgency(3, 1, Some(now() - Duration::days(2)), now()) <= 100);
    }

    #[test]
    fn overdue_clamps_time_pressure() {
        let just_overdue = compute_urgency(2, 2, Some(now() - Duration::seconds(1)), now());
        let long_overdue = compute_urgency(2, 2, Some(now() - Duration::days(30)), now());
        assert_eq!(just_overdue, long_overdue);
    }

    #[test]
    fn closer_deadlines_are_more_urgent() {
        let far = compute_urgency(2, 2, Some(now() + Duration::days(10)), now());
        let near = compute_urgency(2, 2, Some(now() + Duration::days(1)), now());
        let overdue = compute_urgency(2, 2, Some(now() - Duration::hours(1)), now());
        assert!(near > far);
        assert!(overdue > near);
    }

    #[test]
    fn importance_raises_urgency() {
        let low = compute_urgency(1, 2, None, now());
        let high = compute_urgency(3, 2, None, now());
        assert!(high > low);
    }

    #[test]
    fn new_commitment_validation() {
        assert!(NewCommitment::new("marion", "Water plants").validate().is_ok());
        assert!(NewCommitment::new("marion", "  ").validate().is_err());
        assert!(
            NewCommitment::new("marion", "x")
                .with_weights(4, 2)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn apply_update_recomputes_urgency() {
        let mut commitment = Commitment {
            id: CommitmentId::from_i64(1),
            owner: "marion".to_string(),
            description: "Water plants".to_string(),
            state: CommitmentState::Open,
            importance: 2,
            effort: 2,
            due_by: None,
            urgency: compute_urgency(2, 2, None, now()),
            provenance_reference: None,
            next_schedule_id: None,
            last_progress_at: None,
            ever_missed_at: None,
            reviewed_at: None,
            created_at: now(),
            updated_at: now(),
        };
        let before = commitment.urgency;

        commitment
            .apply_update(
                UpdateCommitment {
                    due_by: Some(Some(now() + Duration::hours(6))),
                    ..UpdateCommitment::default()
                },
                now(),
            )
            .expect("update");
        assert!(commitment.urgency > before);
        assert_eq!(commitment.updated_at, now());
    }
}
