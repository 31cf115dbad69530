//! Escalation evaluation for routing decisions.
//!
//! A signal escalates one level (capped at HIGH) when it has been
//! ignored repeatedly, its deadline is close, or its severity strictly
//! increased. The first matching rule names the trigger.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default ignore threshold before escalating.
pub const DEFAULT_IGNORE_THRESHOLD: u32 = 3;
/// Default deadline window before escalating.
pub const DEFAULT_DEADLINE_WINDOW_SECONDS: i64 = 3600;

/// Ordered escalation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    None,
    Low,
    Medium,
    High,
}

impl EscalationLevel {
    /// Returns the level stepped up by one, capped at HIGH.
    #[must_use]
    pub fn step_up(&self) -> Self {
        match self {
            Self::None => Self::Low,
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    /// Returns the numeric form for storage.
    #[must_use]
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    /// Builds a level from its numeric form; out-of-range values map to
    /// NONE.
    #[must_use]
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            _ => Self::None,
        }
    }
}

/// Inputs for one escalation evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationInput {
    /// The owner the signal is for.
    pub owner: String,
    /// The signal type.
    pub signal_type: String,
    /// Stable reference of the signal.
    pub signal_reference: String,
    /// The signal's current escalation level.
    pub current_level: EscalationLevel,
    /// How many times the signal has been ignored.
    pub ignored_count: Option<u32>,
    /// Ignore threshold.
    pub ignore_threshold: u32,
    /// The deadline the signal tracks.
    pub deadline: Option<DateTime<Utc>>,
    /// How close the deadline must be to escalate.
    pub deadline_window: Duration,
    /// Severity the last time the signal was routed.
    pub previous_severity: Option<i32>,
    /// Severity now.
    pub current_severity: Option<i32>,
    /// Evaluation instant.
    pub timestamp: DateTime<Utc>,
}

/// Result of an escalation evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationDecision {
    /// Whether the level stepped up.
    pub escalated: bool,
    /// The resulting level.
    pub level: EscalationLevel,
    /// The first rule that matched, when escalated.
    pub trigger: Option<String>,
}

/// Evaluates escalation conditions.
#[must_use]
pub fn evaluate_escalation(input: &EscalationInput) -> EscalationDecision {
    let Some(trigger) = determine_trigger(input) else {
        return EscalationDecision {
            escalated: false,
            level: input.current_level,
            trigger: None,
        };
    };
    EscalationDecision {
        escalated: true,
        level: input.current_level.step_up(),
        trigger: Some(trigger),
    }
}

fn determine_trigger(input: &EscalationInput) -> Option<String> {
    if let Some(ignored) = input.ignored_count {
        if ignored >= input.ignore_threshold {
            return Some("ignored_repeatedly".to_string());
        }
    }
    if let Some(deadline) = input.deadline {
        if deadline - input.timestamp <= input.deadline_window {
            return Some("approaching_deadline".to_string());
        }
    }
    if let (Some(previous), Some(current)) = (input.previous_severity, input.current_severity) {
        if current > previous {
            return Some("increasing_severity".to_string());
        }
    }
    if input.ignored_count.is_none()
        && input.deadline.is_none()
        && input.current_severity.is_none()
    {
        tracing::warn!(
            signal_reference = %input.signal_reference,
            "missing escalation metadata"
        );
    }
    None
}
