//! Schedules: polymorphic recurrence definitions over task intents.
//!
//! A schedule is one of four kinds — one-time, interval, calendar-rule,
//! or conditional — modeled as a kind discriminator plus a definition
//! struct of optional fields. Validation dispatches on the kind.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use minder_core::{ExecutionId, ScheduleId, TaskIntentId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

use crate::error::SchedulerError;
use crate::execution::ExecutionStatus;
use crate::predicate::EvaluationStatus;
use crate::recurrence::RecurrenceRule;

/// The four schedule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fires once at `run_at`.
    OneTime,
    /// Fires every `count` * `unit` from an anchor.
    Interval,
    /// Fires on a recurrence expression in a timezone.
    CalendarRule,
    /// Evaluates a predicate on a cadence; fires when it holds.
    Conditional,
}

impl ScheduleKind {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one_time",
            Self::Interval => "interval",
            Self::CalendarRule => "calendar_rule",
            Self::Conditional => "conditional",
        }
    }
}

/// Schedule lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    /// Eligible to fire.
    Active,
    /// Timer suspended; may be resumed.
    Paused,
    /// Finished naturally (one-time schedules after their run).
    Completed,
    /// Withdrawn; terminal.
    Canceled,
}

impl ScheduleState {
    /// Returns true for terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// Returns whether a transition to `target` is legal.
    ///
    /// `active ⇄ paused`; either may be canceled; `completed` is reached
    /// only from `active`; same-state transitions are rejected.
    #[must_use]
    pub fn can_transition_to(&self, target: ScheduleState) -> bool {
        match (self, target) {
            (Self::Active, Self::Paused)
            | (Self::Paused, Self::Active)
            | (Self::Active, Self::Canceled)
            | (Self::Paused, Self::Canceled)
            | (Self::Active, Self::Completed) => true,
            _ => false,
        }
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }
}

/// Units for interval schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl IntervalUnit {
    /// Returns the duration of `count` units.
    #[must_use]
    pub fn duration(&self, count: u32) -> Duration {
        let count = i64::from(count);
        match self {
            Self::Minute => Duration::minutes(count),
            Self::Hour => Duration::hours(count),
            Self::Day => Duration::days(count),
            Self::Week => Duration::weeks(count),
        }
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

/// Operators for conditional schedule predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// True when the subject resolves to a non-null value.
    Exists,
    /// Literal string equality.
    Matches,
}

impl PredicateOperator {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Exists => "exists",
            Self::Matches => "matches",
        }
    }

    /// Returns true for operators that order two numeric values.
    #[must_use]
    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

/// Declared type of a predicate literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateValueType {
    String,
    Number,
    Boolean,
}

/// Kind-specific schedule fields, all optional, discriminated by
/// [`ScheduleKind`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    /// One-time: when to fire.
    pub run_at: Option<DateTime<Utc>>,
    /// Interval: number of units between runs.
    pub interval_count: Option<u32>,
    /// Interval: the unit.
    pub interval_unit: Option<IntervalUnit>,
    /// Interval / calendar-rule: the anchor the cadence steps from.
    pub anchor_at: Option<DateTime<Utc>>,
    /// Calendar-rule: the recurrence expression.
    pub recurrence: Option<String>,
    /// Conditional: the subject path to resolve.
    pub predicate_subject: Option<String>,
    /// Conditional: the comparison operator.
    pub predicate_operator: Option<PredicateOperator>,
    /// Conditional: the literal compared against.
    pub predicate_value: Option<JsonValue>,
    /// Conditional: declared type of the literal.
    pub predicate_value_type: Option<PredicateValueType>,
    /// Conditional: seconds between predicate evaluations.
    pub evaluation_cadence_seconds: Option<u32>,
}

impl ScheduleDefinition {
    /// Builds a one-time definition.
    #[must_use]
    pub fn one_time(run_at: DateTime<Utc>) -> Self {
        Self {
            run_at: Some(run_at),
            ..Self::default()
        }
    }

    /// Builds an interval definition.
    #[must_use]
    pub fn interval(count: u32, unit: IntervalUnit, anchor_at: DateTime<Utc>) -> Self {
        Self {
            interval_count: Some(count),
            interval_unit: Some(unit),
            anchor_at: Some(anchor_at),
            ..Self::default()
        }
    }

    /// Builds a calendar-rule definition.
    #[must_use]
    pub fn calendar_rule(recurrence: impl Into<String>, anchor_at: DateTime<Utc>) -> Self {
        Self {
            recurrence: Some(recurrence.into()),
            anchor_at: Some(anchor_at),
            ..Self::default()
        }
    }

    /// Builds a conditional definition.
    #[must_use]
    pub fn conditional(
        subject: impl Into<String>,
        operator: PredicateOperator,
        value: JsonValue,
        value_type: PredicateValueType,
        cadence_seconds: u32,
    ) -> Self {
        Self {
            predicate_subject: Some(subject.into()),
            predicate_operator: Some(operator),
            predicate_value: Some(value),
            predicate_value_type: Some(value_type),
            evaluation_cadence_seconds: Some(cadence_seconds),
            ..Self::default()
        }
    }

    /// Validates the definition for the given kind.
    ///
    /// `now` is the activation reference; a one-time `run_at` must be
    /// strictly in the future when activating.
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the first failed rule.
    pub fn validate(
        &self,
        kind: ScheduleKind,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        parse_timezone(timezone)?;
        match kind {
            ScheduleKind::OneTime => {
                let Some(run_at) = self.run_at else {
                    return Err(SchedulerError::validation(
                        "one-time schedules require run_at",
                    ));
                };
                if run_at <= now {
                    return Err(SchedulerError::validation(
                        "one-time run_at must be in the future",
                    ));
                }
            }
            ScheduleKind::Interval => {
                match self.interval_count {
                    Some(count) if count > 0 => {}
                    _ => {
                        return Err(SchedulerError::validation(
                            "interval schedules require a positive count",
                        ));
                    }
                }
                if self.interval_unit.is_none() {
                    return Err(SchedulerError::validation(
                        "interval schedules require a unit of minute, hour, day, or week",
                    ));
                }
            }
            ScheduleKind::CalendarRule => {
                let Some(recurrence) = self.recurrence.as_deref() else {
                    return Err(SchedulerError::validation(
                        "calendar-rule schedules require a recurrence expression",
                    ));
                };
                RecurrenceRule::parse(recurrence)?;
            }
            ScheduleKind::Conditional => {
                if self
                    .predicate_subject
                    .as_deref()
                    .is_none_or(|s| s.trim().is_empty())
                {
                    return Err(SchedulerError::validation(
                        "conditional schedules require a predicate subject",
                    ));
                }
                if self.predicate_operator.is_none() {
                    return Err(SchedulerError::validation(
                        "conditional schedules require a predicate operator",
                    ));
                }
                if self.predicate_value_type.is_none() {
                    return Err(SchedulerError::validation(
                        "conditional schedules require a declared value type",
                    ));
                }
                match self.evaluation_cadence_seconds {
                    Some(cadence) if cadence > 0 => {}
                    _ => {
                        return Err(SchedulerError::validation(
                            "conditional schedules require an evaluation cadence",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Computes the first run strictly after `after`.
    ///
    /// Returns `None` when the schedule has no further runs (a one-time
    /// schedule whose `run_at` has passed).
    #[must_use]
    pub fn next_run_after(
        &self,
        kind: ScheduleKind,
        timezone: Tz,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match kind {
            ScheduleKind::OneTime => self.run_at.filter(|run_at| *run_at > after),
            ScheduleKind::Interval => {
                let count = self.interval_count?;
                let unit = self.interval_unit?;
                let step = unit.duration(count);
                if step <= Duration::zero() {
                    return None;
                }
                let anchor = self.anchor_at.unwrap_or(after);
                if anchor > after {
                    return Some(anchor);
                }
                // Number of whole steps elapsed since the anchor, plus one.
                let elapsed = (after - anchor).num_seconds();
                let step_secs = step.num_seconds();
                let steps = elapsed / step_secs + 1;
                Some(anchor + Duration::seconds(steps * step_secs))
            }
            ScheduleKind::CalendarRule => {
                let rule = RecurrenceRule::parse(self.recurrence.as_deref()?).ok()?;
                let anchor = self.anchor_at.unwrap_or(after);
                rule.next_after(anchor, after, timezone)
            }
            ScheduleKind::Conditional => {
                let cadence = self.evaluation_cadence_seconds?;
                Some(after + Duration::seconds(i64::from(cadence)))
            }
        }
    }
}

/// Parses and validates an IANA timezone name.
///
/// # Errors
///
/// Returns a validation error for unknown timezones.
pub fn parse_timezone(timezone: &str) -> Result<Tz, SchedulerError> {
    Tz::from_str(timezone)
        .map_err(|_| SchedulerError::validation(format!("unknown timezone '{timezone}'")))
}

/// A persisted schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Store-assigned identifier.
    pub id: ScheduleId,
    /// The task intent this schedule runs. Immutable after creation.
    pub task_intent_id: TaskIntentId,
    /// Which of the four kinds this schedule is.
    pub kind: ScheduleKind,
    /// Lifecycle state.
    pub state: ScheduleState,
    /// IANA timezone name used for calendar arithmetic.
    pub timezone: String,
    /// Kind-specific fields.
    pub definition: ScheduleDefinition,
    /// Next fire time; strictly in the future while active.
    pub next_run_at: Option<DateTime<Utc>>,
    /// When the schedule last ran.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Outcome of the last run.
    pub last_run_status: Option<ExecutionStatus>,
    /// Consecutive failed runs. Reset to zero on success.
    pub failure_count: u32,
    /// The most recent execution.
    pub last_execution_id: Option<ExecutionId>,
    /// Conditional schedules: when the predicate was last evaluated.
    pub last_evaluated_at: Option<DateTime<Utc>>,
    /// Conditional schedules: outcome of the last evaluation.
    pub last_evaluation_status: Option<EvaluationStatus>,
    /// Conditional schedules: error code of the last failed evaluation.
    pub last_evaluation_error: Option<String>,
    /// When the schedule was created.
    pub created_at: DateTime<Utc>,
    /// When the schedule was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Returns the parsed timezone.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the stored name no longer parses.
    pub fn tz(&self) -> Result<Tz, SchedulerError> {
        parse_timezone(&self.timezone)
    }

    /// Records the outcome of a run on the schedule.
    pub fn record_run(
        &mut self,
        execution_id: ExecutionId,
        finished_at: DateTime<Utc>,
        status: ExecutionStatus,
    ) {
        self.last_run_at = Some(finished_at);
        self.last_run_status = Some(status);
        self.last_execution_id = Some(execution_id);
        match status {
            ExecutionStatus::Succeeded => self.failure_count = 0,
            ExecutionStatus::Failed => self.failure_count += 1,
            _ => {}
        }
        self.updated_at = finished_at;
    }

    /// Records a predicate evaluation outcome on the schedule.
    pub fn record_evaluation(
        &mut self,
        evaluated_at: DateTime<Utc>,
        status: EvaluationStatus,
        error_code: Option<String>,
    ) {
        self.last_evaluated_at = Some(evaluated_at);
        self.last_evaluation_status = Some(status);
        self.last_evaluation_error = error_code;
        self.updated_at = evaluated_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn state_matrix() {
        use ScheduleState::*;
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Active.can_transition_to(Canceled));
        assert!(Paused.can_transition_to(Canceled));
        assert!(Active.can_transition_to(Completed));

        assert!(!Active.can_transition_to(Active));
        assert!(!Paused.can_transition_to(Paused));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Canceled.can_transition_to(Active));
        assert!(!Paused.can_transition_to(Completed));
    }

    #[test]
    fn one_time_requires_future_run_at() {
        let def = ScheduleDefinition::one_time(now() - Duration::hours(1));
        assert!(def.validate(ScheduleKind::OneTime, "UTC", now()).is_err());

        let def = ScheduleDefinition::one_time(now() + Duration::hours(1));
        assert!(def.validate(ScheduleKind::OneTime, "UTC", now()).is_ok());

        let def = ScheduleDefinition::default();
        assert!(def.validate(ScheduleKind::OneTime, "UTC", now()).is_err());
    }

    #[test]
    fn interval_requires_positive_count_and_unit() {
        let def = ScheduleDefinition::interval(0, IntervalUnit::Hour, now());
        assert!(def.validate(ScheduleKind::Interval, "UTC", now()).is_err());

        let mut def = ScheduleDefinition::interval(6, IntervalUnit::Hour, now());
        assert!(def.validate(ScheduleKind::Interval, "UTC", now()).is_ok());

        def.interval_unit = None;
        assert!(def.validate(ScheduleKind::Interval, "UTC", now()).is_err());
    }

    #[test]
    fn calendar_rule_requires_parseable_recurrence() {
        let def = ScheduleDefinition::calendar_rule("FREQ=DAILY", now());
        assert!(
            def.validate(ScheduleKind::CalendarRule, "America/New_York", now())
                .is_ok()
        );

        let def = ScheduleDefinition::calendar_rule("FREQ=SECONDLY", now());
        assert!(
            def.validate(ScheduleKind::CalendarRule, "UTC", now())
                .is_err()
        );

        let def = ScheduleDefinition::calendar_rule("FREQ=DAILY", now());
        assert!(
            def.validate(ScheduleKind::CalendarRule, "Mars/Olympus", now())
                .is_err()
        );
    }

    #[test]
    fn conditional_requires_all_predicate_fields() {
        let def = ScheduleDefinition::conditional(
            "inbox.unread_count",
            PredicateOperator::Gte,
            serde_json::json!(10),
            PredicateValueType::Number,
            300,
        );
        assert!(
            def.validate(ScheduleKind::Conditional, "UTC", now())
                .is_ok()
        );

        let mut missing_subject = def.clone();
        missing_subject.predicate_subject = Some("  ".to_string());
        assert!(
            missing_subject
                .validate(ScheduleKind::Conditional, "UTC", now())
                .is_err()
        );

        let mut missing_cadence = def.clone();
        missing_cadence.evaluation_cadence_seconds = None;
        assert!(
            missing_cadence
                .validate(ScheduleKind::Conditional, "UTC", now())
                .is_err()
        );
    }

    #[test]
    fn interval_next_run_steps_from_anchor() {
        let anchor = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let def = ScheduleDefinition::interval(1, IntervalUnit::Day, anchor);

        let next = def
            .next_run_after(ScheduleKind::Interval, chrono_tz::UTC, now())
            .expect("next run");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn interval_future_anchor_is_first_run() {
        let anchor = now() + Duration::days(3);
        let def = ScheduleDefinition::interval(1, IntervalUnit::Week, anchor);

        let next = def
            .next_run_after(ScheduleKind::Interval, chrono_tz::UTC, now())
            .expect("next run");
        assert_eq!(next, anchor);
    }

    #[test]
    fn one_time_next_run_none_after_passing() {
        let def = ScheduleDefinition::one_time(now() - Duration::minutes(5));
        assert!(
            def.next_run_after(ScheduleKind::OneTime, chrono_tz::UTC, now())
                .is_none()
        );
    }

    #[test]
    fn conditional_next_run_is_cadence_from_now() {
        let def = ScheduleDefinition::conditional(
            "vault.note_count",
            PredicateOperator::Exists,
            JsonValue::Null,
            PredicateValueType::Number,
            600,
        );
        let next = def
            .next_run_after(ScheduleKind::Conditional, chrono_tz::UTC, now())
            .expect("next run");
        assert_eq!(next, now() + Duration::seconds(600));
    }

    #[test]
    fn record_run_resets_failure_count_on_success() {
        let mut schedule = Schedule {
            id: ScheduleId::from_i64(1),
            task_intent_id: TaskIntentId::from_i64(1),
            kind: ScheduleKind::Interval,
            state: ScheduleState::Active,
            timezone: "UTC".to_string(),
            definition: ScheduleDefinition::interval(1, IntervalUnit::Day, now()),
            next_run_at: Some(now() + Duration::days(1)),
            last_run_at: None,
            last_run_status: None,
            failure_count: 2,
            last_execution_id: None,
            last_evaluated_at: None,
            last_evaluation_status: None,
            last_evaluation_error: None,
            created_at: now(),
            updated_at: now(),
        };

        schedule.record_run(ExecutionId::from_i64(9), now(), ExecutionStatus::Failed);
        assert_eq!(schedule.failure_count, 3);

        schedule.record_run(ExecutionId::from_i64(10), now(), ExecutionStatus::Succeeded);
        assert_eq!(schedule.failure_count, 0);
        assert_eq!(schedule.last_execution_id, Some(ExecutionId::from_i64(10)));
    }
}
