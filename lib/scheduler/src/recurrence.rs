//! Calendar-rule recurrence expressions.
//!
//! Schedules of the calendar-rule kind carry an iCalendar-style
//! recurrence expression (`FREQ=DAILY;INTERVAL=2`). Only the frequency
//! and interval parts are interpreted; sub-minute frequencies are
//! rejected at validation time.

use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Supported recurrence frequencies.
///
/// `SECONDLY` is deliberately unsupported: the timer provider is not a
/// sub-minute scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    /// Every `interval` minutes.
    Minutely,
    /// Every `interval` hours.
    Hourly,
    /// Every `interval` days.
    Daily,
    /// Every `interval` weeks.
    Weekly,
    /// Every `interval` months.
    Monthly,
    /// Every `interval` years.
    Yearly,
}

impl Frequency {
    /// Returns the canonical expression token.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutely => "MINUTELY",
            Self::Hourly => "HOURLY",
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }
}

/// A parsed recurrence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    /// How often the rule repeats.
    pub frequency: Frequency,
    /// Multiplier on the frequency, >= 1.
    pub interval: u32,
}

impl RecurrenceRule {
    /// Parses a recurrence expression of the form
    /// `FREQ=<frequency>[;INTERVAL=<n>]`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed expressions, unsupported
    /// frequencies (including `SECONDLY`), and non-positive intervals.
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let mut frequency: Option<Frequency> = None;
        let mut interval: u32 = 1;

        for part in expression.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(SchedulerError::validation(format!(
                    "recurrence part '{part}' is not KEY=VALUE"
                )));
            };
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    frequency = Some(match value.trim().to_ascii_uppercase().as_str() {
                        "SECONDLY" => {
                            return Err(SchedulerError::validation(
                                "SECONDLY recurrence is not supported",
                            ));
                        }
                        "MINUTELY" => Frequency::Minutely,
                        "HOURLY" => Frequency::Hourly,
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        "YEARLY" => Frequency::Yearly,
                        other => {
                            return Err(SchedulerError::validation(format!(
                                "unsupported recurrence frequency '{other}'"
                            )));
                        }
                    });
                }
                "INTERVAL" => {
                    interval = value.trim().parse::<u32>().map_err(|_| {
                        SchedulerError::validation(format!(
                            "recurrence interval '{}' is not a positive integer",
                            value.trim()
                        ))
                    })?;
                    if interval == 0 {
                        return Err(SchedulerError::validation(
                            "recurrence interval must be >= 1",
                        ));
                    }
                }
                // BYDAY and friends are tolerated but not interpreted.
                _ => {}
            }
        }

        let Some(frequency) = frequency else {
            return Err(SchedulerError::validation(
                "recurrence expression must contain FREQ",
            ));
        };
        Ok(Self {
            frequency,
            interval,
        })
    }

    /// Returns the first occurrence strictly after `after`, stepping
    /// from `anchor` in the given timezone.
    ///
    /// Month and year steps are applied on the local calendar so that
    /// wall-clock anchors survive DST shifts.
    #[must_use]
    pub fn next_after(
        &self,
        anchor: DateTime<Utc>,
        after: DateTime<Utc>,
        timezone: Tz,
    ) -> Option<DateTime<Utc>> {
        let mut occurrence = timezone.from_utc_datetime(&anchor.naive_utc());
        let after_local = timezone.from_utc_datetime(&after.naive_utc());

        // Bounded walk: enough steps to cover a century of yearly rules.
        for _ in 0..200_000 {
            if occurrence > after_local {
                return Some(occurrence.with_timezone(&Utc));
            }
            occurrence = match self.frequency {
                Frequency::Minutely => occurrence + Duration::minutes(i64::from(self.interval)),
                Frequency::Hourly => occurrence + Duration::hours(i64::from(self.interval)),
                Frequency::Daily => occurrence + Duration::days(i64::from(self.interval)),
                Frequency::Weekly => occurrence + Duration::weeks(i64::from(self.interval)),
                Frequency::Monthly => occurrence.checked_add_months(Months::new(self.interval))?,
                Frequency::Yearly => {
                    occurrence.checked_add_months(Months::new(self.interval.checked_mul(12)?))?
                }
            };
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_frequency_and_interval() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;INTERVAL=2").expect("parses");
        assert_eq!(rule.frequency, Frequency::Daily);
        assert_eq!(rule.interval, 2);
    }

    #[test]
    fn interval_defaults_to_one() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY").expect("parses");
        assert_eq!(rule.interval, 1);
    }

    #[test]
    fn secondly_rejected() {
        let err = RecurrenceRule::parse("FREQ=SECONDLY").unwrap_err();
        assert!(err.to_string().contains("SECONDLY"));
    }

    #[test]
    fn missing_freq_rejected() {
        assert!(RecurrenceRule::parse("INTERVAL=3").is_err());
        assert!(RecurrenceRule::parse("").is_err());
    }

    #[test]
    fn malformed_part_rejected() {
        assert!(RecurrenceRule::parse("FREQ").is_err());
        assert!(RecurrenceRule::parse("FREQ=DAILY;INTERVAL=zero").is_err());
        assert!(RecurrenceRule::parse("FREQ=DAILY;INTERVAL=0").is_err());
    }

    #[test]
    fn unknown_parts_tolerated() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY;BYDAY=MO,WE").expect("parses");
        assert_eq!(rule.frequency, Frequency::Weekly);
    }

    #[test]
    fn daily_next_after_steps_from_anchor() {
        let rule = RecurrenceRule::parse("FREQ=DAILY").expect("parses");
        let anchor = Utc.with_ymd_and_hms(2026, 3, 1, 7, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap();

        let next = rule.next_after(anchor, after, chrono_tz::UTC).expect("next");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 4, 7, 0, 0).unwrap());
    }

    #[test]
    fn monthly_next_after_keeps_day_of_month() {
        let rule = RecurrenceRule::parse("FREQ=MONTHLY").expect("parses");
        let anchor = Utc.with_ymd_and_hms(2026, 1, 15, 8, 30, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 20, 0, 0, 0).unwrap();

        let next = rule.next_after(anchor, after, chrono_tz::UTC).expect("next");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 15, 8, 30, 0).unwrap());
    }

    #[test]
    fn next_after_in_local_timezone() {
        let rule = RecurrenceRule::parse("FREQ=DAILY").expect("parses");
        // Anchor at 07:00 New York wall clock, expressed in UTC (EST = UTC-5).
        let anchor = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 10, 13, 0, 0).unwrap();

        let next = rule
            .next_after(anchor, after, chrono_tz::America::New_York)
            .expect("next");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 11, 12, 0, 0).unwrap());
    }
}
