//! Per-owner attention context and channel preferences.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::channel::{Channel, RouteDecision};
use crate::envelope::RoutingEnvelope;

/// A daily time window in the owner's clock, UTC-stored.
///
/// Windows may wrap midnight (`22:00`–`06:00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: NaiveTime,
    /// Exclusive end.
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Creates a window.
    #[must_use]
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Returns whether the instant's time of day falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let time = at.time();
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            // Wraps midnight.
            time >= self.start || time < self.end
        }
    }
}

/// Per-owner attention context and preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerPreferences {
    /// The owner these preferences belong to.
    pub owner: String,
    /// Quiet-hours windows; deliveries defer inside them.
    pub quiet_hours: Vec<TimeWindow>,
    /// Do-not-disturb windows; non-urgent deliveries are logged only.
    pub do_not_disturb: Vec<TimeWindow>,
    /// Calendar windows in which the owner is interruptible. Empty
    /// means always interruptible.
    pub interruptible_windows: Vec<TimeWindow>,
    /// Preferred channel per signal-type prefix.
    pub channel_preferences: HashMap<String, Channel>,
    /// Signal types that always notify, overriding deferrals.
    pub always_notify: HashSet<String>,
}

impl OwnerPreferences {
    /// Creates empty preferences for an owner.
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }

    /// Computes the preference flags for a signal at an instant.
    #[must_use]
    pub fn flags_at(&self, signal_type: &str, at: DateTime<Utc>) -> PreferenceFlags {
        PreferenceFlags {
            always_notify: self.always_notify.contains(signal_type),
            quiet_hours: self.quiet_hours.iter().any(|w| w.contains(at)),
            do_not_disturb: self.do_not_disturb.iter().any(|w| w.contains(at)),
            interruptible: self.interruptible_windows.is_empty()
                || self.interruptible_windows.iter().any(|w| w.contains(at)),
        }
    }
}

/// The owner's state as seen by the pipeline at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreferenceFlags {
    /// The signal type is on the owner's always-notify list.
    pub always_notify: bool,
    /// The instant is inside a quiet-hours window.
    pub quiet_hours: bool,
    /// The instant is inside a do-not-disturb window.
    pub do_not_disturb: bool,
    /// The owner is interruptible at the instant.
    pub interruptible: bool,
}

/// Applies owner preferences to a pipeline decision.
///
/// Always-notify exceptions override deferrals; otherwise quiet hours
/// defer deliveries and do-not-disturb logs non-urgent ones.
#[must_use]
pub fn apply_preferences(
    decision: RouteDecision,
    envelope: &RoutingEnvelope,
    flags: &PreferenceFlags,
) -> RouteDecision {
    if flags.always_notify {
        return match decision {
            RouteDecision::Defer | RouteDecision::Batch | RouteDecision::LogOnly => {
                RouteDecision::Notify(Some(Channel::Signal))
            }
            delivering => delivering,
        };
    }
    if decision.is_delivering() {
        if flags.do_not_disturb && envelope.urgency < crate::assessment::HIGH_URGENCY {
            return RouteDecision::LogOnly;
        }
        if flags.quiet_hours {
            return RouteDecision::Defer;
        }
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, hour, minute, 0).unwrap()
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> TimeWindow {
        TimeWindow::new(
            NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        )
    }

    #[test]
    fn plain_window_contains() {
        let w = window((9, 0), (17, 0));
        assert!(w.contains(at(12, 0)));
        assert!(!w.contains(at(8, 59)));
        assert!(!w.contains(at(17, 0)));
    }

    #[test]
    fn midnight_wrapping_window() {
        let w = window((22, 0), (6, 0));
        assert!(w.contains(at(23, 30)));
        assert!(w.contains(at(2, 0)));
        assert!(!w.contains(at(12, 0)));
        assert!(!w.contains(at(6, 0)));
    }

    #[test]
    fn flags_reflect_windows_and_exceptions() {
        let mut prefs = OwnerPreferences::new("marion");
        prefs.quiet_hours.push(window((22, 0), (6, 0)));
        prefs.always_notify.insert("status.update".to_string());

        let flags = prefs.flags_at("status.update", at(23, 30));
        assert!(flags.quiet_hours);
        assert!(flags.always_notify);
        assert!(flags.interruptible);

        let flags = prefs.flags_at("digest.ready", at(12, 0));
        assert!(!flags.quiet_hours);
        assert!(!flags.always_notify);
    }

    #[test]
    fn interruptible_defaults_to_true_without_windows() {
        let prefs = OwnerPreferences::new("marion");
        assert!(prefs.flags_at("anything", at(3, 0)).interruptible);

        let mut prefs = OwnerPreferences::new("marion");
        prefs.interruptible_windows.push(window((9, 0), (17, 0)));
        assert!(prefs.flags_at("anything", at(10, 0)).interruptible);
        assert!(!prefs.flags_at("anything", at(20, 0)).interruptible);
    }

    #[test]
    fn always_notify_overrides_deferral() {
        let env = crate::envelope::tests::envelope();
        let flags = PreferenceFlags {
            always_notify: true,
            quiet_hours: true,
            do_not_disturb: false,
            interruptible: true,
        };
        let decision = apply_preferences(RouteDecision::Defer, &env, &flags);
        assert_eq!(decision, RouteDecision::Notify(Some(Channel::Signal)));
    }

    #[test]
    fn quiet_hours_defer_deliveries() {
        let env = crate::envelope::tests::envelope();
        let flags = PreferenceFlags {
            quiet_hours: true,
            interruptible: true,
            ..PreferenceFlags::default()
        };
        let decision = apply_preferences(RouteDecision::Notify(None), &env, &flags);
        assert_eq!(decision, RouteDecision::Defer);
    }

    #[test]
    fn do_not_disturb_logs_non_urgent() {
        let mut env = crate::envelope::tests::envelope();
        env.urgency = 0.2;
        let flags = PreferenceFlags {
            do_not_disturb: true,
            interruptible: true,
            ..PreferenceFlags::default()
        };
        let decision = apply_preferences(RouteDecision::Notify(None), &env, &flags);
        assert_eq!(decision, RouteDecision::LogOnly);

        // Urgent traffic still defers on quiet hours but is not logged away.
        env.urgency = 0.95;
        let decision = apply_preferences(RouteDecision::Notify(None), &env, &flags);
        assert_eq!(decision, RouteDecision::Notify(None));
    }
}
