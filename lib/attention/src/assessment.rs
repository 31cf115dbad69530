//! Base assessment of routing envelopes.
//!
//! The first scoring pass, before policies and preferences: a coarse
//! decision from urgency, channel cost, confidence, and the owner's
//! attention context at the envelope timestamp.

use crate::channel::RouteDecision;
use crate::envelope::RoutingEnvelope;
use crate::preferences::PreferenceFlags;

/// Urgency at or above this is high.
pub const HIGH_URGENCY: f64 = 0.85;
/// Confidence at or above this is high.
pub const HIGH_CONFIDENCE: f64 = 0.85;
/// Channel cost at or above this is high.
pub const HIGH_CHANNEL_COST: f64 = 0.7;
/// Urgency below this is low.
pub const LOW_URGENCY: f64 = 0.4;

/// Produces the base assessment for an envelope.
#[must_use]
pub fn assess(envelope: &RoutingEnvelope, flags: &PreferenceFlags) -> RouteDecision {
    if envelope.urgency >= HIGH_URGENCY && envelope.confidence() >= HIGH_CONFIDENCE {
        return RouteDecision::Notify(None);
    }
    if envelope.channel_cost >= HIGH_CHANNEL_COST && envelope.urgency < LOW_URGENCY {
        return RouteDecision::Batch;
    }
    if !flags.interruptible && !flags.always_notify {
        return RouteDecision::Defer;
    }
    RouteDecision::Notify(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> PreferenceFlags {
        PreferenceFlags {
            interruptible: true,
            ..PreferenceFlags::default()
        }
    }

    #[test]
    fn high_urgency_high_confidence_notifies() {
        let mut env = crate::envelope::tests::envelope();
        env.urgency = 0.9;
        env.notification.as_mut().unwrap().confidence = 0.9;
        assert_eq!(assess(&env, &flags()), RouteDecision::Notify(None));
    }

    #[test]
    fn high_cost_low_urgency_batches() {
        let mut env = crate::envelope::tests::envelope();
        env.urgency = 0.2;
        env.channel_cost = 0.8;
        assert_eq!(assess(&env, &flags()), RouteDecision::Batch);
    }

    #[test]
    fn non_interruptible_context_defers() {
        let env = crate::envelope::tests::envelope();
        let flags = PreferenceFlags {
            interruptible: false,
            ..PreferenceFlags::default()
        };
        assert_eq!(assess(&env, &flags), RouteDecision::Defer);
    }

    #[test]
    fn always_notify_overrides_context_deferral() {
        let env = crate::envelope::tests::envelope();
        let flags = PreferenceFlags {
            interruptible: false,
            always_notify: true,
            ..PreferenceFlags::default()
        };
        assert_eq!(assess(&env, &flags), RouteDecision::Notify(None));
    }

    #[test]
    fn plain_traffic_notifies() {
        let env = crate::envelope::tests::envelope();
        assert_eq!(assess(&env, &flags()), RouteDecision::Notify(None));
    }
}
