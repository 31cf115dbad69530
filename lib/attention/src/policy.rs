//! Ordered attention policies.
//!
//! Policies scope on signal type, source component, urgency, confidence,
//! channel cost, and preference flags. The first matching policy wins;
//! an outcome naming an unknown channel collapses to LOG_ONLY.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::assessment::{HIGH_URGENCY, LOW_URGENCY};
use crate::channel::{Channel, RouteDecision};
use crate::envelope::RoutingEnvelope;
use crate::preferences::PreferenceFlags;

/// An inclusive score range; absent bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    /// Inclusive minimum.
    pub minimum: Option<f64>,
    /// Inclusive maximum.
    pub maximum: Option<f64>,
}

impl ScoreRange {
    /// A range with only a minimum.
    #[must_use]
    pub fn at_least(minimum: f64) -> Self {
        Self {
            minimum: Some(minimum),
            maximum: None,
        }
    }

    /// Returns whether the score falls in the range.
    #[must_use]
    pub fn contains(&self, score: f64) -> bool {
        self.minimum.is_none_or(|min| score >= min) && self.maximum.is_none_or(|max| score <= max)
    }
}

/// Coarse urgency buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
}

impl UrgencyLevel {
    /// Buckets an urgency score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_URGENCY {
            Self::High
        } else if score >= LOW_URGENCY {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Urgency constraint: by bucket, by score range, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UrgencyConstraint {
    /// Accepted buckets.
    pub levels: Option<HashSet<UrgencyLevel>>,
    /// Accepted score range.
    pub score: Option<ScoreRange>,
}

impl UrgencyConstraint {
    /// Returns whether an urgency score satisfies the constraint.
    #[must_use]
    pub fn matches(&self, score: f64) -> bool {
        if let Some(levels) = &self.levels {
            if !levels.contains(&UrgencyLevel::from_score(score)) {
                return false;
            }
        }
        if let Some(range) = &self.score {
            if !range.contains(score) {
                return false;
            }
        }
        true
    }
}

/// A preference flag a policy requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceCondition {
    /// Flag key: `always_notify`, `quiet_hours`, or `do_not_disturb`.
    pub key: String,
    /// Required value.
    pub value: bool,
}

impl PreferenceCondition {
    /// Creates a condition.
    #[must_use]
    pub fn new(key: impl Into<String>, value: bool) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    fn matches(&self, flags: &PreferenceFlags) -> bool {
        let actual = match self.key.as_str() {
            "always_notify" => flags.always_notify,
            "quiet_hours" => flags.quiet_hours,
            "do_not_disturb" => flags.do_not_disturb,
            "interruptible" => flags.interruptible,
            _ => return false,
        };
        actual == self.value
    }
}

/// What a policy matches on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyScope {
    /// Accepted signal types.
    pub signal_types: Option<HashSet<String>>,
    /// Accepted source components.
    pub source_components: Option<HashSet<String>>,
    /// Urgency constraint.
    pub urgency: Option<UrgencyConstraint>,
    /// Confidence range.
    pub confidence: Option<ScoreRange>,
    /// Channel-cost range.
    pub channel_cost: Option<ScoreRange>,
    /// Required preference flags (all must hold).
    pub preferences: Vec<PreferenceCondition>,
}

impl PolicyScope {
    fn matches(&self, envelope: &RoutingEnvelope, flags: &PreferenceFlags) -> bool {
        if let Some(types) = &self.signal_types {
            if !types.contains(&envelope.signal_type) {
                return false;
            }
        }
        if let Some(sources) = &self.source_components {
            let source = envelope
                .notification
                .as_ref()
                .map(|n| n.source_component.as_str())
                .unwrap_or_default();
            if !sources.contains(source) {
                return false;
            }
        }
        if let Some(urgency) = &self.urgency {
            if !urgency.matches(envelope.urgency) {
                return false;
            }
        }
        if let Some(confidence) = &self.confidence {
            if !confidence.contains(envelope.confidence()) {
                return false;
            }
        }
        if let Some(channel_cost) = &self.channel_cost {
            if !channel_cost.contains(envelope.channel_cost) {
                return false;
            }
        }
        self.preferences.iter().all(|c| c.matches(flags))
    }
}

/// What a matched policy decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyOutcomeKind {
    Notify,
    Batch,
    Defer,
    LogOnly,
    Escalate,
}

/// A policy outcome with an optional channel token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    /// Outcome kind.
    pub kind: PolicyOutcomeKind,
    /// Channel token for NOTIFY/ESCALATE outcomes. An unknown token
    /// collapses the outcome to LOG_ONLY.
    pub channel: Option<String>,
}

impl PolicyOutcome {
    /// A NOTIFY outcome on a channel.
    #[must_use]
    pub fn notify(channel: impl Into<String>) -> Self {
        Self {
            kind: PolicyOutcomeKind::Notify,
            channel: Some(channel.into()),
        }
    }

    /// Converts the outcome into a routing decision.
    #[must_use]
    pub fn to_decision(&self) -> RouteDecision {
        let channel = match &self.channel {
            Some(token) => match Channel::parse(token) {
                Some(channel) => Some(channel),
                None => return RouteDecision::LogOnly,
            },
            None => None,
        };
        match self.kind {
            PolicyOutcomeKind::Notify => RouteDecision::Notify(channel),
            PolicyOutcomeKind::Batch => RouteDecision::Batch,
            PolicyOutcomeKind::Defer => RouteDecision::Defer,
            PolicyOutcomeKind::LogOnly => RouteDecision::LogOnly,
            PolicyOutcomeKind::Escalate => RouteDecision::Escalate(channel),
        }
    }
}

/// One attention policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionPolicy {
    /// Stable policy id.
    pub policy_id: String,
    /// Policy version.
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// When the policy applies.
    pub scope: PolicyScope,
    /// What it decides.
    pub outcome: PolicyOutcome,
}

/// A matched policy and the decision it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyMatch {
    /// The matched policy id.
    pub policy_id: String,
    /// The resulting decision.
    pub decision: RouteDecision,
}

/// An ordered, first-match-wins policy list.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    policies: Vec<AttentionPolicy>,
}

impl PolicyEngine {
    /// Creates an engine over an ordered policy list.
    #[must_use]
    pub fn new(policies: Vec<AttentionPolicy>) -> Self {
        Self { policies }
    }

    /// Creates the engine with the baseline policy set.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(default_policies())
    }

    /// Evaluates the list; the first matching policy wins.
    #[must_use]
    pub fn evaluate(
        &self,
        envelope: &RoutingEnvelope,
        flags: &PreferenceFlags,
    ) -> Option<PolicyMatch> {
        self.policies
            .iter()
            .find(|p| p.scope.matches(envelope, flags))
            .map(|p| PolicyMatch {
                policy_id: p.policy_id.clone(),
                decision: p.outcome.to_decision(),
            })
    }
}

/// The baseline policy set.
#[must_use]
pub fn default_policies() -> Vec<AttentionPolicy> {
    vec![
        AttentionPolicy {
            policy_id: "always-notify-override".to_string(),
            version: "1.0.0".to_string(),
            description: "Always notify when an always-notify preference is set.".to_string(),
            scope: PolicyScope {
                preferences: vec![PreferenceCondition::new("always_notify", true)],
                ..PolicyScope::default()
            },
            outcome: PolicyOutcome::notify("signal"),
        },
        AttentionPolicy {
            policy_id: "approval-requests-signal".to_string(),
            version: "1.0.0".to_string(),
            description: "Route approval requests via Signal by default.".to_string(),
            scope: PolicyScope {
                signal_types: Some(
                    [
                        "approval.request".to_string(),
                        "commitment.creation_approval_proposal".to_string(),
                        "commitment.dedupe_proposal".to_string(),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ..PolicyScope::default()
            },
            outcome: PolicyOutcome::notify("signal"),
        },
        AttentionPolicy {
            policy_id: "quiet-hours-defer-low-urgency".to_string(),
            version: "1.0.0".to_string(),
            description: "Defer low or medium urgency during quiet hours.".to_string(),
            scope: PolicyScope {
                urgency: Some(UrgencyConstraint {
                    levels: Some(
                        [UrgencyLevel::Low, UrgencyLevel::Medium]
                            .into_iter()
                            .collect(),
                    ),
                    score: None,
                }),
                preferences: vec![PreferenceCondition::new("quiet_hours", true)],
                ..PolicyScope::default()
            },
            outcome: PolicyOutcome {
                kind: PolicyOutcomeKind::Defer,
                channel: None,
            },
        },
        AttentionPolicy {
            policy_id: "do-not-disturb-log-only-non-urgent".to_string(),
            version: "1.0.0".to_string(),
            description: "Log-only non-urgent signals during do-not-disturb windows.".to_string(),
            scope: PolicyScope {
                urgency: Some(UrgencyConstraint {
                    levels: Some(
                        [UrgencyLevel::Low, UrgencyLevel::Medium]
                            .into_iter()
                            .collect(),
                    ),
                    score: None,
                }),
                preferences: vec![PreferenceCondition::new("do_not_disturb", true)],
                ..PolicyScope::default()
            },
            outcome: PolicyOutcome {
                kind: PolicyOutcomeKind::LogOnly,
                channel: None,
            },
        },
        AttentionPolicy {
            policy_id: "high-urgency-notify-signal".to_string(),
            version: "1.0.0".to_string(),
            description: "Notify via Signal for high urgency and high confidence.".to_string(),
            scope: PolicyScope {
                urgency: Some(UrgencyConstraint {
                    levels: None,
                    score: Some(ScoreRange::at_least(HIGH_URGENCY)),
                }),
                confidence: Some(ScoreRange::at_least(crate::assessment::HIGH_CONFIDENCE)),
                ..PolicyScope::default()
            },
            outcome: PolicyOutcome::notify("signal"),
        },
        AttentionPolicy {
            policy_id: "low-urgency-high-cost-batch".to_string(),
            version: "1.0.0".to_string(),
            description: "Batch low urgency items with high channel cost.".to_string(),
            scope: PolicyScope {
                urgency: Some(UrgencyConstraint {
                    levels: Some([UrgencyLevel::Low].into_iter().collect()),
                    score: None,
                }),
                channel_cost: Some(ScoreRange::at_least(crate::assessment::HIGH_CHANNEL_COST)),
                ..PolicyScope::default()
            },
            outcome: PolicyOutcome {
                kind: PolicyOutcomeKind::Batch,
                channel: None,
            },
        },
    ]
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
    fn urgency_buckets() {
        assert_eq!(UrgencyLevel::from_score(0.1), UrgencyLevel::Low);
        assert_eq!(UrgencyLevel::from_score(0.5), UrgencyLevel::Medium);
        assert_eq!(UrgencyLevel::from_score(0.9), UrgencyLevel::High);
    }

    #[test]
    fn first_match_wins() {
        let engine = PolicyEngine::with_defaults();
        let mut env = crate::envelope::tests::envelope();
        env.urgency = 0.1;

        // Always-notify outranks quiet-hours deferral.
        let flags = PreferenceFlags {
            always_notify: true,
            quiet_hours: true,
            interruptible: true,
            ..PreferenceFlags::default()
        };
        let matched = engine.evaluate(&env, &flags).expect("match");
        assert_eq!(matched.policy_id, "always-notify-override");
        assert_eq!(
            matched.decision,
            RouteDecision::Notify(Some(Channel::Signal))
        );
    }

    #[test]
    fn quiet_hours_defer_policy() {
        let engine = PolicyEngine::with_defaults();
        let mut env = crate::envelope::tests::envelope();
        env.urgency = 0.3;
        let flags = PreferenceFlags {
            quiet_hours: true,
            interruptible: true,
            ..PreferenceFlags::default()
        };
        let matched = engine.evaluate(&env, &flags).expect("match");
        assert_eq!(matched.policy_id, "quiet-hours-defer-low-urgency");
        assert_eq!(matched.decision, RouteDecision::Defer);
    }

    #[test]
    fn high_urgency_policy_routes_to_signal() {
        let engine = PolicyEngine::with_defaults();
        let mut env = crate::envelope::tests::envelope();
        env.urgency = 0.9;
        env.notification.as_mut().unwrap().confidence = 0.9;

        let matched = engine.evaluate(&env, &flags()).expect("match");
        assert_eq!(matched.policy_id, "high-urgency-notify-signal");
    }

    #[test]
    fn no_policy_matches_plain_traffic() {
        let engine = PolicyEngine::with_defaults();
        let env = crate::envelope::tests::envelope();
        assert!(engine.evaluate(&env, &flags()).is_none());
    }

    #[test]
    fn unknown_channel_token_collapses_to_log_only() {
        let outcome = PolicyOutcome {
            kind: PolicyOutcomeKind::Notify,
            channel: Some("pager".to_string()),
        };
        assert_eq!(outcome.to_decision(), RouteDecision::LogOnly);
    }

    #[test]
    fn approval_requests_route_to_signal() {
        let engine = PolicyEngine::with_defaults();
        let mut env = crate::envelope::tests::envelope();
        env.signal_type = "approval.request".to_string();

        let matched = engine.evaluate(&env, &flags()).expect("match");
        assert_eq!(matched.policy_id, "approval-requests-signal");
    }
}
