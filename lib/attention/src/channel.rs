//! Delivery channels and routing decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::assessment::{HIGH_CHANNEL_COST, HIGH_URGENCY};

/// A delivery medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// The Signal messenger transport.
    Signal,
    /// The Obsidian note store.
    Obsidian,
    /// The batched digest surface.
    Digest,
    /// The web surface.
    Web,
}

impl Channel {
    /// Parses a channel token. Unknown tokens return `None`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "signal" => Some(Self::Signal),
            "obsidian" => Some(Self::Obsidian),
            "digest" => Some(Self::Digest),
            "web" => Some(Self::Web),
            _ => None,
        }
    }

    /// Returns the canonical token.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Obsidian => "obsidian",
            Self::Digest => "digest",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routing decision, with the channel once selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "channel", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteDecision {
    /// Deliver now.
    Notify(Option<Channel>),
    /// Collect into a digest.
    Batch,
    /// Hold until conditions change.
    Defer,
    /// Record without delivering.
    LogOnly,
    /// Deliver with stepped-up severity.
    Escalate(Option<Channel>),
}

impl RouteDecision {
    /// Returns whether the decision delivers a notification.
    #[must_use]
    pub fn is_delivering(&self) -> bool {
        matches!(self, Self::Notify(_) | Self::Escalate(_))
    }

    /// Returns the selected channel, if any.
    #[must_use]
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Self::Notify(channel) | Self::Escalate(channel) => *channel,
            _ => None,
        }
    }

    /// Replaces the channel on a delivering decision.
    #[must_use]
    pub fn with_channel(self, channel: Channel) -> Self {
        match self {
            Self::Notify(_) => Self::Notify(Some(channel)),
            Self::Escalate(_) => Self::Escalate(Some(channel)),
            other => other,
        }
    }

    /// Renders the decision string (`NOTIFY:signal`, `LOG_ONLY`, ...).
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Notify(Some(channel)) => format!("NOTIFY:{channel}"),
            Self::Notify(None) => "NOTIFY".to_string(),
            Self::Batch => "BATCH".to_string(),
            Self::Defer => "DEFER".to_string(),
            Self::LogOnly => "LOG_ONLY".to_string(),
            Self::Escalate(Some(channel)) => format!("ESCALATE:{channel}"),
            Self::Escalate(None) => "ESCALATE".to_string(),
        }
    }
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Inputs for channel selection.
#[derive(Debug, Clone)]
pub struct ChannelSelectionInputs<'a> {
    /// The decision going into selection.
    pub decision: RouteDecision,
    /// The envelope's signal type.
    pub signal_type: &'a str,
    /// Urgency score in [0, 1].
    pub urgency: f64,
    /// Channel cost in [0, 1].
    pub channel_cost: f64,
    /// The envelope's content type.
    pub content_type: &'a str,
}

/// Resolves the channel for a delivering decision.
///
/// Non-delivering decisions pass through unchanged. A delivering
/// decision keeps its channel when one is already set; otherwise:
/// analysis content routes to Obsidian, failure signals and high
/// urgency route to Signal, high channel cost routes to the digest,
/// and everything else goes to the web surface.
#[must_use]
pub fn select_channel(inputs: ChannelSelectionInputs<'_>) -> RouteDecision {
    if !inputs.decision.is_delivering() {
        return inputs.decision;
    }
    if let Some(channel) = inputs.decision.channel() {
        return inputs.decision.with_channel(channel);
    }
    let primary = if inputs.content_type == "analysis" {
        Channel::Obsidian
    } else if inputs.signal_type.ends_with("failed") || inputs.urgency >= HIGH_URGENCY {
        Channel::Signal
    } else if inputs.channel_cost >= HIGH_CHANNEL_COST {
        Channel::Digest
    } else {
        Channel::Web
    };
    inputs.decision.with_channel(primary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_parse_roundtrip() {
        for token in ["signal", "obsidian", "digest", "web"] {
            let channel = Channel::parse(token).expect("known channel");
            assert_eq!(channel.as_str(), token);
        }
        assert!(Channel::parse("carrier_pigeon").is_none());
    }

    #[test]
    fn decision_rendering() {
        assert_eq!(
            RouteDecision::Notify(Some(Channel::Signal)).render(),
            "NOTIFY:signal"
        );
        assert_eq!(RouteDecision::LogOnly.render(), "LOG_ONLY");
        assert_eq!(
            RouteDecision::Escalate(Some(Channel::Digest)).render(),
            "ESCALATE:digest"
        );
    }

    fn inputs<'a>(
        decision: RouteDecision,
        signal_type: &'a str,
        urgency: f64,
        channel_cost: f64,
        content_type: &'a str,
    ) -> ChannelSelectionInputs<'a> {
        ChannelSelectionInputs {
            decision,
            signal_type,
            urgency,
            channel_cost,
            content_type,
        }
    }

    #[test]
    fn analysis_content_routes_to_obsidian() {
        let decision = select_channel(inputs(
            RouteDecision::Notify(None),
            "analysis.ready",
            0.2,
            0.1,
            "analysis",
        ));
        assert_eq!(decision.channel(), Some(Channel::Obsidian));
    }

    #[test]
    fn failure_signals_route_to_signal() {
        let decision = select_channel(inputs(
            RouteDecision::Notify(None),
            "execution.failed",
            0.3,
            0.1,
            "text",
        ));
        assert_eq!(decision.channel(), Some(Channel::Signal));
    }

    #[test]
    fn high_urgency_routes_to_signal() {
        let decision = select_channel(inputs(
            RouteDecision::Escalate(None),
            "status.update",
            0.9,
            0.1,
            "text",
        ));
        assert_eq!(decision.channel(), Some(Channel::Signal));
    }

    #[test]
    fn high_cost_routes_to_digest() {
        let decision = select_channel(inputs(
            RouteDecision::Notify(None),
            "status.update",
            0.3,
            0.8,
            "text",
        ));
        assert_eq!(decision.channel(), Some(Channel::Digest));
    }

    #[test]
    fn default_routes_to_web() {
        let decision = select_channel(inputs(
            RouteDecision::Notify(None),
            "status.update",
            0.3,
            0.1,
            "text",
        ));
        assert_eq!(decision.channel(), Some(Channel::Web));
    }

    #[test]
    fn non_delivering_decisions_pass_through() {
        let decision = select_channel(inputs(RouteDecision::Defer, "x", 0.9, 0.9, "text"));
        assert_eq!(decision, RouteDecision::Defer);
    }

    #[test]
    fn preset_channel_kept() {
        let decision = select_channel(inputs(
            RouteDecision::Notify(Some(Channel::Web)),
            "execution.failed",
            0.99,
            0.99,
            "analysis",
        ));
        assert_eq!(decision.channel(), Some(Channel::Web));
    }
}
