//! Routing envelopes.
//!
//! The structured payload the router consumes. Every envelope carries a
//! provenance-bearing notification descriptor; envelopes without one
//! are demoted to LOG_ONLY rather than rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::channel::Channel;

/// The current envelope version.
pub const ENVELOPE_VERSION: u32 = 1;

/// One provenance input behind a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceInput {
    /// Kind of input (message, note, execution, proposal_ref, ...).
    pub input_type: String,
    /// Stable reference to the input.
    pub reference: String,
    /// Optional human-readable description.
    pub description: Option<String>,
}

impl ProvenanceInput {
    /// Creates a provenance input.
    #[must_use]
    pub fn new(input_type: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            input_type: input_type.into(),
            reference: reference.into(),
            description: None,
        }
    }

    /// Adds a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The provenance-bearing notification descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDescriptor {
    /// Descriptor schema version.
    pub version: u32,
    /// The component that produced the notification.
    pub source_component: String,
    /// The signal that originated it.
    pub origin_signal: String,
    /// Producer confidence in [0, 1].
    pub confidence: f64,
    /// At least one provenance input.
    pub provenance: Vec<ProvenanceInput>,
}

impl NotificationDescriptor {
    /// Creates a descriptor with the current version.
    #[must_use]
    pub fn new(
        source_component: impl Into<String>,
        origin_signal: impl Into<String>,
        confidence: f64,
        provenance: Vec<ProvenanceInput>,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            source_component: source_component.into(),
            origin_signal: origin_signal.into(),
            confidence,
            provenance,
        }
    }
}

/// Message payload for channels that deliver text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPayload {
    /// Sending identity.
    pub from: String,
    /// Receiving identity.
    pub to: String,
    /// Message body.
    pub message: String,
}

/// Metadata the escalation step consumes, supplied by the producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationHints {
    /// How many times this signal has been ignored.
    pub ignored_count: Option<u32>,
    /// The deadline the signal is tracking.
    pub deadline: Option<DateTime<Utc>>,
    /// Severity the last time the signal was routed.
    pub previous_severity: Option<i32>,
    /// Severity now.
    pub current_severity: Option<i32>,
}

impl EscalationHints {
    /// Returns true when no hint is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ignored_count.is_none()
            && self.deadline.is_none()
            && self.previous_severity.is_none()
            && self.current_severity.is_none()
    }
}

/// The envelope the router consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEnvelope {
    /// Envelope schema version.
    pub version: u32,
    /// Dotted signal type (`commitment.missed`, `digest.ready`, ...).
    pub signal_type: String,
    /// Stable reference for this signal.
    pub signal_reference: String,
    /// The acting identity that produced the signal.
    pub actor: String,
    /// The owner the signal is for.
    pub owner: String,
    /// Producer's channel preference, if any.
    pub channel_hint: Option<Channel>,
    /// Urgency score in [0, 1].
    pub urgency: f64,
    /// Cost of interrupting on the preferred channel, in [0, 1].
    pub channel_cost: f64,
    /// Content type (`text`, `analysis`, ...).
    pub content_type: String,
    /// When the signal was produced.
    pub timestamp: DateTime<Utc>,
    /// Deliverable message payload.
    pub signal_payload: Option<SignalPayload>,
    /// The provenance-bearing descriptor. Absent descriptors demote the
    /// envelope to LOG_ONLY.
    pub notification: Option<NotificationDescriptor>,
    /// Optional escalation metadata.
    #[serde(default)]
    pub escalation: EscalationHints,
    /// Free-form payload for audit context.
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

/// Result of validating an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeValidation {
    /// The envelope may proceed through the pipeline.
    Accept,
    /// The envelope is demoted to LOG_ONLY with the listed problems.
    LogOnly { errors: Vec<String> },
}

impl RoutingEnvelope {
    /// Validates the envelope for routing.
    ///
    /// A missing notification descriptor, empty provenance, blank
    /// required descriptor fields, or out-of-range scores demote the
    /// envelope to LOG_ONLY; they are not errors.
    #[must_use]
    pub fn validate(&self) -> EnvelopeValidation {
        let mut errors = Vec::new();

        let Some(notification) = &self.notification else {
            return EnvelopeValidation::LogOnly {
                errors: vec!["notification descriptor is required".to_string()],
            };
        };
        if notification.provenance.is_empty() {
            errors.push("provenance must contain at least one input".to_string());
        }
        for (index, input) in notification.provenance.iter().enumerate() {
            if input.input_type.trim().is_empty() {
                errors.push(format!("provenance[{index}].input_type must be non-empty"));
            }
            if input.reference.trim().is_empty() {
                errors.push(format!("provenance[{index}].reference must be non-empty"));
            }
            if input
                .description
                .as_deref()
                .is_some_and(|d| d.trim().is_empty())
            {
                errors.push(format!(
                    "provenance[{index}].description must be non-empty when provided"
                ));
            }
        }
        if notification.source_component.trim().is_empty() {
            errors.push("notification.source_component must be non-empty".to_string());
        }
        if notification.origin_signal.trim().is_empty() {
            errors.push("notification.origin_signal must be non-empty".to_string());
        }
        if !(0.0..=1.0).contains(&notification.confidence) {
            errors.push("notification.confidence must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.urgency) {
            errors.push("urgency must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.channel_cost) {
            errors.push("channel_cost must be within [0, 1]".to_string());
        }
        if self.owner.trim().is_empty() {
            errors.push("owner must be non-empty".to_string());
        }
        if self.signal_reference.trim().is_empty() {
            errors.push("signal_reference must be non-empty".to_string());
        }

        if errors.is_empty() {
            EnvelopeValidation::Accept
        } else {
            EnvelopeValidation::LogOnly { errors }
        }
    }

    /// Returns the descriptor confidence, zero when absent.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.notification.as_ref().map_or(0.0, |n| n.confidence)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn envelope() -> RoutingEnvelope {
        RoutingEnvelope {
            version: ENVELOPE_VERSION,
            signal_type: "status.update".to_string(),
            signal_reference: "status:42".to_string(),
            actor: "system".to_string(),
            owner: "marion".to_string(),
            channel_hint: None,
            urgency: 0.5,
            channel_cost: 0.2,
            content_type: "text".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 4, 1, 14, 0, 0).unwrap(),
            signal_payload: Some(SignalPayload {
                from: "+31600000001".to_string(),
                to: "+31600000002".to_string(),
                message: "Heads up".to_string(),
            }),
            notification: Some(NotificationDescriptor::new(
                "status_reporter",
                "status:42",
                0.9,
                vec![ProvenanceInput::new("execution", "exec_7")],
            )),
            escalation: EscalationHints::default(),
            metadata: None,
        }
    }

    #[test]
    fn valid_envelope_accepted() {
        assert_eq!(envelope().validate(), EnvelopeValidation::Accept);
    }

    #[test]
    fn missing_descriptor_demotes_to_log_only() {
        let mut env = envelope();
        env.notification = None;
        let EnvelopeValidation::LogOnly { errors } = env.validate() else {
            panic!("expected LOG_ONLY");
        };
        assert!(errors[0].contains("notification descriptor"));
    }

    #[test]
    fn empty_provenance_demotes_to_log_only() {
        let mut env = envelope();
        env.notification.as_mut().unwrap().provenance.clear();
        assert!(matches!(
            env.validate(),
            EnvelopeValidation::LogOnly { .. }
        ));
    }

    #[test]
    fn blank_provenance_fields_demote() {
        let mut env = envelope();
        env.notification.as_mut().unwrap().provenance[0].reference = "   ".to_string();
        assert!(matches!(
            env.validate(),
            EnvelopeValidation::LogOnly { .. }
        ));
    }

    #[test]
    fn out_of_range_scores_demote() {
        let mut env = envelope();
        env.urgency = 1.4;
        assert!(matches!(
            env.validate(),
            EnvelopeValidation::LogOnly { .. }
        ));

        let mut env = envelope();
        env.notification.as_mut().unwrap().confidence = -0.1;
        assert!(matches!(
            env.validate(),
            EnvelopeValidation::LogOnly { .. }
        ));
    }

    #[test]
    fn envelope_serde_roundtrip() {
        let env = envelope();
        let json = serde_json::to_string(&env).expect("serialize");
        let parsed: RoutingEnvelope = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(env, parsed);
    }
}
