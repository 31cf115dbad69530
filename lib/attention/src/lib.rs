//! Attention router for the minder platform.
//!
//! Every outbound notification passes through the router in this crate:
//!
//! - **Envelope validation**: provenance-bearing notification envelopes
//! - **Assessment → policy → preferences → rate limit → escalation →
//!   channel selection**: the routing pipeline, each step audited
//! - **Router gate**: a request-scoped router-active flag that
//!   transports refuse to send without
//! - **Fail-closed queue**: outbound signals persisted when the router
//!   or policy path is unavailable
//! - **Batching**: deferred signals collected into ranked digests and
//!   re-delivered through the same pipeline

pub mod assessment;
pub mod batching;
pub mod channel;
pub mod envelope;
pub mod error;
pub mod escalation;
pub mod fail_closed;
pub mod gate;
pub mod history;
pub mod policy;
pub mod preferences;
pub mod rate_limit;
pub mod router;
pub mod store;
pub mod transport;

pub use assessment::{HIGH_CHANNEL_COST, HIGH_CONFIDENCE, HIGH_URGENCY};
pub use batching::{BatchCreationResult, BatchScheduleConfig, BatchSummaryResult, BatchingService};
pub use channel::{Channel, RouteDecision};
pub use envelope::{
    EnvelopeValidation, EscalationHints, NotificationDescriptor, ProvenanceInput, RoutingEnvelope,
    SignalPayload,
};
pub use error::{AttentionStoreError, RouterError, TransportError};
pub use escalation::{EscalationDecision, EscalationInput, EscalationLevel};
pub use fail_closed::{FailClosedConfig, FailClosedRouter};
pub use gate::{DeliveryContext, RouterViolation, ViolationRecorder};
pub use history::{
    Batch, BatchSummary, BatchType, BatchedSignal, DecisionRecord, DeferredSignal,
    EscalationLogEntry, FailClosedEntry, NotificationHistoryEntry,
};
pub use policy::{
    default_policies, AttentionPolicy, PolicyEngine, PolicyOutcome, PolicyOutcomeKind, PolicyScope,
    PreferenceCondition, ScoreRange, UrgencyConstraint, UrgencyLevel,
};
pub use preferences::{OwnerPreferences, PreferenceFlags, TimeWindow};
pub use rate_limit::{RateLimitConfig, RateLimitDecision};
pub use router::{AttentionRouter, RouterConfig, RoutingOutcome};
pub use store::{AttentionStore, InMemoryAttentionStore};
pub use transport::{OutboundMessage, RecordingTransport, Transport, TransportRegistry};
