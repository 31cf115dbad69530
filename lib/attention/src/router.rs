//! The attention router pipeline.
//!
//! The single outbound gate: envelope validation, base assessment,
//! policy evaluation, preference application, rate limiting,
//! escalation, channel selection, and delivery. Every step leaves a
//! trail: a notification-history row and a decision record per routed
//! envelope, plus escalation log entries when the level steps up.

use chrono::Duration;
use minder_core::Clock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::assessment::assess;
use crate::channel::{select_channel, Channel, ChannelSelectionInputs, RouteDecision};
use crate::envelope::{EnvelopeValidation, RoutingEnvelope};
use crate::error::RouterError;
use crate::escalation::{evaluate_escalation, EscalationInput};
use crate::gate::{DeliveryContext, ViolationRecorder};
use crate::history::{
    BatchedSignal, DecisionRecord, DeferredSignal, EscalationLogEntry, NotificationHistoryEntry,
};
use crate::policy::PolicyEngine;
use crate::preferences::{apply_preferences, OwnerPreferences};
use crate::rate_limit::{evaluate_rate_limit, RateLimitConfig};
use crate::store::AttentionStore;
use crate::transport::{OutboundMessage, TransportRegistry};

/// Router tuning knobs.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Rate limit per channel. Channels without an entry use the
    /// default config.
    pub rate_limits: HashMap<Channel, RateLimitConfig>,
    /// Ignored-count threshold before escalation.
    pub escalation_ignore_threshold: u32,
    /// How close a deadline must be, in seconds, before escalation.
    pub escalation_deadline_window_seconds: i64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rate_limits: HashMap::new(),
            escalation_ignore_threshold: crate::escalation::DEFAULT_IGNORE_THRESHOLD,
            escalation_deadline_window_seconds:
                crate::escalation::DEFAULT_DEADLINE_WINDOW_SECONDS,
        }
    }
}

impl RouterConfig {
    fn rate_limit_for(&self, channel: Channel) -> RateLimitConfig {
        self.rate_limits
            .get(&channel)
            .copied()
            .unwrap_or_default()
    }
}

/// What the router decided for one envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingOutcome {
    /// The final decision.
    pub decision: RouteDecision,
    /// The base assessment the pipeline started from.
    pub base_assessment: String,
    /// The matched policy, when one matched.
    pub policy_id: Option<String>,
    /// The reason behind a demotion or suppression, when any.
    pub reason: Option<String>,
    /// Whether a transport delivered the message.
    pub delivered: bool,
    /// The persisted decision record id.
    pub decision_record_id: Option<i64>,
}

/// The single outbound gate.
pub struct AttentionRouter {
    store: Arc<dyn AttentionStore>,
    policy_engine: PolicyEngine,
    transports: TransportRegistry,
    recorder: ViolationRecorder,
    config: RouterConfig,
    clock: Arc<dyn Clock>,
}

impl AttentionRouter {
    /// Creates a router.
    #[must_use]
    pub fn new(
        store: Arc<dyn AttentionStore>,
        policy_engine: PolicyEngine,
        transports: TransportRegistry,
        recorder: ViolationRecorder,
        config: RouterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy_engine,
            transports,
            recorder,
            config,
            clock,
        }
    }

    /// Returns the shared violation recorder.
    #[must_use]
    pub fn violation_recorder(&self) -> ViolationRecorder {
        self.recorder.clone()
    }

    /// Routes an envelope through the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns a router error when persistence fails mid-pipeline;
    /// callers wrap the router in [`crate::fail_closed::FailClosedRouter`]
    /// to queue the signal instead of losing it.
    pub async fn route(&self, envelope: &RoutingEnvelope) -> Result<RoutingOutcome, RouterError> {
        // Step 1: envelope validation.
        if let EnvelopeValidation::LogOnly { errors } = envelope.validate() {
            tracing::info!(
                signal_reference = %envelope.signal_reference,
                errors = ?errors,
                "envelope demoted to LOG_ONLY"
            );
            return self
                .finalize(
                    envelope,
                    RouteDecision::LogOnly,
                    "LOG_ONLY".to_string(),
                    None,
                    Some(format!("envelope_invalid: {}", errors.join("; "))),
                )
                .await;
        }

        // Step 2: base assessment against the owner's context.
        let preferences = self
            .store
            .owner_preferences(&envelope.owner)
            .await?
            .unwrap_or_else(|| OwnerPreferences::new(envelope.owner.clone()));
        let flags = preferences.flags_at(&envelope.signal_type, envelope.timestamp);
        let base = assess(envelope, &flags);
        let base_assessment = base.render();

        // Step 3: ordered policies, first match wins.
        let policy_match = self.policy_engine.evaluate(envelope, &flags);
        let (mut decision, policy_id) = match policy_match {
            Some(matched) => (matched.decision, Some(matched.policy_id)),
            None => (base, None),
        };

        // Step 4: owner preferences.
        decision = apply_preferences(decision, envelope, &flags);
        let mut reason: Option<String> = None;

        // Step 5: rate limit on the tentative channel.
        if decision.is_delivering() {
            let tentative = self.resolve_channel(decision, envelope);
            if let Some(channel) = tentative.channel() {
                let limit = evaluate_rate_limit(
                    self.store.as_ref(),
                    &envelope.owner,
                    channel,
                    envelope.channel_cost,
                    self.clock.now(),
                    tentative,
                    self.config.rate_limit_for(channel),
                )
                .await?;
                if !limit.allowed {
                    decision = limit.decision;
                    reason = Some(limit.reason);
                }
            }
        }

        // Step 6: escalation.
        if decision.is_delivering() && !envelope.escalation.is_empty() {
            let current_level = self
                .store
                .latest_escalation_level(&envelope.owner, &envelope.signal_type)
                .await?;
            let input = EscalationInput {
                owner: envelope.owner.clone(),
                signal_type: envelope.signal_type.clone(),
                signal_reference: envelope.signal_reference.clone(),
                current_level,
                ignored_count: envelope.escalation.ignored_count,
                ignore_threshold: self.config.escalation_ignore_threshold,
                deadline: envelope.escalation.deadline,
                deadline_window: Duration::seconds(
                    self.config.escalation_deadline_window_seconds,
                ),
                previous_severity: envelope.escalation.previous_severity,
                current_severity: envelope.escalation.current_severity,
                timestamp: envelope.timestamp,
            };
            let escalation = evaluate_escalation(&input);
            if escalation.escalated {
                let trigger = escalation.trigger.clone().unwrap_or_default();
                decision = RouteDecision::Escalate(decision.channel());
                self.store
                    .append_escalation(EscalationLogEntry {
                        owner: envelope.owner.clone(),
                        signal_type: envelope.signal_type.clone(),
                        signal_reference: envelope.signal_reference.clone(),
                        trigger: trigger.clone(),
                        level: escalation.level,
                        timestamp: envelope.timestamp,
                    })
                    .await?;
                reason = Some(format!("escalated: {trigger}"));
            }
        }

        // Step 7: channel selection.
        decision = self.resolve_channel(decision, envelope);

        self.finalize(envelope, decision, base_assessment, policy_id, reason)
            .await
    }

    fn resolve_channel(
        &self,
        decision: RouteDecision,
        envelope: &RoutingEnvelope,
    ) -> RouteDecision {
        let seeded = match (decision.channel(), envelope.channel_hint) {
            (None, Some(hint)) if decision.is_delivering() => decision.with_channel(hint),
            _ => decision,
        };
        select_channel(ChannelSelectionInputs {
            decision: seeded,
            signal_type: &envelope.signal_type,
            urgency: envelope.urgency,
            channel_cost: envelope.channel_cost,
            content_type: &envelope.content_type,
        })
    }

    // Step 8: delivery, history, and decision record.
    async fn finalize(
        &self,
        envelope: &RoutingEnvelope,
        decision: RouteDecision,
        base_assessment: String,
        policy_id: Option<String>,
        mut reason: Option<String>,
    ) -> Result<RoutingOutcome, RouterError> {
        let now = self.clock.now();
        let mut decision = decision;
        let mut delivered = false;
        let mut suppress_history = false;

        if let Some(channel) = decision.channel() {
            let window = Duration::seconds(i64::from(
                self.config.rate_limit_for(channel).window_seconds,
            ));
            let already = self
                .store
                .find_recent_delivery(&envelope.owner, &envelope.signal_reference, now - window)
                .await?;
            if already.is_some() {
                // Delivery is idempotent under retry: the same signal
                // reference is not re-sent within the window.
                reason = Some("duplicate_delivery_suppressed".to_string());
                suppress_history = true;
            } else {
                match self.deliver(envelope, channel).await {
                    Ok(()) => delivered = true,
                    Err(failure_reason) => {
                        decision = RouteDecision::LogOnly;
                        reason = Some(failure_reason);
                    }
                }
            }
        } else {
            match decision {
                RouteDecision::Batch => {
                    if envelope.signal_type.starts_with("digest.") {
                        // Digests never re-enter the holding area.
                        decision = RouteDecision::LogOnly;
                        reason = Some("digest_not_batchable".to_string());
                    } else {
                        self.store
                            .enqueue_batched(BatchedSignal::from_envelope(envelope))
                            .await?;
                    }
                }
                RouteDecision::Defer => {
                    self.store
                        .enqueue_deferred(DeferredSignal {
                            owner: envelope.owner.clone(),
                            signal_type: envelope.signal_type.clone(),
                            signal_reference: envelope.signal_reference.clone(),
                            message: envelope
                                .signal_payload
                                .as_ref()
                                .map(|p| p.message.clone())
                                .unwrap_or_else(|| envelope.signal_reference.clone()),
                            reason: reason.clone().unwrap_or_else(|| "deferred".to_string()),
                            deferred_at: now,
                        })
                        .await?;
                }
                _ => {}
            }
        }

        let rendered = decision.render();
        if !suppress_history {
            self.store
                .record_history(NotificationHistoryEntry {
                    owner: envelope.owner.clone(),
                    signal_reference: envelope.signal_reference.clone(),
                    signal_type: envelope.signal_type.clone(),
                    outcome: rendered.clone(),
                    channel: decision.channel(),
                    created_at: now,
                })
                .await?;
        }

        let explanation = match (&policy_id, &reason) {
            (Some(policy), Some(reason)) => {
                format!("assessment={base_assessment} policy={policy} reason={reason}")
            }
            (Some(policy), None) => format!("assessment={base_assessment} policy={policy}"),
            (None, Some(reason)) => format!("assessment={base_assessment} reason={reason}"),
            (None, None) => format!("assessment={base_assessment}"),
        };
        let decision_record_id = self
            .store
            .persist_decision(DecisionRecord {
                signal_reference: envelope.signal_reference.clone(),
                owner: envelope.owner.clone(),
                channel: decision.channel(),
                base_assessment: base_assessment.clone(),
                policy_id: policy_id.clone(),
                final_decision: rendered.clone(),
                explanation,
                decided_at: now,
            })
            .await?;

        tracing::debug!(
            signal_reference = %envelope.signal_reference,
            owner = %envelope.owner,
            decision = %rendered,
            delivered,
            "routing decision"
        );

        Ok(RoutingOutcome {
            decision,
            base_assessment,
            policy_id,
            reason,
            delivered,
            decision_record_id: Some(decision_record_id),
        })
    }

    async fn deliver(&self, envelope: &RoutingEnvelope, channel: Channel) -> Result<(), String> {
        let Some(transport) = self.transports.get(channel) else {
            return Err(format!("no_transport_for_{}", channel.as_str()));
        };
        let message = OutboundMessage {
            channel,
            owner: envelope.owner.clone(),
            signal_reference: envelope.signal_reference.clone(),
            source_component: envelope
                .notification
                .as_ref()
                .map(|n| n.source_component.clone())
                .unwrap_or_else(|| "attention_router".to_string()),
            from: envelope.signal_payload.as_ref().map(|p| p.from.clone()),
            to: envelope.signal_payload.as_ref().map(|p| p.to.clone()),
            body: envelope
                .signal_payload
                .as_ref()
                .map(|p| p.message.clone())
                .unwrap_or_else(|| envelope.signal_reference.clone()),
        };
        // The router-active flag is scoped to exactly this call.
        let ctx = DeliveryContext::router_scoped(self.recorder.clone());
        transport.send(&ctx, &message).await.map_err(|e| {
            tracing::warn!(
                channel = channel.as_str(),
                error = %e,
                "transport delivery failed"
            );
            format!("send_failed: {e}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::NotificationHistoryEntry;
    use crate::preferences::TimeWindow;
    use crate::store::InMemoryAttentionStore;
    use crate::transport::RecordingTransport;
    use chrono::{NaiveTime, TimeZone, Utc};
    use minder_core::FixedClock;

    struct Harness {
        store: Arc<InMemoryAttentionStore>,
        transport: Arc<RecordingTransport>,
        router: AttentionRouter,
    }

    fn at(hour: u32, minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, hour, minute, 0).unwrap()
    }

    fn harness(config: RouterConfig, now: chrono::DateTime<Utc>) -> Harness {
        let store = Arc::new(InMemoryAttentionStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let transports = TransportRegistry::new()
            .with_transport(Channel::Signal, transport.clone())
            .with_transport(Channel::Web, transport.clone())
            .with_transport(Channel::Digest, transport.clone())
            .with_transport(Channel::Obsidian, transport.clone());
        let router = AttentionRouter::new(
            store.clone(),
            PolicyEngine::with_defaults(),
            transports,
            ViolationRecorder::new(),
            config,
            Arc::new(FixedClock::new(now)),
        );
        Harness {
            store,
            transport,
            router,
        }
    }

    #[tokio::test]
    async fn missing_descriptor_routes_log_only() {
        let h = harness(RouterConfig::default(), at(14, 0));
        let mut env = crate::envelope::tests::envelope();
        env.notification = None;

        let outcome = h.router.route(&env).await.expect("route");
        assert_eq!(outcome.decision, RouteDecision::LogOnly);
        assert!(!outcome.delivered);
        assert!(outcome.reason.unwrap().starts_with("envelope_invalid"));
        assert_eq!(h.store.history().len(), 1);
        assert_eq!(h.store.decisions().len(), 1);
    }

    #[tokio::test]
    async fn plain_envelope_delivers_on_web() {
        let h = harness(RouterConfig::default(), at(14, 0));
        let env = crate::envelope::tests::envelope();

        let outcome = h.router.route(&env).await.expect("route");
        assert_eq!(outcome.decision.channel(), Some(Channel::Web));
        assert!(outcome.delivered);
        assert_eq!(h.transport.sent().len(), 1);

        let history = h.store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, "NOTIFY:web");
    }

    #[tokio::test]
    async fn quiet_hours_deferral_overridden_by_always_notify() {
        // Scenario: quiet hours 22:00-06:00, always-notify for
        // status.update, envelope at 23:30 with urgency 0.1.
        let h = harness(RouterConfig::default(), at(23, 30));
        let mut prefs = OwnerPreferences::new("marion");
        prefs.quiet_hours.push(TimeWindow::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        ));
        prefs.always_notify.insert("status.update".to_string());
        h.store.upsert_preferences(prefs).await.expect("prefs");

        let mut env = crate::envelope::tests::envelope();
        env.urgency = 0.1;
        env.timestamp = at(23, 30);

        let outcome = h.router.route(&env).await.expect("route");
        assert_eq!(
            outcome.decision,
            RouteDecision::Notify(Some(Channel::Signal))
        );
        assert!(outcome.delivered);
        assert_eq!(outcome.policy_id.as_deref(), Some("always-notify-override"));

        let history = h.store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, "NOTIFY:signal");
    }

    #[tokio::test]
    async fn quiet_hours_defer_without_exception() {
        let h = harness(RouterConfig::default(), at(23, 30));
        let mut prefs = OwnerPreferences::new("marion");
        prefs.quiet_hours.push(TimeWindow::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        ));
        h.store.upsert_preferences(prefs).await.expect("prefs");

        let mut env = crate::envelope::tests::envelope();
        env.urgency = 0.1;
        env.timestamp = at(23, 30);

        let outcome = h.router.route(&env).await.expect("route");
        assert_eq!(outcome.decision, RouteDecision::Defer);
        assert_eq!(h.store.deferred().len(), 1);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_demotes_high_cost_to_defer() {
        // Scenario: three delivered rows in the last 10 minutes with a
        // (max=2, window=600) limit; channel cost 0.9 demotes to DEFER.
        let mut config = RouterConfig::default();
        config
            .rate_limits
            .insert(Channel::Signal, RateLimitConfig::new(2, 600));
        let h = harness(config, at(14, 0));

        for i in 0..3 {
            h.store
                .record_history(NotificationHistoryEntry {
                    owner: "marion".to_string(),
                    signal_reference: format!("older-{i}"),
                    signal_type: "status.update".to_string(),
                    outcome: "NOTIFY:signal".to_string(),
                    channel: Some(Channel::Signal),
                    created_at: at(13, 55),
                })
                .await
                .expect("seed");
        }

        let mut env = crate::envelope::tests::envelope();
        env.channel_hint = Some(Channel::Signal);
        env.channel_cost = 0.9;
        env.timestamp = at(14, 0);

        let outcome = h.router.route(&env).await.expect("route");
        assert_eq!(outcome.decision, RouteDecision::Defer);
        assert_eq!(outcome.reason.as_deref(), Some("rate_limit_exceeded"));
        assert!(h.transport.sent().is_empty());

        // The demotion is visible in the decision record.
        let decisions = h.store.decisions();
        let last = decisions.last().unwrap();
        assert_eq!(last.final_decision, "DEFER");
        assert!(last.explanation.contains("rate_limit_exceeded"));
    }

    #[tokio::test]
    async fn escalation_steps_level_and_logs() {
        let h = harness(RouterConfig::default(), at(14, 0));
        let mut env = crate::envelope::tests::envelope();
        env.escalation.ignored_count = Some(4);

        let outcome = h.router.route(&env).await.expect("route");
        assert!(matches!(outcome.decision, RouteDecision::Escalate(_)));
        assert_eq!(outcome.reason.as_deref(), Some("escalated: ignored_repeatedly"));
        assert!(outcome.delivered);
    }

    #[tokio::test]
    async fn transport_failure_demotes_to_log_only() {
        let h = harness(RouterConfig::default(), at(14, 0));
        h.transport.fail_next("signal api down");
        let env = crate::envelope::tests::envelope();

        let outcome = h.router.route(&env).await.expect("route");
        assert_eq!(outcome.decision, RouteDecision::LogOnly);
        assert!(!outcome.delivered);
        assert!(outcome.reason.unwrap().starts_with("send_failed"));

        let history = h.store.history();
        assert_eq!(history[0].outcome, "LOG_ONLY");
    }

    #[tokio::test]
    async fn repeated_delivery_suppressed_within_window() {
        let h = harness(RouterConfig::default(), at(14, 0));
        let env = crate::envelope::tests::envelope();

        let first = h.router.route(&env).await.expect("first");
        assert!(first.delivered);

        let second = h.router.route(&env).await.expect("second");
        assert!(!second.delivered);
        assert_eq!(
            second.reason.as_deref(),
            Some("duplicate_delivery_suppressed")
        );
        assert_eq!(h.transport.sent().len(), 1);
        // No second history row, so rate counts stay honest.
        assert_eq!(h.store.history().len(), 1);
    }

    #[tokio::test]
    async fn batched_signal_lands_in_holding_area() {
        let h = harness(RouterConfig::default(), at(14, 0));
        let mut env = crate::envelope::tests::envelope();
        env.urgency = 0.2;
        env.channel_cost = 0.9;

        let outcome = h.router.route(&env).await.expect("route");
        assert_eq!(outcome.decision, RouteDecision::Batch);
        assert_eq!(
            h.store
                .pending_batched("marion")
                .await
                .expect("pending")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn digest_signals_never_rebatch() {
        let h = harness(RouterConfig::default(), at(14, 0));
        let mut env = crate::envelope::tests::envelope();
        env.signal_type = "digest.ready".to_string();
        env.urgency = 0.2;
        env.channel_cost = 0.9;

        let outcome = h.router.route(&env).await.expect("route");
        assert_eq!(outcome.decision, RouteDecision::LogOnly);
        assert_eq!(outcome.reason.as_deref(), Some("digest_not_batchable"));
        assert!(h
            .store
            .pending_batched("marion")
            .await
            .expect("pending")
            .is_empty());
    }
}
