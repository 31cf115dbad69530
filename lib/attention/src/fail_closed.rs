//! Fail-closed routing behavior and queueing.
//!
//! When the router or its policy engine is unavailable, outbound
//! signals are persisted instead of delivered, with a retry timestamp.
//! A reprocessing sweep drains the queue once the path recovers;
//! sweeping an empty queue is a no-op.

use chrono::Duration;
use minder_core::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::channel::RouteDecision;
use crate::envelope::RoutingEnvelope;
use crate::error::RouterError;
use crate::history::FailClosedEntry;
use crate::router::{AttentionRouter, RoutingOutcome};
use crate::store::AttentionStore;

/// Configuration for fail-closed behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailClosedConfig {
    /// How long to wait before reprocessing a queued signal.
    pub retry_delay_seconds: u32,
}

impl Default for FailClosedConfig {
    fn default() -> Self {
        Self {
            retry_delay_seconds: 900,
        }
    }
}

/// Fail-closed wrapper around the attention router.
pub struct FailClosedRouter {
    router: Arc<AttentionRouter>,
    store: Arc<dyn AttentionStore>,
    config: FailClosedConfig,
    clock: Arc<dyn Clock>,
}

impl FailClosedRouter {
    /// Creates the wrapper.
    #[must_use]
    pub fn new(
        router: Arc<AttentionRouter>,
        store: Arc<dyn AttentionStore>,
        config: FailClosedConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            router,
            store,
            config,
            clock,
        }
    }

    /// Routes a signal, queueing it instead when failing closed.
    ///
    /// `router_available` and `policy_available` come from the caller's
    /// health view; a pipeline error also queues the signal. The caller
    /// observes LOG_ONLY either way.
    ///
    /// # Errors
    ///
    /// Returns a router error only when even the fail-closed queue
    /// cannot be written.
    pub async fn route(
        &self,
        envelope: &RoutingEnvelope,
        router_available: bool,
        policy_available: bool,
    ) -> Result<RoutingOutcome, RouterError> {
        if !router_available || !policy_available {
            let reason = if router_available {
                "policy_unavailable"
            } else {
                "router_unavailable"
            };
            return self.queue(envelope, reason).await;
        }
        match self.router.route(envelope).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(
                    signal_reference = %envelope.signal_reference,
                    error = %err,
                    "routing failed; failing closed"
                );
                self.queue(envelope, "router_error").await
            }
        }
    }

    /// Reprocesses queued signals whose retry time has passed.
    ///
    /// Returns the number of entries drained. An empty queue is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns a router error when the queue cannot be read.
    pub async fn reprocess_queue(&self) -> Result<usize, RouterError> {
        let now = self.clock.now();
        let due = self.store.due_fail_closed(now).await?;
        let mut processed = 0;
        for (id, entry) in due {
            match self.router.route(&entry.envelope).await {
                Ok(_) => {
                    self.store.delete_fail_closed(id).await?;
                    processed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        entry_id = id,
                        error = %err,
                        "fail-closed reprocess attempt failed; entry kept"
                    );
                }
            }
        }
        Ok(processed)
    }

    async fn queue(
        &self,
        envelope: &RoutingEnvelope,
        reason: &str,
    ) -> Result<RoutingOutcome, RouterError> {
        let now = self.clock.now();
        self.store
            .enqueue_fail_closed(FailClosedEntry {
                owner: envelope.owner.clone(),
                envelope: envelope.clone(),
                reason: reason.to_string(),
                queued_at: now,
                retry_at: now + Duration::seconds(i64::from(self.config.retry_delay_seconds)),
            })
            .await?;
        tracing::warn!(
            signal_reference = %envelope.signal_reference,
            reason,
            "outbound signal queued fail-closed"
        );
        Ok(RoutingOutcome {
            decision: RouteDecision::LogOnly,
            base_assessment: "LOG_ONLY".to_string(),
            policy_id: None,
            reason: Some(reason.to_string()),
            delivered: false,
            decision_record_id: None,
        })
    }
}
