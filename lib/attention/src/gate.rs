//! Router gate enforcement and violation tracking.
//!
//! The router sets a request-scoped active flag on the delivery context
//! immediately before invoking a transport. Transports refuse contexts
//! without the flag, so no code path can deliver around the router.
//! Violations land in a shared in-memory recorder used for diagnostics
//! and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::error::TransportError;

/// Captured metadata for a blocked direct-delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterViolation {
    /// The component that attempted the delivery.
    pub source_component: String,
    /// The channel it targeted.
    pub channel: String,
    /// Why the attempt was blocked.
    pub reason: String,
    /// When the attempt happened.
    pub timestamp: DateTime<Utc>,
}

/// Shared in-memory recorder for router violations.
#[derive(Debug, Clone, Default)]
pub struct ViolationRecorder {
    violations: Arc<Mutex<Vec<RouterViolation>>>,
}

impl ViolationRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a violation.
    pub fn record(&self, violation: RouterViolation) {
        self.violations.lock().unwrap().push(violation);
    }

    /// Returns recorded violations.
    #[must_use]
    pub fn list(&self) -> Vec<RouterViolation> {
        self.violations.lock().unwrap().clone()
    }

    /// Clears recorded violations.
    pub fn clear(&self) {
        self.violations.lock().unwrap().clear();
    }
}

/// Request-scoped delivery context carried into transports.
///
/// The flag lives on the context, not in process globals: only the
/// router constructs an active context, and only around the delivery
/// call itself.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    router_active: bool,
    recorder: ViolationRecorder,
}

impl DeliveryContext {
    /// A context constructed by the router around a delivery.
    #[must_use]
    pub fn router_scoped(recorder: ViolationRecorder) -> Self {
        Self {
            router_active: true,
            recorder,
        }
    }

    /// A context without router scope; transports will refuse it.
    #[must_use]
    pub fn bare(recorder: ViolationRecorder) -> Self {
        Self {
            router_active: false,
            recorder,
        }
    }

    /// Returns whether the router-active flag is set.
    #[must_use]
    pub fn is_router_active(&self) -> bool {
        self.router_active
    }

    /// Ensures the router-active flag is set, recording a violation and
    /// refusing delivery otherwise.
    ///
    /// # Errors
    ///
    /// Returns a `router_violation` when the flag is not set.
    pub fn ensure_router_active(
        &self,
        source_component: &str,
        channel: &str,
    ) -> Result<(), TransportError> {
        if self.router_active {
            return Ok(());
        }
        tracing::error!(
            source_component,
            channel,
            "direct notification blocked by attention router gate"
        );
        self.recorder.record(RouterViolation {
            source_component: source_component.to_string(),
            channel: channel.to_string(),
            reason: "direct_notification_blocked".to_string(),
            timestamp: Utc::now(),
        });
        Err(TransportError::RouterViolation {
            source_component: source_component.to_string(),
            channel: channel.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_scoped_context_passes() {
        let recorder = ViolationRecorder::new();
        let ctx = DeliveryContext::router_scoped(recorder.clone());
        assert!(ctx.ensure_router_active("reviews", "signal").is_ok());
        assert!(recorder.list().is_empty());
    }

    #[test]
    fn bare_context_records_violation_and_refuses() {
        let recorder = ViolationRecorder::new();
        let ctx = DeliveryContext::bare(recorder.clone());

        let err = ctx.ensure_router_active("reviews", "signal").unwrap_err();
        assert!(matches!(err, TransportError::RouterViolation { .. }));

        let violations = recorder.list();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].source_component, "reviews");
        assert_eq!(violations[0].reason, "direct_notification_blocked");
    }

    #[test]
    fn recorder_clear() {
        let recorder = ViolationRecorder::new();
        let ctx = DeliveryContext::bare(recorder.clone());
        let _ = ctx.ensure_router_active("a", "web");
        assert_eq!(recorder.list().len(), 1);
        recorder.clear();
        assert!(recorder.list().is_empty());
    }
}
