//! Rate limiting over notification history.
//!
//! Counts delivered outcomes (NOTIFY*/ESCALATE*) to the same owner and
//! channel inside a sliding window read from the history store. An
//! exceeded limit demotes the decision rather than failing it: high
//! channel cost defers, everything else batches.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::assessment::HIGH_CHANNEL_COST;
use crate::channel::{Channel, RouteDecision};
use crate::error::AttentionStoreError;
use crate::store::AttentionStore;

/// Rate limit configuration for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum delivered notifications per window.
    pub max_per_window: u32,
    /// Window length in seconds.
    pub window_seconds: u32,
}

impl RateLimitConfig {
    /// Creates a config.
    #[must_use]
    pub fn new(max_per_window: u32, window_seconds: u32) -> Self {
        Self {
            max_per_window,
            window_seconds,
        }
    }

    /// Returns whether the config is usable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.max_per_window > 0 && self.window_seconds > 0
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(10, 600)
    }
}

/// Result of a rate limit evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the delivery may proceed.
    pub allowed: bool,
    /// The decision after any demotion.
    pub decision: RouteDecision,
    /// Why the limiter decided as it did.
    pub reason: String,
}

/// Evaluates the rate limit for a delivering decision.
///
/// # Errors
///
/// Returns a store error when history cannot be read.
pub async fn evaluate_rate_limit(
    store: &dyn AttentionStore,
    owner: &str,
    channel: Channel,
    channel_cost: f64,
    timestamp: DateTime<Utc>,
    decision: RouteDecision,
    config: RateLimitConfig,
) -> Result<RateLimitDecision, AttentionStoreError> {
    if !config.is_valid() {
        tracing::error!(
            channel = channel.as_str(),
            "invalid rate limit configuration"
        );
        return Ok(RateLimitDecision {
            allowed: false,
            decision: RouteDecision::LogOnly,
            reason: "invalid_rate_limit_config".to_string(),
        });
    }

    let window_start = timestamp - Duration::seconds(i64::from(config.window_seconds));
    let count = store
        .count_recent_notifications(owner, channel, window_start, timestamp)
        .await?;

    if count < config.max_per_window {
        return Ok(RateLimitDecision {
            allowed: true,
            decision,
            reason: "within_limit".to_string(),
        });
    }

    let demoted = if channel_cost >= HIGH_CHANNEL_COST {
        RouteDecision::Defer
    } else {
        RouteDecision::Batch
    };
    tracing::info!(
        owner,
        channel = channel.as_str(),
        count,
        max = config.max_per_window,
        "rate limit exceeded; demoting decision"
    );
    Ok(RateLimitDecision {
        allowed: false,
        decision: demoted,
        reason: "rate_limit_exceeded".to_string(),
    })
}
