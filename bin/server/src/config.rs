//! Centralized server configuration.
//!
//! Strongly-typed configuration loaded via the `config` crate from
//! environment variables (`MINDER__`-free, `__`-separated sections).
//! Startup validation refuses to run without a sender allowlist.

use serde::Deserialize;
use std::collections::HashMap;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// The owner this instance serves.
    pub owner: String,

    /// The owner's IANA timezone.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Attention configuration.
    #[serde(default)]
    pub attention: AttentionConfig,

    /// Commitment configuration.
    #[serde(default)]
    pub commitments: CommitmentsConfig,

    /// Legacy sender allowlist; empty means deny all.
    #[serde(default)]
    pub allowed_senders: Vec<String>,

    /// Per-channel sender allowlists; preferred over the legacy list.
    #[serde(default)]
    pub allowed_senders_by_channel: HashMap<String, Vec<String>>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Scheduler knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Default maximum attempts per execution.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Default backoff strategy: none, fixed, or exponential.
    #[serde(default = "default_backoff_strategy")]
    pub default_backoff_strategy: String,

    /// Base backoff delay in seconds.
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u32,

    /// Number of timer-callback workers.
    #[serde(default = "default_worker_count")]
    pub callback_workers: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_strategy() -> String {
    "exponential".to_string()
}

fn default_backoff_base_seconds() -> u32 {
    30
}

fn default_worker_count() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: default_max_attempts(),
            default_backoff_strategy: default_backoff_strategy(),
            backoff_base_seconds: default_backoff_base_seconds(),
            callback_workers: default_worker_count(),
        }
    }
}

/// One channel's rate limit.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum delivered notifications per window.
    pub max_per_window: u32,
    /// Window length in seconds.
    pub window_seconds: u32,
}

/// Attention knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct AttentionConfig {
    /// Rate limit per channel name.
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitSettings>,

    /// Ignored-count threshold before escalation.
    #[serde(default = "default_escalation_ignore_threshold")]
    pub escalation_ignore_threshold: u32,

    /// Deadline window in seconds before escalation.
    #[serde(default = "default_escalation_deadline_window")]
    pub escalation_deadline_window_seconds: i64,

    /// Fail-closed retry delay in seconds.
    #[serde(default = "default_fail_closed_retry_delay")]
    pub fail_closed_retry_delay_seconds: u32,

    /// Seconds between fail-closed reprocessing sweeps.
    #[serde(default = "default_fail_closed_sweep_interval")]
    pub fail_closed_sweep_interval_seconds: u64,

    /// Daily batch reminder time (`HH:MM`, owner clock).
    #[serde(default = "default_batch_time")]
    pub batch_daily_time: String,

    /// Number of attention workers.
    #[serde(default = "default_worker_count")]
    pub attention_workers: usize,
}

fn default_escalation_ignore_threshold() -> u32 {
    3
}

fn default_escalation_deadline_window() -> i64 {
    3600
}

fn default_fail_closed_retry_delay() -> u32 {
    900
}

fn default_fail_closed_sweep_interval() -> u64 {
    300
}

fn default_batch_time() -> String {
    "08:00".to_string()
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            rate_limits: HashMap::new(),
            escalation_ignore_threshold: default_escalation_ignore_threshold(),
            escalation_deadline_window_seconds: default_escalation_deadline_window(),
            fail_closed_retry_delay_seconds: default_fail_closed_retry_delay(),
            fail_closed_sweep_interval_seconds: default_fail_closed_sweep_interval(),
            batch_daily_time: default_batch_time(),
            attention_workers: default_worker_count(),
        }
    }
}

/// Commitment knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitmentsConfig {
    /// Confidence cutoff for autonomous system transitions.
    #[serde(default = "default_autonomy_threshold")]
    pub autonomous_transition_confidence_threshold: f64,

    /// Confidence cutoff for autonomous agent creations.
    #[serde(default = "default_autonomy_threshold")]
    pub autonomous_creation_confidence_threshold: f64,

    /// Similarity cutoff for dedupe proposals.
    #[serde(default = "default_dedupe_threshold")]
    pub dedupe_confidence_threshold: f64,

    /// Word cap on dedupe candidate summaries.
    #[serde(default = "default_dedupe_word_cap")]
    pub dedupe_summary_word_cap: usize,

    /// Transition audit retention, in days.
    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: u32,

    /// Weekday the weekly review runs (0 = Monday).
    #[serde(default)]
    pub review_day: u8,

    /// Weekly review time (`HH:MM`, owner clock).
    #[serde(default = "default_review_time")]
    pub review_time: String,
}

fn default_autonomy_threshold() -> f64 {
    0.8
}

fn default_dedupe_threshold() -> f64 {
    0.8
}

fn default_dedupe_word_cap() -> usize {
    40
}

fn default_audit_retention_days() -> u32 {
    365
}

fn default_review_time() -> String {
    "09:00".to_string()
}

impl Default for CommitmentsConfig {
    fn default() -> Self {
        Self {
            autonomous_transition_confidence_threshold: default_autonomy_threshold(),
            autonomous_creation_confidence_threshold: default_autonomy_threshold(),
            dedupe_confidence_threshold: default_dedupe_threshold(),
            dedupe_summary_word_cap: default_dedupe_word_cap(),
            audit_retention_days: default_audit_retention_days(),
            review_day: 0,
            review_time: default_review_time(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let loaded: Self = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Validates cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns an error when no sender allowlist is configured: an
    /// empty allowlist means deny-all, and a process with nobody to
    /// talk to refuses to start.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.allowed_senders.is_empty() && self.allowed_senders_by_channel.is_empty() {
            return Err(config::ConfigError::Message(
                "ALLOWED_SENDERS or ALLOWED_SENDERS_BY_CHANNEL must be configured".to_string(),
            ));
        }
        if self
            .allowed_senders_by_channel
            .values()
            .all(|senders| senders.is_empty())
            && self.allowed_senders.is_empty()
        {
            return Err(config::ConfigError::Message(
                "sender allowlists are present but empty".to_string(),
            ));
        }
        if !matches!(
            self.scheduler.default_backoff_strategy.as_str(),
            "none" | "fixed" | "exponential"
        ) {
            return Err(config::ConfigError::Message(format!(
                "unknown backoff strategy '{}'",
                self.scheduler.default_backoff_strategy
            )));
        }
        Ok(())
    }

    /// Returns whether a sender may use a channel.
    #[must_use]
    pub fn sender_allowed(&self, channel: &str, sender: &str) -> bool {
        if let Some(senders) = self.allowed_senders_by_channel.get(channel) {
            return senders.iter().any(|s| s == sender);
        }
        self.allowed_senders.iter().any(|s| s == sender)
    }
}
