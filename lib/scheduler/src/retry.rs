//! Retry and backoff policy for scheduled executions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry immediately.
    None,
    /// Wait the base delay between every attempt.
    #[default]
    Fixed,
    /// Wait base * 2^(retry_count - 1).
    Exponential,
}

impl BackoffStrategy {
    /// Parses a configuration string.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown strategy names.
    pub fn parse(value: &str) -> Result<Self, SchedulerError> {
        match value {
            "none" => Ok(Self::None),
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(SchedulerError::validation(format!(
                "unknown backoff strategy '{other}'"
            ))),
        }
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fixed => "fixed",
            Self::Exponential => "exponential",
        }
    }
}

/// Retry configuration for scheduled executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Backoff strategy between attempts.
    pub backoff_strategy: BackoffStrategy,
    /// Base delay in seconds.
    pub backoff_base_seconds: u32,
}

impl RetryPolicy {
    /// Creates a policy after validating its fields.
    ///
    /// # Errors
    ///
    /// Returns a validation error when `max_attempts` is zero.
    pub fn new(
        max_attempts: u32,
        backoff_strategy: BackoffStrategy,
        backoff_base_seconds: u32,
    ) -> Result<Self, SchedulerError> {
        if max_attempts < 1 {
            return Err(SchedulerError::validation("max_attempts must be >= 1"));
        }
        Ok(Self {
            max_attempts,
            backoff_strategy,
            backoff_base_seconds,
        })
    }

    /// Returns whether another retry attempt is permitted.
    #[must_use]
    pub fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Computes the delay in seconds before the `retry_count`-th retry.
    ///
    /// `retry_count` is 1-based: the first retry is retry 1.
    #[must_use]
    pub fn backoff_delay_seconds(&self, retry_count: u32) -> u64 {
        debug_assert!(retry_count >= 1, "retry_count must be >= 1");
        let base = u64::from(self.backoff_base_seconds);
        match self.backoff_strategy {
            BackoffStrategy::None => 0,
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                base.saturating_mul(1u64 << (retry_count.saturating_sub(1)).min(32))
            }
        }
    }

    /// Computes the next retry timestamp from the finish time of the
    /// failed attempt.
    #[must_use]
    pub fn compute_retry_at(&self, finished_at: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        finished_at + Duration::seconds(self.backoff_delay_seconds(retry_count) as i64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_strategy: BackoffStrategy::Fixed,
            backoff_base_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy(strategy: BackoffStrategy, base: u32) -> RetryPolicy {
        RetryPolicy::new(3, strategy, base).expect("valid policy")
    }

    #[test]
    fn backoff_none_is_zero() {
        let p = policy(BackoffStrategy::None, 30);
        assert_eq!(p.backoff_delay_seconds(1), 0);
        assert_eq!(p.backoff_delay_seconds(5), 0);
    }

    #[test]
    fn backoff_fixed_is_base() {
        let p = policy(BackoffStrategy::Fixed, 30);
        assert_eq!(p.backoff_delay_seconds(1), 30);
        assert_eq!(p.backoff_delay_seconds(4), 30);
    }

    #[test]
    fn backoff_exponential_doubles() {
        let p = policy(BackoffStrategy::Exponential, 30);
        assert_eq!(p.backoff_delay_seconds(1), 30);
        assert_eq!(p.backoff_delay_seconds(2), 60);
        assert_eq!(p.backoff_delay_seconds(3), 120);
        assert_eq!(p.backoff_delay_seconds(4), 240);
    }

    #[test]
    fn compute_retry_at_offsets_finish_time() {
        let p = policy(BackoffStrategy::Exponential, 30);
        let finished = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(
            p.compute_retry_at(finished, 1),
            finished + Duration::seconds(30)
        );
        assert_eq!(
            p.compute_retry_at(finished, 3),
            finished + Duration::seconds(120)
        );
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let p = policy(BackoffStrategy::Fixed, 10);
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn zero_max_attempts_rejected() {
        let result = RetryPolicy::new(0, BackoffStrategy::Fixed, 10);
        assert!(result.is_err());
    }

    #[test]
    fn strategy_parse_roundtrip() {
        for name in ["none", "fixed", "exponential"] {
            let parsed = BackoffStrategy::parse(name).expect("parses");
            assert_eq!(parsed.as_str(), name);
        }
        assert!(BackoffStrategy::parse("jitter").is_err());
    }
}
