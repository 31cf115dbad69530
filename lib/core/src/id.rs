//! Strongly-typed ID types for domain entities.
//!
//! Entity ids are positive integers assigned by the persistence layer,
//! matching the provider callback contract (`schedule_id: int > 0`).
//! Trace tokens use ULID (Universally Unique Lexicographically Sortable
//! Identifier) format, providing both uniqueness and temporal ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to generate a strongly-typed ID wrapper around a store-assigned integer.
macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw store-assigned id.
            #[must_use]
            pub const fn from_i64(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw integer value.
            #[must_use]
            pub const fn as_i64(&self) -> i64 {
                self.0
            }

            /// Returns true when the id is a valid store-assigned id.
            #[must_use]
            pub const fn is_valid(&self) -> bool {
                self.0 > 0
            }

            /// Returns the prefix used for display formatting.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let prefix_with_underscore = concat!($prefix, "_");
                let raw = s.strip_prefix(prefix_with_underscore).unwrap_or(s);
                raw.parse::<i64>().map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_entity_id!(
    /// Unique identifier for a task intent.
    TaskIntentId,
    "intent"
);

define_entity_id!(
    /// Unique identifier for a schedule.
    ScheduleId,
    "sched"
);

define_entity_id!(
    /// Unique identifier for a single execution of a schedule.
    ExecutionId,
    "exec"
);

define_entity_id!(
    /// Unique identifier for a commitment.
    CommitmentId,
    "cmt"
);

define_entity_id!(
    /// Unique identifier for a transition or creation proposal.
    ProposalId,
    "prop"
);

/// The single identifier threaded through callbacks, executions, and audits.
///
/// Trace ids originate with the timer provider or are minted here for
/// manual runs; they are opaque strings with a ULID constructor for
/// locally generated traces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Mints a new locally generated trace id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("trace_{}", Ulid::new()))
    }

    /// Wraps a provider-supplied trace id.
    #[must_use]
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the trace id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the trace id carries non-whitespace content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TraceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TraceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
