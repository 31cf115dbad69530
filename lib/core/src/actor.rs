//! Actor identity for mutations and audit records.
//!
//! Every state change records who caused it: a human, the system acting
//! autonomously, or a scheduled timer firing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The category of identity behind a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// A human operator or end user.
    Human,
    /// The system acting autonomously.
    System,
    /// A scheduled timer firing.
    Scheduled,
}

impl ActorKind {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::System => "system",
            Self::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity that caused a mutation, carried into audit rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Actor category.
    pub kind: ActorKind,
    /// Stable identifier of the actor (user handle, component name).
    pub id: String,
    /// Channel the actor acted through, when applicable.
    pub channel: Option<String>,
}

impl Actor {
    /// Creates a human actor.
    #[must_use]
    pub fn human(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Human,
            id: id.into(),
            channel: None,
        }
    }

    /// Creates a system actor identified by component name.
    #[must_use]
    pub fn system(component: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::System,
            id: component.into(),
            channel: None,
        }
    }

    /// Creates a scheduled actor for timer-driven mutations.
    #[must_use]
    pub fn scheduled() -> Self {
        Self {
            kind: ActorKind::Scheduled,
            id: "scheduler".to_string(),
            channel: None,
        }
    }

    /// Sets the channel the actor acted through.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_kind_strings() {
        assert_eq!(ActorKind::Human.as_str(), "human");
        assert_eq!(ActorKind::System.as_str(), "system");
        assert_eq!(ActorKind::Scheduled.as_str(), "scheduled");
    }

    #[test]
    fn actor_constructors() {
        let user = Actor::human("marion").with_channel("signal");
        assert_eq!(user.kind, ActorKind::Human);
        assert_eq!(user.channel.as_deref(), Some("signal"));

        let system = Actor::system("miss_detection");
        assert_eq!(system.kind, ActorKind::System);
        assert_eq!(system.id, "miss_detection");

        assert_eq!(Actor::scheduled().kind, ActorKind::Scheduled);
    }
}
