//! Task intents: stable units of work referenced by schedules.
//!
//! Intents are immutable except by explicit supersession. Deleting an
//! intent cancels the schedules that reference it.

use chrono::{DateTime, Utc};
use minder_core::TaskIntentId;
use serde::{Deserialize, Serialize};

/// A stable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIntent {
    /// Store-assigned identifier.
    pub id: TaskIntentId,
    /// Short human-readable summary.
    pub summary: String,
    /// Longer free-form detail.
    pub detail: Option<String>,
    /// Reference to whatever produced the intent (message id, note path).
    pub origin_reference: Option<String>,
    /// Identity of the creator.
    pub created_by: String,
    /// Intent that supersedes this one, if any.
    pub superseded_by: Option<TaskIntentId>,
    /// When the intent was created.
    pub created_at: DateTime<Utc>,
}

impl TaskIntent {
    /// Returns true when the intent has been superseded.
    #[must_use]
    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }
}

/// Input for creating a task intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTaskIntent {
    /// Short human-readable summary.
    pub summary: String,
    /// Longer free-form detail.
    pub detail: Option<String>,
    /// Reference to whatever produced the intent.
    pub origin_reference: Option<String>,
    /// Identity of the creator.
    pub created_by: String,
}

impl NewTaskIntent {
    /// Creates an intent input with just a summary and creator.
    #[must_use]
    pub fn new(summary: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            detail: None,
            origin_reference: None,
            created_by: created_by.into(),
        }
    }

    /// Adds free-form detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Adds an origin reference.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin_reference = Some(origin.into());
        self
    }
}
