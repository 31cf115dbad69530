//! LLM-based commitment extraction from free text.
//!
//! Extraction output is advisory: candidates carry a confidence score
//! and flow through the creation authority before any state change.
//! Empty input, a missing backend, or unparseable output all yield an
//! empty candidate list rather than an error.

use chrono::{DateTime, Utc};
use minder_ai::{LlmBackend, LlmRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

const MAX_EXTRACTION_CHARS: usize = 8000;

const EXTRACTION_PROMPT: &str = "Extract any commitments, promises, or action items from the \
following text.\n\n\
A commitment is something the person has agreed to do, promised to complete, or needs to take \
action on.\n\n\
For each commitment found, extract:\n\
- description: Clear, concise description of what needs to be done\n\
- due_by: Due date if mentioned (ISO 8601 format, or null if not specified)\n\
- importance: 1 (low), 2 (medium), or 3 (high) - infer from context\n\
- effort: 1 (small), 2 (medium), or 3 (large) - estimate effort required\n\
- confidence: 0.0 to 1.0 - how confident you are this is actually a commitment\n\n\
Return a JSON array of commitments. If no commitments are found, return an empty array.\n\n\
Text to analyze:\n{text}\n";

/// One extracted commitment candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentCandidate {
    /// What needs to be done.
    pub description: String,
    /// Due date, when the text mentions one.
    pub due_by: Option<DateTime<Utc>>,
    /// Importance in [1, 3].
    pub importance: u8,
    /// Effort in [1, 3].
    pub effort: u8,
    /// Extraction confidence in [0, 1].
    pub confidence: f64,
}

/// Extracts commitment candidates from text.
///
/// # Errors
///
/// Never fails: LLM and parse failures are logged and yield an empty
/// list, because extraction is advisory.
pub async fn extract_commitments(
    backend: Option<&Arc<dyn LlmBackend>>,
    text: &str,
) -> Vec<CommitmentCandidate> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let Some(backend) = backend else {
        tracing::debug!("no LLM backend configured; skipping extraction");
        return Vec::new();
    };

    let mut text = text.to_string();
    if text.len() > MAX_EXTRACTION_CHARS {
        tracing::info!(
            original = text.len(),
            truncated = MAX_EXTRACTION_CHARS,
            "truncating text for extraction"
        );
        let mut cut = MAX_EXTRACTION_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n\n[... truncated ...]");
    }

    let prompt = EXTRACTION_PROMPT.replace("{text}", &text);
    let response = match backend.generate(&LlmRequest::new(prompt)).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "commitment extraction failed");
            return Vec::new();
        }
    };

    parse_candidates(&response.content)
}

fn parse_candidates(content: &str) -> Vec<CommitmentCandidate> {
    let body = strip_code_fences(content);
    let parsed: JsonValue = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "extraction output is not valid JSON");
            return Vec::new();
        }
    };
    let Some(items) = parsed.as_array() else {
        tracing::warn!("extraction output is not a JSON array");
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for item in items {
        let Some(object) = item.as_object() else {
            continue;
        };
        let Some(description) = object
            .get("description")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
        else {
            continue;
        };
        let due_by = object
            .get("due_by")
            .and_then(JsonValue::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        candidates.push(CommitmentCandidate {
            description: description.to_string(),
            due_by,
            importance: clamp_int(object.get("importance"), 2),
            effort: clamp_int(object.get("effort"), 2),
            confidence: clamp_float(object.get("confidence"), 0.5),
        });
    }
    candidates
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };
    inner.strip_prefix("json").unwrap_or(inner).trim()
}

fn clamp_int(value: Option<&JsonValue>, default: u8) -> u8 {
    value
        .and_then(JsonValue::as_i64)
        .map(|v| v.clamp(1, 3) as u8)
        .unwrap_or(default)
}

fn clamp_float(value: Option<&JsonValue>, default: f64) -> f64 {
    value
        .and_then(JsonValue::as_f64)
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minder_ai::{LlmResponse, ScriptedBackend};

    fn backend(content: &str) -> Arc<dyn LlmBackend> {
        Arc::new(ScriptedBackend::new(vec![Ok(LlmResponse::text(content))]))
    }

    #[tokio::test]
    async fn extracts_and_normalizes_candidates() {
        let backend = backend(
            r#"[
                {"description": "Review the quarterly report", "due_by": "2026-04-10T17:00:00Z",
                 "importance": 5, "effort": 0, "confidence": 1.7},
                {"description": "  ", "importance": 2},
                {"description": "Call the plumber"}
            ]"#,
        );
        let candidates = extract_commitments(Some(&backend), "some text").await;

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].description, "Review the quarterly report");
        assert!(candidates[0].due_by.is_some());
        // Out-of-range values clamp.
        assert_eq!(candidates[0].importance, 3);
        assert_eq!(candidates[0].effort, 1);
        assert!((candidates[0].confidence - 1.0).abs() < f64::EPSILON);
        // Defaults fill in.
        assert_eq!(candidates[1].importance, 2);
        assert!((candidates[1].confidence - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn markdown_fences_stripped() {
        let backend = backend("```json\n[{\"description\": \"Water plants\"}]\n```");
        let candidates = extract_commitments(Some(&backend), "text").await;
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn invalid_json_yields_empty() {
        let backend = backend("I found two commitments!");
        assert!(extract_commitments(Some(&backend), "text").await.is_empty());
    }

    #[tokio::test]
    async fn empty_text_and_missing_backend_skip() {
        let backend = backend("[]");
        assert!(extract_commitments(Some(&backend), "   ").await.is_empty());
        assert!(extract_commitments(None, "real text").await.is_empty());
    }
}
