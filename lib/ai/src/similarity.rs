//! LLM-backed similarity judgments for commitment dedupe.
//!
//! The score is advisory: callers compare it against the configured
//! dedupe threshold before proposing anything.

use async_trait::async_trait;
use std::sync::Arc;

use crate::backend::{LlmBackend, LlmRequest};
use crate::error::LlmError;

const SIMILARITY_PROMPT: &str = "Rate how likely these two descriptions refer to the same \
commitment, as a single number between 0.0 and 1.0. Reply with only the number.\n\n\
A: {a}\nB: {b}\n";

/// Scores how likely two descriptions refer to the same commitment.
#[async_trait]
pub trait SimilarityScorer: Send + Sync {
    /// Returns a similarity score in [0, 1].
    ///
    /// # Errors
    ///
    /// Returns an error when the judgment cannot be produced.
    async fn similarity(&self, a: &str, b: &str) -> Result<f64, LlmError>;
}

/// An LLM-backed similarity judge.
pub struct LlmSimilarityJudge {
    backend: Arc<dyn LlmBackend>,
}

impl LlmSimilarityJudge {
    /// Creates a judge over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl SimilarityScorer for LlmSimilarityJudge {
    async fn similarity(&self, a: &str, b: &str) -> Result<f64, LlmError> {
        let prompt = SIMILARITY_PROMPT.replace("{a}", a).replace("{b}", b);
        let request = LlmRequest::new(prompt).with_temperature(0.0);
        let response = self.backend.generate(&request).await?;
        parse_score(&response.content)
    }
}

/// A scorer that always returns the same score, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSimilarity(pub f64);

#[async_trait]
impl SimilarityScorer for FixedSimilarity {
    async fn similarity(&self, _a: &str, _b: &str) -> Result<f64, LlmError> {
        Ok(self.0)
    }
}

fn parse_score(content: &str) -> Result<f64, LlmError> {
    let trimmed = content.trim().trim_matches(|c| c == '`' || c == '"');
    let score: f64 = trimmed
        .parse()
        .map_err(|_| LlmError::ResponseParseFailed {
            reason: format!("expected a number, got '{trimmed}'"),
        })?;
    if !(0.0..=1.0).contains(&score) {
        return Err(LlmError::ResponseParseFailed {
            reason: format!("score {score} outside [0, 1]"),
        });
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;

    #[tokio::test]
    async fn judge_parses_scripted_score() {
        let judge = LlmSimilarityJudge::new(Arc::new(ScriptedBackend::always("0.92")));
        let score = judge
            .similarity("Book dentist appointment", "Schedule dentist visit")
            .await
            .expect("score");
        assert!((score - 0.92).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn junk_response_is_parse_error() {
        let judge = LlmSimilarityJudge::new(Arc::new(ScriptedBackend::always("very similar")));
        let err = judge.similarity("a", "b").await.unwrap_err();
        assert!(matches!(err, LlmError::ResponseParseFailed { .. }));
    }

    #[tokio::test]
    async fn out_of_range_score_rejected() {
        let judge = LlmSimilarityJudge::new(Arc::new(ScriptedBackend::always("1.7")));
        assert!(judge.similarity("a", "b").await.is_err());
    }

    #[tokio::test]
    async fn fixed_similarity_for_tests() {
        let scorer = FixedSimilarity(0.5);
        assert_eq!(scorer.similarity("a", "b").await.unwrap(), 0.5);
    }
}
