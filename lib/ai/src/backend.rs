//! LLM backend abstraction.
//!
//! One trait, single-shot inference. The concrete drivers (local
//! Ollama, cloud APIs) live with the external collaborators; tests use
//! the scripted backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Mutex;

use crate::error::LlmError;

/// A request to an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// The prompt to send.
    pub prompt: String,
    /// System prompt, if any.
    pub system: Option<String>,
    /// Optional JSON schema for structured output.
    pub output_schema: Option<JsonValue>,
    /// Temperature for sampling.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Creates a request with just a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            output_schema: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Adds an output schema for structured output.
    #[must_use]
    pub fn with_output_schema(mut self, schema: JsonValue) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u32,
    /// Number of output tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A response from an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated content.
    pub content: String,
    /// Structured output, when a schema was provided.
    pub structured_output: Option<JsonValue>,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Model that generated the response.
    pub model: String,
}

impl LlmResponse {
    /// Creates a plain-text response.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            structured_output: None,
            usage: TokenUsage::default(),
            model: "scripted".to_string(),
        }
    }
}

/// Trait for LLM backends.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generates a response for the given request.
    ///
    /// # Errors
    ///
    /// Returns an error when the LLM call fails.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Returns the model name.
    fn model(&self) -> &str;
}

/// A backend that plays back scripted responses, for tests and
/// embedded use.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: Mutex<Vec<Result<LlmResponse, LlmError>>>,
}

impl ScriptedBackend {
    /// Creates a backend that replies with the given responses in
    /// order, then fails.
    #[must_use]
    pub fn new(responses: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }

    /// Creates a backend that always replies with the same text.
    #[must_use]
    pub fn always(content: impl Into<String>) -> Self {
        let content = content.into();
        Self::new(vec![Ok(LlmResponse::text(content))])
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.len() == 1 {
            // The last scripted response repeats.
            return responses[0].clone();
        }
        if responses.is_empty() {
            return Err(LlmError::RequestFailed {
                reason: "scripted backend exhausted".to_string(),
            });
        }
        responses.remove(0)
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder() {
        let request = LlmRequest::new("Compare these.")
            .with_system("You judge similarity.")
            .with_temperature(0.0);
        assert_eq!(request.prompt, "Compare these.");
        assert_eq!(request.system.as_deref(), Some("You judge similarity."));
        assert_eq!(request.temperature, Some(0.0));
    }

    #[test]
    fn token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }

    #[tokio::test]
    async fn scripted_backend_plays_back_then_repeats_last() {
        let backend = ScriptedBackend::new(vec![
            Ok(LlmResponse::text("first")),
            Ok(LlmResponse::text("second")),
        ]);
        let request = LlmRequest::new("x");

        assert_eq!(backend.generate(&request).await.unwrap().content, "first");
        assert_eq!(backend.generate(&request).await.unwrap().content, "second");
        assert_eq!(backend.generate(&request).await.unwrap().content, "second");
    }
}
