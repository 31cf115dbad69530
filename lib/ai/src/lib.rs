//! LLM primitives for the minder platform.
//!
//! The LLM is an external collaborator: this crate defines the backend
//! trait the rest of the system consumes and the advisory judgments
//! built on it. LLM outputs never mutate state directly; they pass
//! confidence thresholds and authority gates first.

pub mod backend;
pub mod error;
pub mod similarity;

pub use backend::{LlmBackend, LlmRequest, LlmResponse, ScriptedBackend, TokenUsage};
pub use error::LlmError;
pub use similarity::{FixedSimilarity, LlmSimilarityJudge, SimilarityScorer};
