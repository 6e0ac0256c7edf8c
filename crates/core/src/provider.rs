//! Model collaborator traits: generation, embedding, summarization, classification.
//!
//! Each trait is the request/response contract of one external AI service.
//! The pipeline calls them without knowing which backend sits behind them.
//!
//! Implementations: OpenAI-compatible HTTP endpoints, scripted fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{ToolInvocation, Turn};
use crate::tool::ToolDefinition;

/// A generation request: the assembled context plus the tools on offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Assembled context turns (preamble, reference material, history, this turn's transcript)
    pub context: Vec<Turn>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A generation response: plain text, tool calls, or both.
///
/// When tool calls are present the text (if any) is treated as interim
/// reasoning and the first tool call is acted upon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,
}

impl GenerationResponse {
    /// A plain-text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// A single tool-call request.
    pub fn tool_call(invocation: ToolInvocation) -> Self {
        Self {
            tool_calls: vec![invocation],
            ..Self::default()
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// An embedding request for a single query text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub text: String,

    /// Requested output dimensionality
    pub dimension: usize,
}

/// Input to the summarization collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// The summary carried forward so far (empty before the first compaction)
    pub existing_summary: String,

    /// The oldest turns being compacted away
    pub turns: Vec<Turn>,
}

/// Input to the classification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRequest {
    /// Carried summary plus the tail of recent history
    pub prior_context_summary: String,

    pub current_turn_text: String,

    pub attachments_present: bool,

    /// What the tutor covers; the classifier judges "in domain" against it
    pub domain_summary: String,
}

/// The generation collaborator.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Produce either an answer or a tool-call request for the given context.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ProviderError>;
}

/// The embedding collaborator.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text` into a vector of `dimension` floats.
    async fn embed(&self, request: EmbeddingRequest) -> std::result::Result<Vec<f32>, ProviderError>;
}

/// The summarization collaborator.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Merge `existing_summary` and `turns` into one narrative string.
    async fn summarize(&self, request: SummaryRequest) -> std::result::Result<String, ProviderError>;
}

/// The classification collaborator.
///
/// Returns the raw JSON document; schema validation is the router's job so
/// that a malformed response is caught in one place.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: ClassificationRequest,
    ) -> std::result::Result<serde_json::Value, ProviderError>;
}
