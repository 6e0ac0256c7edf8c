//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/chat/completions` and `/embeddings`.
//!
//! One client backs all four model collaborators:
//! - `Generator`: chat completions with function calling
//! - `Embedder`: the embeddings endpoint with explicit `dimensions`
//! - `Summarizer`: a chat completion with a compaction prompt
//! - `Classifier`: a chat completion in JSON mode

use async_trait::async_trait;
use lectern_config::ProviderConfig;
use lectern_core::error::ProviderError;
use lectern_core::message::{Part, Role, ToolInvocation, Turn};
use lectern_core::provider::*;
use lectern_core::tool::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::prompts;

/// An OpenAI-compatible model provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: "text-embedding-3-small".into(),
            temperature: 0.4,
            max_tokens: None,
            client: build_client(Duration::from_secs(120)),
        }
    }

    /// Create a provider from the `[provider]` config section.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::NotConfigured(
                "No API key. Set provider.api_key or LECTERN_API_KEY.".into(),
            )
        })?;

        Ok(Self {
            name: "openai-compatible".into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: build_client(Duration::from_secs(config.request_timeout_secs)),
        })
    }

    /// Convert turns to OpenAI API messages.
    ///
    /// The API only accepts a `tool` message directly after the assistant
    /// message that made the call. A result delivered later, after the
    /// learner moved on, is sent as system text instead.
    fn to_api_messages(turns: &[Turn]) -> Vec<ApiMessage> {
        let mut open_call: Option<&str> = None;
        let mut messages = Vec::with_capacity(turns.len());

        for turn in turns {
            if let Some(result) = turn.tool_result_part()
                && open_call != Some(result.correlation_id.as_str())
            {
                messages.push(ApiMessage::text("system", turn.render()));
                continue;
            }
            open_call = turn.tool_request_part().map(|inv| inv.correlation_id.as_str());
            messages.push(Self::to_api_message(turn));
        }
        messages
    }

    fn to_api_message(turn: &Turn) -> ApiMessage {
        if let Some(result) = turn.tool_result_part() {
            return ApiMessage {
                role: "tool".into(),
                content: Some(ApiContent::Text(
                    serde_json::to_string(&result.outcome).unwrap_or_default(),
                )),
                tool_calls: None,
                tool_call_id: Some(result.correlation_id.clone()),
            };
        }

        if let Some(invocation) = turn.tool_request_part() {
            let text = turn.text();
            return ApiMessage {
                role: "assistant".into(),
                content: (!text.is_empty()).then_some(ApiContent::Text(text)),
                tool_calls: Some(vec![ApiToolCall {
                    id: invocation.correlation_id.clone(),
                    r#type: "function".into(),
                    function: ApiFunction {
                        name: invocation.name.clone(),
                        arguments: invocation.arguments.to_string(),
                    },
                }]),
                tool_call_id: None,
            };
        }

        let role = match turn.role {
            Role::User => "user",
            Role::Model => "assistant",
            Role::System => "system",
        };

        let content = if turn.has_attachments() {
            ApiContent::Parts(
                turn.parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Text { text } => Some(ApiContentPart::Text { text: text.clone() }),
                        Part::Attachment(a) if a.mime_type.starts_with("image/") => {
                            Some(ApiContentPart::ImageUrl {
                                image_url: ApiImageUrl { url: a.uri.clone() },
                            })
                        }
                        Part::Attachment(a) => Some(ApiContentPart::Text {
                            text: format!("[attachment {} ({})]", a.uri, a.mime_type),
                        }),
                        _ => None,
                    })
                    .collect(),
            )
        } else {
            ApiContent::Text(turn.text())
        };

        ApiMessage {
            role: role.into(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Convert API tool calls back into invocations.
    ///
    /// Arguments that are not valid JSON are passed through as a string so the
    /// tool can report them as invalid.
    fn from_api_tool_calls(calls: Vec<ApiToolCall>) -> Vec<ToolInvocation> {
        calls
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments));
                let mut invocation = ToolInvocation::new(tc.function.name, arguments);
                if !tc.id.is_empty() {
                    invocation.correlation_id = tc.id;
                }
                invocation
            })
            .collect()
    }

    /// POST a JSON body and map HTTP failures to `ProviderError`.
    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))
    }

    fn chat_body(&self, messages: Vec<ApiMessage>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    async fn chat(&self, body: serde_json::Value) -> Result<(ApiMessage, ApiResponseMeta), ProviderError> {
        let api_response: ApiResponse = self.post("/chat/completions", &body).await?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        Ok((
            choice.message,
            ApiResponseMeta {
                model: api_response.model,
                usage: api_response.usage,
            },
        ))
    }

    /// A single-shot prompt: system instructions plus one user message.
    async fn prompt(
        &self,
        instructions: &str,
        input: String,
        json_mode: bool,
    ) -> Result<String, ProviderError> {
        let messages = vec![
            ApiMessage::text("system", instructions),
            ApiMessage::text("user", input),
        ];
        let mut body = self.chat_body(messages);
        if json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let (message, _) = self.chat(body).await?;
        Ok(message.content.map(ApiContent::into_text).unwrap_or_default())
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

#[async_trait]
impl Generator for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let mut body = self.chat_body(Self::to_api_messages(&request.context));
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(
            provider = %self.name,
            model = %self.model,
            turns = request.context.len(),
            "Sending generation request"
        );

        let (message, meta) = self.chat(body).await?;

        let tool_calls = Self::from_api_tool_calls(message.tool_calls.unwrap_or_default());
        let text = message
            .content
            .map(ApiContent::into_text)
            .filter(|t| !t.is_empty());

        if text.is_none() && tool_calls.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "Response carried neither text nor tool calls".into(),
            ));
        }

        Ok(GenerationResponse {
            text,
            tool_calls,
            usage: meta.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: meta.model,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiCompatProvider {
    async fn embed(&self, request: EmbeddingRequest) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": request.text,
            "dimensions": request.dimension,
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %self.embedding_model,
            dimension = request.dimension,
            "Sending embedding request"
        );

        let api_resp: EmbeddingApiResponse = self.post("/embeddings", &body).await?;

        api_resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse("No embedding in response".into()))
    }
}

#[async_trait]
impl Summarizer for OpenAiCompatProvider {
    async fn summarize(&self, request: SummaryRequest) -> Result<String, ProviderError> {
        let input = prompts::summary_input(&request);
        let summary = self.prompt(prompts::SUMMARIZE, input, false).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(ProviderError::InvalidResponse("Empty summary".into()));
        }
        Ok(summary.to_string())
    }
}

#[async_trait]
impl Classifier for OpenAiCompatProvider {
    async fn classify(&self, request: ClassificationRequest) -> Result<serde_json::Value, ProviderError> {
        let input = prompts::classification_input(&request);
        let raw = self.prompt(prompts::CLASSIFY, input, true).await?;

        // Non-JSON output is handed back as a string so the router reports it
        // as a malformed classification rather than a transport failure.
        Ok(serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(ApiContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

impl ApiContent {
    fn into_text(self) -> String {
        match self {
            ApiContent::Text(t) => t,
            ApiContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|p| match p {
                    ApiContentPart::Text { text } => Some(text),
                    ApiContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiImageUrl {
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

struct ApiResponseMeta {
    model: String,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Embedding API types ---

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
