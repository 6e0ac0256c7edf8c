//! Media generation tool: asks an external service for an illustration.
//!
//! The service either answers synchronously (`200` with the artifact) or
//! accepts the job (`202`) and posts the result to our callback later. In the
//! second case the tool waits a short grace period on the [`CallbackBroker`];
//! if nothing arrives it reports [`ToolOutcome::Pending`] and the result is
//! delivered to the session once it lands.

use async_trait::async_trait;
use lectern_core::error::ToolError;
use lectern_core::message::ToolInvocation;
use lectern_core::tool::{MediaArtifact, Tool, ToolOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::callback::CallbackBroker;

pub const MEDIA_TOOL_NAME: &str = "generate_media";

pub struct MediaGenerationTool {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
    broker: Arc<CallbackBroker>,
    grace: Duration,
}

impl MediaGenerationTool {
    pub fn new(endpoint: impl Into<String>, broker: Arc<CallbackBroker>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            client: reqwest::Client::new(),
            broker,
            grace: Duration::from_secs(5),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// How long to wait for a callback before reporting the job as pending.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: MEDIA_TOOL_NAME.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MediaJob<'a> {
    prompt: &'a str,
    kind: &'a str,
    correlation_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    uri: String,
    mime_type: String,
}

/// Build the success outcome for a finished artifact.
pub fn artifact_outcome(uri: impl Into<String>, mime_type: impl Into<String>) -> ToolOutcome {
    let artifact = MediaArtifact {
        uri: uri.into(),
        mime_type: mime_type.into(),
    };
    ToolOutcome::Success {
        payload: serde_json::json!({ "uri": artifact.uri, "mime_type": artifact.mime_type }),
        media: Some(artifact),
    }
}

#[async_trait]
impl Tool for MediaGenerationTool {
    fn name(&self) -> &str {
        MEDIA_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Generate an illustration for the learner: a diagram, an image, or a short audio clip. \
         Use it when a picture would explain the concept better than words."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "What to depict, in one or two sentences"
                },
                "kind": {
                    "type": "string",
                    "enum": ["diagram", "image", "audio"],
                    "default": "diagram"
                }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, ToolError> {
        let prompt = invocation.arguments["prompt"]
            .as_str()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'prompt' argument".into()))?;

        let kind = invocation.arguments["kind"].as_str().unwrap_or("diagram");
        if !matches!(kind, "diagram" | "image" | "audio") {
            return Err(ToolError::InvalidArguments(format!(
                "Invalid kind: {kind}. Must be diagram, image, or audio."
            )));
        }

        let correlation_id = invocation.correlation_id.as_str();
        // Registered before sending so a fast callback cannot slip past us.
        let mut registration = self.broker.register(correlation_id);

        let mut request = self.client.post(&self.endpoint).json(&MediaJob {
            prompt,
            kind,
            correlation_id,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Err(self.failed(e.to_string())),
        };

        match response.status().as_u16() {
            200 => {
                let body: MediaResponse = response
                    .json()
                    .await
                    .map_err(|e| self.failed(format!("Unreadable media response: {e}")))?;
                Ok(artifact_outcome(body.uri, body.mime_type))
            }
            202 => {
                debug!(correlation_id, "Media job accepted, waiting for callback");
                Ok(registration
                    .wait(self.grace)
                    .await
                    .unwrap_or(ToolOutcome::Pending))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(status, body = %body, "Media service returned error");
                Err(self.failed(format!("media service returned {status}")))
            }
        }
    }
}
