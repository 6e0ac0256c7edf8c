//! Tool traits: the abstraction over external capabilities.
//!
//! Tools let the tutor act beyond text: generate an illustration, render a
//! diagram, look up a worked example. A tool may finish synchronously or hand
//! back [`ToolOutcome::Pending`] and deliver its result later, keyed by the
//! invocation's correlation id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ToolError;
use crate::message::ToolInvocation;

/// A tool definition sent to the generation collaborator so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A side-channel media artifact produced by a tool (image, audio, video).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaArtifact {
    pub uri: String,
    pub mime_type: String,
}

/// What came back from a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media: Option<MediaArtifact>,
    },
    Failure {
        reason: String,
    },
    /// Accepted by the tool; the result will arrive out of band.
    Pending,
}

impl ToolOutcome {
    pub fn success(payload: serde_json::Value) -> Self {
        Self::Success {
            payload,
            media: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The media artifact, if this is a successful outcome that produced one.
    pub fn media(&self) -> Option<&MediaArtifact> {
        match self {
            Self::Success { media, .. } => media.as_ref(),
            _ => None,
        }
    }

    /// Plain-text rendering fed back to the generation collaborator.
    pub fn describe(&self) -> String {
        match self {
            Self::Success { payload, media } => match media {
                Some(m) => format!("success: {payload} (media {} {})", m.mime_type, m.uri),
                None => format!("success: {payload}"),
            },
            Self::Failure { reason } => format!("failure: {reason}"),
            Self::Pending => "pending".to_string(),
        }
    }
}

/// A single tool implementation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "generate_image").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool for the given invocation.
    async fn execute(&self, invocation: &ToolInvocation) -> std::result::Result<ToolOutcome, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The tool-execution collaborator as seen by the agent loop.
///
/// Execution never errors: failures are encoded as [`ToolOutcome::Failure`]
/// so the loop can feed them back to the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions of every tool the model may call.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run the named tool.
    async fn execute(&self, invocation: &ToolInvocation) -> ToolOutcome;
}

/// A registry of available tools, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Execute an invocation, surfacing lookup and execution errors.
    pub async fn call(&self, invocation: &ToolInvocation) -> std::result::Result<ToolOutcome, ToolError> {
        let tool = self
            .tools
            .get(&invocation.name)
            .ok_or_else(|| ToolError::NotFound(invocation.name.clone()))?;
        tool.execute(invocation).await
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn execute(&self, invocation: &ToolInvocation) -> ToolOutcome {
        match self.call(invocation).await {
            Ok(outcome) => outcome,
            Err(e) => ToolOutcome::failure(e.to_string()),
        }
    }
}
