//! Turn and Part domain types.
//!
//! These are the value objects that flow through the whole pipeline:
//! the learner sends a turn → the router classifies it → the retriever grounds it
//! → the agent loop answers it with model turns (and tool turns in between).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolOutcome;

/// Unique identifier for a tutoring session (one conversation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The learner
    User,
    /// The tutoring model
    Model,
    /// System content: tool results, reference material
    System,
}

/// A reference to a binary attachment (image, PDF page, audio clip).
///
/// The bytes themselves live in blob storage; only the reference travels here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub uri: String,
    pub mime_type: String,
}

/// A structured request from the generation collaborator to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,

    /// Correlates an out-of-band result with this request
    pub correlation_id: String,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

/// The recorded result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPart {
    pub name: String,
    pub correlation_id: String,
    pub outcome: ToolOutcome,
}

/// One piece of a turn's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Attachment(Attachment),
    ToolRequest(ToolInvocation),
    ToolResult(ToolResultPart),
}

/// A single message exchanged in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// Ordered content parts
    pub parts: Vec<Part>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Synthetic context turn (carried summary); never stored in history
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preamble: bool,
}

impl Turn {
    fn with_parts(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            timestamp: Utc::now(),
            preamble: false,
        }
    }

    /// Create a learner turn with text only.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_parts(Role::User, vec![Part::Text { text: text.into() }])
    }

    /// Create a learner turn carrying attachment references after the text.
    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        let mut parts = vec![Part::Text { text: text.into() }];
        parts.extend(attachments.into_iter().map(Part::Attachment));
        Self::with_parts(Role::User, parts)
    }

    /// Create a model text turn.
    pub fn model(text: impl Into<String>) -> Self {
        Self::with_parts(Role::Model, vec![Part::Text { text: text.into() }])
    }

    /// Create a system text turn.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_parts(Role::System, vec![Part::Text { text: text.into() }])
    }

    /// Create the synthetic leading turn that carries a compacted summary.
    pub fn preamble(summary: impl Into<String>) -> Self {
        let mut turn = Self::user(summary);
        turn.preamble = true;
        turn
    }

    /// Create a model turn requesting a tool invocation.
    pub fn tool_request(invocation: ToolInvocation) -> Self {
        Self::with_parts(Role::Model, vec![Part::ToolRequest(invocation)])
    }

    /// Create a system turn carrying a tool result.
    pub fn tool_result(result: ToolResultPart) -> Self {
        Self::with_parts(Role::System, vec![Part::ToolResult(result)])
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_attachments(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Attachment(_)))
    }

    /// The tool request carried by this turn, if any.
    pub fn tool_request_part(&self) -> Option<&ToolInvocation> {
        self.parts.iter().find_map(|p| match p {
            Part::ToolRequest(inv) => Some(inv),
            _ => None,
        })
    }

    /// The tool result carried by this turn, if any.
    pub fn tool_result_part(&self) -> Option<&ToolResultPart> {
        self.parts.iter().find_map(|p| match p {
            Part::ToolResult(res) => Some(res),
            _ => None,
        })
    }

    /// Render the turn as a single line of plain text (for summaries and prompts).
    pub fn render(&self) -> String {
        let role = match self.role {
            Role::User => "Learner",
            Role::Model => "Tutor",
            Role::System => "System",
        };
        let body = self
            .parts
            .iter()
            .map(|p| match p {
                Part::Text { text } => text.clone(),
                Part::Attachment(a) => format!("[attachment {} ({})]", a.uri, a.mime_type),
                Part::ToolRequest(inv) => format!("[called tool {} with {}]", inv.name, inv.arguments),
                Part::ToolResult(res) => format!("[tool {} returned {}]", res.name, res.outcome.describe()),
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("{role}: {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = Turn::user("What is a derivative?");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.text(), "What is a derivative?");
        assert!(!turn.preamble);
        assert!(!turn.has_attachments());
    }

    #[test]
    fn attachments_follow_text() {
        let turn = Turn::user_with_attachments(
            "Check my working",
            vec![Attachment {
                uri: "blob://homework/1.png".into(),
                mime_type: "image/png".into(),
            }],
        );
        assert!(turn.has_attachments());
        assert!(matches!(turn.parts[0], Part::Text { .. }));
        assert_eq!(turn.text(), "Check my working");
    }

    #[test]
    fn preamble_is_marked_user_turn() {
        let turn = Turn::preamble("Earlier we covered limits.");
        assert_eq!(turn.role, Role::User);
        assert!(turn.preamble);
    }

    #[test]
    fn tool_parts_are_discoverable() {
        let inv = ToolInvocation::new("generate_image", serde_json::json!({"prompt": "a cell"}));
        let req = Turn::tool_request(inv.clone());
        assert_eq!(req.tool_request_part(), Some(&inv));
        assert!(req.tool_result_part().is_none());

        let res = Turn::tool_result(ToolResultPart {
            name: inv.name.clone(),
            correlation_id: inv.correlation_id.clone(),
            outcome: ToolOutcome::Failure {
                reason: "offline".into(),
            },
        });
        assert_eq!(res.role, Role::System);
        assert!(res.render().contains("offline"));
    }

    #[test]
    fn turn_serialization_roundtrip() {
        let turn = Turn::model("A derivative measures change.");
        let json = serde_json::to_string(&turn).unwrap();
        assert!(!json.contains("preamble"));
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text(), "A derivative measures change.");
        assert_eq!(back.role, Role::Model);
    }
}
