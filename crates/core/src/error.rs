//! Error types for the Lectern domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum. Recoverable conditions
//! that must not abort a turn are modelled separately as [`Degradation`].

use thiserror::Error;

/// The top-level error type for conditions that abort a conversation turn.
#[derive(Debug, Error)]
pub enum Error {
    // --- Generation errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Intent classification (fatal: no safe default exists) ---
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    // --- Durable session storage ---
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    // --- Tool result delivery ---
    #[error("No pending tool call for session {session_id}")]
    NoPendingTool { session_id: String },

    #[error("Tool result {correlation_id} does not match the pending call {expected}")]
    PendingMismatch {
        correlation_id: String,
        expected: String,
    },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The failure message shown to the learner when a turn is aborted.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Classification(_) => {
                "Sorry, I couldn't understand that request right now. Please try again in a moment."
            }
            Self::Provider(_) => {
                "Sorry, I'm having trouble composing an answer right now. Please try again shortly."
            }
            _ => "Sorry, something went wrong while handling your message. Please try again.",
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum ClassificationError {
    #[error("classifier call failed: {0}")]
    Collaborator(#[from] ProviderError),

    #[error("malformed classification: {0}")]
    Malformed(String),

    #[error("classifier timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("embedding has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector search failed: {0}")]
    Search(String),

    #[error("fragment fetch failed: {0}")]
    Fetch(String),

    #[error("fragment fetch returned {got} texts for {expected} ids")]
    Misaligned { expected: usize, got: usize },

    #[error("{stage} timed out after {timeout_secs}s")]
    Timeout {
        stage: &'static str,
        timeout_secs: u64,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted session record: {0}")]
    Corrupted(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// A recoverable condition: the turn completes with a best-effort answer,
/// but the condition is reported to the caller and logged.
#[derive(Debug, Clone, Error)]
pub enum Degradation {
    #[error("retrieval degraded: {0}")]
    RetrievalDegraded(RetrievalError),

    #[error("summarization degraded: {reason}")]
    SummarizationDegraded { reason: String },

    #[error("tool {tool_name} failed: {reason}")]
    ToolInvocationFailed { tool_name: String, reason: String },
}

impl Degradation {
    /// Short machine-readable label, used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RetrievalDegraded(_) => "retrieval_degraded",
            Self::SummarizationDegraded { .. } => "summarization_degraded",
            Self::ToolInvocationFailed { .. } => "tool_invocation_failed",
        }
    }
}
