//! # Lectern Core
//!
//! Domain types, collaborator traits, and error definitions for the Lectern
//! tutoring service. This crate has **no framework dependencies**: it defines
//! the model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (generation, embedding, vector search,
//! summarization, classification, tool execution, durable storage) is a trait
//! here. Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Testing the pipeline with scripted fakes
//! - A clean dependency graph (all crates depend inward on core)

pub mod cache;
pub mod error;
pub mod event;
pub mod intent;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod session;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use cache::SessionCache;
pub use error::{
    ClassificationError, Degradation, Error, ProviderError, Result, RetrievalError, StoreError,
    ToolError,
};
pub use event::{DomainEvent, EventBus};
pub use message::{Attachment, Part, Role, SessionId, ToolInvocation, ToolResultPart, Turn};
pub use provider::{
    ClassificationRequest, Classifier, Embedder, EmbeddingRequest, GenerationRequest,
    GenerationResponse, Generator, Summarizer, SummaryRequest, Usage,
};
pub use intent::ClassificationResult;
pub use retrieval::{FragmentStore, RetrievedFragment, ScoredFragment, VectorIndex, VectorQuery};
pub use session::{FragmentCache, Session};
pub use store::{SessionStore, StoredSession};
pub use tool::{MediaArtifact, Tool, ToolDefinition, ToolExecutor, ToolOutcome, ToolRegistry};
