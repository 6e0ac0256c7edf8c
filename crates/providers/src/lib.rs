//! Model provider implementations for Lectern.
//!
//! `OpenAiCompatProvider` implements every model collaborator trait in
//! `lectern_core::provider`, so a single configured endpoint can back
//! generation, embedding, summarization and classification.

pub mod openai_compat;
pub mod prompts;

pub use openai_compat::OpenAiCompatProvider;
