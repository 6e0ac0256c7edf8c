//! Session cache, durable session stores, and retrieval backends for Lectern.

pub mod corpus;
pub mod file_backend;
pub mod fragments;
pub mod in_memory;
pub mod session_cache;
pub mod vector;

pub use corpus::{chunk_text, Corpus, CorpusEntry};
pub use file_backend::FileSessionStore;
pub use fragments::InMemoryFragmentStore;
pub use in_memory::InMemorySessionStore;
pub use session_cache::{EvictionHook, LruSessionCache};
pub use vector::{cosine_similarity, InMemoryVectorIndex};
