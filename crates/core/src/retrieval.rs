//! Retrieval collaborator traits: vector search and fragment text lookup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// A nearest-neighbour search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorQuery {
    /// Which indexed collection to search
    pub collection: String,
    pub vector: Vec<f32>,
    pub top_k: usize,
}

/// One search hit, as ranked by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFragment {
    pub fragment_id: String,
    pub score: f32,
}

/// A fragment of reference material retrieved for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
    pub id: String,

    /// Fragment text, truncated to the configured cap
    pub text: String,

    /// Zero-based position in the search collaborator's ranking
    pub source_rank: usize,

    /// Similarity score reported by the index
    pub score: f32,
}

/// The vector-search collaborator.
///
/// Results must be ranked by similarity, highest first.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: VectorQuery) -> std::result::Result<Vec<ScoredFragment>, RetrievalError>;
}

/// The fragment-text collaborator.
///
/// Returns one entry per requested id, in the same order; a missing fragment
/// is `None`, never omitted.
#[async_trait]
pub trait FragmentStore: Send + Sync {
    async fn fetch(&self, ids: &[String]) -> std::result::Result<Vec<Option<String>>, RetrievalError>;
}
