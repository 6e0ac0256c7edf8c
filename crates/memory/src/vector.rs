//! Vector similarity and an in-process nearest-neighbour index.

use async_trait::async_trait;
use lectern_core::error::RetrievalError;
use lectern_core::retrieval::{ScoredFragment, VectorIndex, VectorQuery};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Brute-force cosine index, partitioned by collection.
///
/// Fine for a curriculum of a few thousand fragments; swap in a real vector
/// database behind `VectorIndex` for anything larger.
#[derive(Clone, Default)]
pub struct InMemoryVectorIndex {
    collections: Arc<RwLock<HashMap<String, Vec<(String, Vec<f32>)>>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a fragment's embedding.
    pub async fn upsert(&self, collection: &str, fragment_id: &str, embedding: Vec<f32>) {
        let mut collections = self.collections.write().await;
        let entries = collections.entry(collection.to_string()).or_default();
        match entries.iter_mut().find(|(id, _)| id == fragment_id) {
            Some((_, existing)) => *existing = embedding,
            None => entries.push((fragment_id.to_string(), embedding)),
        }
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(&self, query: VectorQuery) -> Result<Vec<ScoredFragment>, RetrievalError> {
        let collections = self.collections.read().await;
        let Some(entries) = collections.get(&query.collection) else {
            return Err(RetrievalError::Search(format!(
                "unknown collection '{}'",
                query.collection
            )));
        };

        if let Some((_, first)) = entries.first()
            && first.len() != query.vector.len()
        {
            return Err(RetrievalError::DimensionMismatch {
                expected: first.len(),
                got: query.vector.len(),
            });
        }

        let mut scored: Vec<ScoredFragment> = entries
            .iter()
            .map(|(id, embedding)| ScoredFragment {
                fragment_id: id.clone(),
                score: cosine_similarity(embedding, &query.vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.top_k);
        Ok(scored)
    }
}
