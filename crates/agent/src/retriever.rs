//! Retriever: turns a retrieval query into reference fragments for a session.
//!
//! Embed the query, search the index, fetch the texts, truncate them, and
//! merge them into the session's fragment cache. Any collaborator failure
//! degrades to an empty result; retrieval never aborts a turn.

use lectern_core::error::RetrievalError;
use lectern_core::event::{DomainEvent, EventBus};
use lectern_core::provider::{Embedder, EmbeddingRequest};
use lectern_core::retrieval::{FragmentStore, RetrievedFragment, VectorIndex, VectorQuery};
use lectern_core::session::Session;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What one retrieval produced.
#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    /// Fragments in the search collaborator's order
    pub fragments: Vec<RetrievedFragment>,

    /// Set when retrieval failed and `fragments` is empty as a result
    pub degraded: Option<RetrievalError>,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    fragments: Arc<dyn FragmentStore>,
    collection: String,
    top_k: usize,
    vector_dim: usize,
    max_fragment_chars: usize,
    timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        fragments: Arc<dyn FragmentStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            fragments,
            collection: collection.into(),
            top_k: 5,
            vector_dim: 768,
            max_fragment_chars: 500,
            timeout: Duration::from_secs(15),
            event_bus: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_vector_dim(mut self, dim: usize) -> Self {
        self.vector_dim = dim;
        self
    }

    pub fn with_max_fragment_chars(mut self, chars: usize) -> Self {
        self.max_fragment_chars = chars;
        self
    }

    /// Bound on each collaborator call (embed, search, fetch).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Retrieve fragments for `query` and merge them into the session.
    pub async fn retrieve(&self, session: &mut Session, query: &str) -> RetrievalOutcome {
        match self.fetch_fragments(query).await {
            Ok(fragments) => {
                for fragment in &fragments {
                    if let Some(evicted) = session.fragments.insert(&fragment.id, &fragment.text) {
                        debug!(session_id = %session.id, fragment = %evicted, "Fragment evicted");
                    }
                }
                debug!(
                    session_id = %session.id,
                    count = fragments.len(),
                    cached = session.fragments.len(),
                    "Fragments retrieved"
                );
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::FragmentsRetrieved {
                        session_id: session.id.to_string(),
                        count: fragments.len(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                RetrievalOutcome {
                    fragments,
                    degraded: None,
                }
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Retrieval degraded");
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::Degraded {
                        session_id: session.id.to_string(),
                        kind: "retrieval_degraded".into(),
                        detail: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                RetrievalOutcome {
                    fragments: Vec::new(),
                    degraded: Some(e),
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        stage: &'static str,
        fut: impl Future<Output = Result<T, RetrievalError>>,
    ) -> Result<T, RetrievalError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RetrievalError::Timeout {
                stage,
                timeout_secs: self.timeout.as_secs(),
            })?
    }

    async fn fetch_fragments(&self, query: &str) -> Result<Vec<RetrievedFragment>, RetrievalError> {
        let request = EmbeddingRequest {
            text: query.to_string(),
            dimension: self.vector_dim,
        };
        let vector = self
            .bounded("embedding", async {
                self.embedder
                    .embed(request)
                    .await
                    .map_err(|e| RetrievalError::Embedding(e.to_string()))
            })
            .await?;
        if vector.len() != self.vector_dim {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.vector_dim,
                got: vector.len(),
            });
        }

        let hits = self
            .bounded(
                "vector search",
                self.index.search(VectorQuery {
                    collection: self.collection.clone(),
                    vector,
                    top_k: self.top_k,
                }),
            )
            .await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.fragment_id.clone()).collect();
        let texts = self.bounded("fragment fetch", self.fragments.fetch(&ids)).await?;
        if texts.len() != ids.len() {
            return Err(RetrievalError::Misaligned {
                expected: ids.len(),
                got: texts.len(),
            });
        }

        Ok(hits
            .into_iter()
            .zip(texts)
            .enumerate()
            .filter_map(|(rank, (hit, text))| {
                let text = text?;
                Some(RetrievedFragment {
                    id: hit.fragment_id,
                    text: truncate_chars(&text, self.max_fragment_chars),
                    source_rank: rank,
                    score: hit.score,
                })
            })
            .collect())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}
