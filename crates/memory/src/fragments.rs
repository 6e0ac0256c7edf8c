//! In-memory fragment text store.

use async_trait::async_trait;
use lectern_core::error::RetrievalError;
use lectern_core::retrieval::FragmentStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct InMemoryFragmentStore {
    texts: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: impl Into<String>, text: impl Into<String>) {
        self.texts.write().await.insert(id.into(), text.into());
    }

    pub async fn len(&self) -> usize {
        self.texts.read().await.len()
    }
}

#[async_trait]
impl FragmentStore for InMemoryFragmentStore {
    async fn fetch(&self, ids: &[String]) -> Result<Vec<Option<String>>, RetrievalError> {
        let texts = self.texts.read().await;
        Ok(ids.iter().map(|id| texts.get(id).cloned()).collect())
    }
}
