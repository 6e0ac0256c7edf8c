//! In-memory session store: useful for testing and ephemeral deployments.

use async_trait::async_trait;
use lectern_core::error::StoreError;
use lectern_core::message::{SessionId, Turn};
use lectern_core::store::{SessionStore, StoredSession};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A session store that keeps durable records in a HashMap.
/// Nothing survives the process; use `FileSessionStore` for that.
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, StoredSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed a session record directly.
    pub async fn insert(&self, id: SessionId, stored: StoredSession) {
        self.sessions.write().await.insert(id, stored);
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, id: &SessionId) -> Result<Option<StoredSession>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn write_summary(
        &self,
        id: &SessionId,
        summary: &str,
        summarized_turns: usize,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.entry(id.clone()).or_default();
        record.summary = summary.to_string();
        record.summarized_turns = summarized_turns;
        Ok(())
    }

    async fn append_turns(&self, id: &SessionId, turns: &[Turn]) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .history
            .extend_from_slice(turns);
        Ok(())
    }
}
