//! Durable session store trait.
//!
//! The session cache is only the fast path. The durable store keeps history
//! and the carried summary so an evicted session can be rehydrated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{SessionId, Turn};

/// What the durable store holds for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    pub history: Vec<Turn>,

    #[serde(default)]
    pub summary: String,

    /// How many leading turns of `history` the summary already covers
    #[serde(default)]
    pub summarized_turns: usize,
}

/// The durable session collaborator.
///
/// Implementations: in-memory (for testing), JSON files on disk.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Read a session. `Ok(None)` means "not found", which callers treat as empty.
    async fn load(&self, id: &SessionId) -> std::result::Result<Option<StoredSession>, StoreError>;

    /// Persist a new carried summary covering the first `summarized_turns` turns.
    async fn write_summary(
        &self,
        id: &SessionId,
        summary: &str,
        summarized_turns: usize,
    ) -> std::result::Result<(), StoreError>;

    /// Append turns to the durable history.
    async fn append_turns(&self, id: &SessionId, turns: &[Turn]) -> std::result::Result<(), StoreError>;
}
