//! File-based session store: one JSON document per session.
//!
//! Storage location: `~/.lectern/sessions/<id>.json` by default.
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash mid-write leaves the previous record intact.

use async_trait::async_trait;
use lectern_core::error::StoreError;
use lectern_core::message::{SessionId, Turn};
use lectern_core::store::{SessionStore, StoredSession};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// A durable session store backed by a directory of JSON files.
pub struct FileSessionStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles across sessions
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File session store opened");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a session's record. Ids are escaped so any string maps to one file name.
    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", escape_id(id.as_str())))
    }

    async fn read(&self, id: &SessionId) -> Result<Option<StoredSession>, StoreError> {
        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupted(format!("{}: {e}", path.display())))
    }

    async fn write(&self, id: &SessionId, record: &StoredSession) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::Storage(format!("Failed to create session directory: {e}"))
        })?;

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize session: {e}")))?;

        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write session file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to replace session file: {e}")))?;
        Ok(())
    }
}

fn escape_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, id: &SessionId) -> Result<Option<StoredSession>, StoreError> {
        self.read(id).await
    }

    async fn write_summary(
        &self,
        id: &SessionId,
        summary: &str,
        summarized_turns: usize,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read(id).await?.unwrap_or_default();
        record.summary = summary.to_string();
        record.summarized_turns = summarized_turns;
        self.write(id, &record).await
    }

    async fn append_turns(&self, id: &SessionId, turns: &[Turn]) -> Result<(), StoreError> {
        if turns.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut record = self.read(id).await?.unwrap_or_default();
        record.history.extend_from_slice(turns);
        self.write(id, &record).await
    }
}
