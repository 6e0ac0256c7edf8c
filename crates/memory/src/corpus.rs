//! Curriculum corpus: embedded reference fragments persisted as JSON lines.
//!
//! `lectern ingest` chunks source documents, embeds each chunk and appends it
//! here. At startup the corpus is loaded into an `InMemoryVectorIndex` and an
//! `InMemoryFragmentStore`.
//!
//! Storage location: `~/.lectern/corpus.jsonl` by default.

use lectern_core::error::StoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::fragments::InMemoryFragmentStore;
use crate::vector::InMemoryVectorIndex;

/// One embedded fragment of reference material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: String,
    pub collection: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSONL corpus. A missing file is an empty corpus; corrupted lines are skipped.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read corpus {}: {e}",
                    path.display()
                )));
            }
        };

        let entries: Vec<CorpusEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted corpus entry");
                    None
                }
            })
            .collect();

        debug!(path = %path.display(), count = entries.len(), "Corpus loaded");
        Ok(Self { entries })
    }

    /// Write the whole corpus as JSONL.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create corpus directory: {e}"))
            })?;
        }

        let mut content = String::new();
        for entry in &self.entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| StoreError::Storage(format!("Failed to serialize fragment: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(path, content)
            .map_err(|e| StoreError::Storage(format!("Failed to write corpus: {e}")))
    }

    /// Add an entry, replacing any existing entry with the same id and collection.
    pub fn push(&mut self, entry: CorpusEntry) {
        self.entries
            .retain(|e| !(e.id == entry.id && e.collection == entry.collection));
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the retrieval collaborators from this corpus.
    pub async fn build_index(&self) -> (InMemoryVectorIndex, InMemoryFragmentStore) {
        let index = InMemoryVectorIndex::new();
        let store = InMemoryFragmentStore::new();
        for entry in &self.entries {
            index
                .upsert(&entry.collection, &entry.id, entry.embedding.clone())
                .await;
            store.insert(entry.id.clone(), entry.text.clone()).await;
        }
        (index, store)
    }
}

/// Split a document into chunks of at most `max_chars` characters.
///
/// Paragraphs (blank-line separated) are packed greedily; a paragraph longer
/// than `max_chars` is split on character boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_len = paragraph.chars().count();
        let current_len = current.chars().count();

        if current_len > 0 && current_len + 2 + para_len > max_chars {
            chunks.push(std::mem::take(&mut current));
        }

        if para_len > max_chars {
            let chars: Vec<char> = paragraph.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::retrieval::{FragmentStore, VectorIndex, VectorQuery};

    fn entry(id: &str, text: &str, embedding: Vec<f32>) -> CorpusEntry {
        CorpusEntry {
            id: id.into(),
            collection: "curriculum".into(),
            text: text.into(),
            embedding,
        }
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.jsonl");

        let mut corpus = Corpus::new();
        corpus.push(entry("a", "Alpha", vec![1.0, 0.0]));
        corpus.push(entry("b", "Beta", vec![0.0, 1.0]));
        corpus.save(&path).unwrap();

        let reloaded = Corpus::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.entries()[1].text, "Beta");
    }

    #[test]
    fn corrupted_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.jsonl");
        let good = serde_json::to_string(&entry("a", "Alpha", vec![1.0])).unwrap();
        std::fs::write(&path, format!("{good}\n{{broken\n")).unwrap();

        assert_eq!(Corpus::load(&path).unwrap().len(), 1);
    }

    #[test]
    fn missing_corpus_is_empty() {
        assert!(Corpus::load(Path::new("/nonexistent/corpus.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn push_replaces_same_id() {
        let mut corpus = Corpus::new();
        corpus.push(entry("a", "old", vec![1.0]));
        corpus.push(entry("a", "new", vec![1.0]));
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.entries()[0].text, "new");
    }

    #[tokio::test]
    async fn index_and_store_are_built() {
        let mut corpus = Corpus::new();
        corpus.push(entry("a", "Alpha", vec![1.0, 0.0]));
        let (index, store) = corpus.build_index().await;

        let hits = index
            .search(VectorQuery {
                collection: "curriculum".into(),
                vector: vec![1.0, 0.0],
                top_k: 1,
            })
            .await
            .unwrap();
        assert_eq!(hits[0].fragment_id, "a");
        let texts = store.fetch(&["a".to_string()]).await.unwrap();
        assert_eq!(texts[0].as_deref(), Some("Alpha"));
    }

    #[test]
    fn chunking_packs_paragraphs() {
        let text = "one\n\ntwo\n\nthree";
        assert_eq!(chunk_text(text, 8), vec!["one\n\ntwo", "three"]);
    }

    #[test]
    fn chunking_splits_long_paragraphs() {
        let chunks = chunk_text("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }
}
