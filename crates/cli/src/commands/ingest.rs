//! `lectern ingest`: build the reference corpus from a directory of text.

use lectern_config::AppConfig;
use lectern_core::provider::{Embedder, EmbeddingRequest};
use lectern_memory::{chunk_text, Corpus, CorpusEntry};
use lectern_providers::OpenAiCompatProvider;
use std::path::{Path, PathBuf};

pub async fn run(dir: &Path, corpus: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let provider = OpenAiCompatProvider::from_config(&config.provider)?;
    let corpus_path = super::corpus_path(corpus);

    let files = source_files(dir)?;
    if files.is_empty() {
        return Err(format!("No .txt or .md files found in {}", dir.display()).into());
    }

    let mut corpus = Corpus::load(&corpus_path)?;
    let before = corpus.len();
    let mut chunks_total = 0;

    println!("📚 Ingesting {} files into {}", files.len(), corpus_path.display());
    for file in &files {
        let text = std::fs::read_to_string(file)?;
        let chunks = chunk_text(&text, config.retrieval.max_fragment_chars);
        let stem = fragment_prefix(dir, file);

        for (i, chunk) in chunks.iter().enumerate() {
            let embedding = provider
                .embed(EmbeddingRequest {
                    text: chunk.clone(),
                    dimension: config.retrieval.vector_dim,
                })
                .await?;
            corpus.push(CorpusEntry {
                id: format!("{stem}#{i}"),
                collection: config.retrieval.collection.clone(),
                text: chunk.clone(),
                embedding,
            });
        }
        chunks_total += chunks.len();
        println!("   ✅ {} ({} chunks)", file.display(), chunks.len());
    }

    corpus.save(&corpus_path)?;

    println!();
    println!("   Chunks embedded: {chunks_total}");
    println!("   Corpus size:     {} (was {before})", corpus.len());
    println!("   Collection:      {}", config.retrieval.collection);
    Ok(())
}

/// All `.txt` and `.md` files under `dir`, sorted.
fn source_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if matches!(path.extension().and_then(|e| e.to_str()), Some("txt" | "md")) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Stable fragment id prefix: the path relative to the ingested directory.
fn fragment_prefix(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_text_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cells.md"), "Cells").unwrap();
        std::fs::write(dir.path().join("notes.pdf"), "binary").unwrap();
        std::fs::create_dir(dir.path().join("unit2")).unwrap();
        std::fs::write(dir.path().join("unit2").join("tissues.txt"), "Tissues").unwrap();

        let files = source_files(dir.path()).unwrap();
        let names: Vec<String> = files.iter().map(|f| fragment_prefix(dir.path(), f)).collect();
        assert_eq!(names, vec!["cells.md".to_string(), "unit2/tissues.txt".to_string()]);
    }
}
