pub mod chat;
pub mod config_cmd;
pub mod ingest;
pub mod runtime;

use std::path::PathBuf;

/// The corpus file to use: the explicit path, else `~/.lectern/corpus.jsonl`.
pub fn corpus_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| lectern_config::AppConfig::config_dir().join("corpus.jsonl"))
}
