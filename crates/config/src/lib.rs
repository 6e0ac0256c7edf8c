//! Configuration loading, validation, and management for Lectern.
//!
//! Loads configuration from `~/.lectern/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.lectern/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model endpoint settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Session cache and context window
    #[serde(default)]
    pub session: SessionConfig,

    /// Retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Agent loop and routing settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (falls back to `LECTERN_API_KEY` / `OPENAI_API_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model used for generation, summarization and classification
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum live sessions held in the cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Rounds kept verbatim; compaction fires past twice this many turns
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Cap on cached reference fragments per session
    #[serde(default = "default_max_fragments")]
    pub max_fragments: usize,

    /// Durable store backend: "file" or "memory"
    #[serde(default = "default_store")]
    pub store: String,

    /// Directory for the file store (defaults to `~/.lectern/sessions`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
}

fn default_cache_capacity() -> usize {
    256
}
fn default_window_size() -> usize {
    10
}
fn default_max_fragments() -> usize {
    64
}
fn default_store() -> String {
    "file".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            window_size: default_window_size(),
            max_fragments: default_max_fragments(),
            store: default_store(),
            store_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,

    /// Fragment texts are truncated to this many characters
    #[serde(default = "default_max_fragment_chars")]
    pub max_fragment_chars: usize,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_top_k() -> usize {
    5
}
fn default_vector_dim() -> usize {
    768
}
fn default_max_fragment_chars() -> usize {
    500
}
fn default_collection() -> String {
    "curriculum".into()
}
fn default_retrieval_timeout_secs() -> u64 {
    15
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            vector_dim: default_vector_dim(),
            max_fragment_chars: default_max_fragment_chars(),
            collection: default_collection(),
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Generation round-trips allowed per turn before giving up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// What the tutor covers; handed to the intent classifier
    #[serde(default = "default_domain_summary")]
    pub domain_summary: String,

    /// Recent turns included in the classifier's prior context
    #[serde(default = "default_classifier_context_turns")]
    pub classifier_context_turns: usize,

    #[serde(default = "default_classification_timeout_secs")]
    pub classification_timeout_secs: u64,

    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    #[serde(default = "default_summarization_timeout_secs")]
    pub summarization_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    5
}
fn default_domain_summary() -> String {
    "General secondary-school tutoring: mathematics, sciences, history and languages.".into()
}
fn default_classifier_context_turns() -> usize {
    4
}
fn default_classification_timeout_secs() -> u64 {
    20
}
fn default_generation_timeout_secs() -> u64 {
    90
}
fn default_summarization_timeout_secs() -> u64 {
    45
}
fn default_tool_timeout_secs() -> u64 {
    60
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            domain_summary: default_domain_summary(),
            classifier_context_turns: default_classifier_context_turns(),
            classification_timeout_secs: default_classification_timeout_secs(),
            generation_timeout_secs: default_generation_timeout_secs(),
            summarization_timeout_secs: default_summarization_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl AgentConfig {
    pub fn classification_timeout(&self) -> Duration {
        Duration::from_secs(self.classification_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn summarization_timeout(&self) -> Duration {
        Duration::from_secs(self.summarization_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Media generation endpoint; the tool is only registered when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_api_key: Option<String>,

    /// How long to wait for an out-of-band result before reporting "pending"
    #[serde(default = "default_callback_grace_secs")]
    pub callback_grace_secs: u64,
}

fn default_callback_grace_secs() -> u64 {
    5
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            media_endpoint: None,
            media_api_key: None,
            callback_grace_secs: default_callback_grace_secs(),
        }
    }
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("media_endpoint", &self.media_endpoint)
            .field("media_api_key", &redact(&self.media_api_key))
            .field("callback_grace_secs", &self.callback_grace_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.lectern/config.toml).
    ///
    /// Environment overrides:
    /// - `LECTERN_API_KEY`, then `OPENAI_API_KEY` (only if no key in the file)
    /// - `LECTERN_BASE_URL`
    /// - `LECTERN_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = var("LECTERN_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(url) = var("LECTERN_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = var("LECTERN_MODEL") {
            self.provider.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lectern")
    }

    /// Directory of the file-backed session store.
    pub fn session_store_dir(&self) -> PathBuf {
        self.session
            .store_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("sessions"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.session.cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "session.cache_capacity must be > 0".into(),
            ));
        }
        if self.session.window_size == 0 {
            return Err(ConfigError::ValidationError(
                "session.window_size must be > 0".into(),
            ));
        }
        if self.session.max_fragments == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_fragments must be > 0".into(),
            ));
        }
        if !matches!(self.session.store.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "session.store must be \"file\" or \"memory\", got \"{}\"",
                self.session.store
            )));
        }
        if self.retrieval.top_k == 0 || self.retrieval.vector_dim == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k and retrieval.vector_dim must be > 0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }
        if self.tools.callback_grace_secs >= self.agent.tool_timeout_secs {
            return Err(ConfigError::ValidationError(format!(
                "tools.callback_grace_secs ({}) must be shorter than agent.tool_timeout_secs ({})",
                self.tools.callback_grace_secs, self.agent.tool_timeout_secs
            )));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
