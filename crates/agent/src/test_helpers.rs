//! Shared test helpers: scripted collaborators for the pipeline stages.

use async_trait::async_trait;
use lectern_core::error::{ProviderError, StoreError};
use lectern_core::message::{SessionId, ToolInvocation, Turn};
use lectern_core::provider::{
    ClassificationRequest, Classifier, Embedder, EmbeddingRequest, GenerationRequest,
    GenerationResponse, Generator, Summarizer, SummaryRequest,
};
use lectern_core::store::{SessionStore, StoredSession};
use lectern_core::tool::{MediaArtifact, ToolDefinition, ToolExecutor, ToolOutcome};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Barrier;

// ── Classification documents ──

pub fn in_domain(query: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "in_domain": true,
        "out_of_domain_message": null,
        "retrieval_needed": query.is_some(),
        "retrieval_query": query,
    })
}

pub fn out_of_domain(message: &str) -> serde_json::Value {
    serde_json::json!({
        "in_domain": false,
        "out_of_domain_message": message,
        "retrieval_needed": false,
        "retrieval_query": null,
    })
}

/// A successful tool outcome carrying an image.
pub fn media_success() -> ToolOutcome {
    ToolOutcome::Success {
        payload: serde_json::json!({"uri": "https://cdn.example/cell.png"}),
        media: Some(MediaArtifact {
            uri: "https://cdn.example/cell.png".into(),
            mime_type: "image/png".into(),
        }),
    }
}

// ── Generators ──

/// Returns scripted responses in order, then a fixed fallback answer.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<GenerationResponse, ProviderError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub const FALLBACK: &'static str = "Let me explain.";

    pub fn new(responses: Vec<GenerationResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with the fallback text.
    pub fn answering() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            script: Mutex::new(VecDeque::from([Err(error)])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: GenerationResponse) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(GenerationResponse::text(Self::FALLBACK)))
    }
}

/// Asks for a tool on every call.
pub struct AlwaysToolGenerator {
    calls: AtomicUsize,
}

impl AlwaysToolGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for AlwaysToolGenerator {
    fn name(&self) -> &str {
        "always_tool"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GenerationResponse::tool_call(ToolInvocation::new(
            "generate_media",
            serde_json::json!({"prompt": "again"}),
        )))
    }
}

/// Blocks every call until `n` calls are in flight at once.
pub struct BarrierGenerator {
    barrier: Barrier,
}

impl BarrierGenerator {
    pub fn new(n: usize) -> Self {
        Self {
            barrier: Barrier::new(n),
        }
    }
}

#[async_trait]
impl Generator for BarrierGenerator {
    fn name(&self) -> &str {
        "barrier"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        self.barrier.wait().await;
        Ok(GenerationResponse::text("together"))
    }
}

/// Records the highest number of concurrent calls.
pub struct TrackingGenerator {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
}

impl TrackingGenerator {
    pub fn new(delay: Duration) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for TrackingGenerator {
    fn name(&self) -> &str {
        "tracking"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GenerationResponse::text(format!("answer {n}")))
    }
}

// ── Classifiers ──

/// Returns one configurable document for every call.
pub struct FixedClassifier {
    response: Mutex<Result<serde_json::Value, ProviderError>>,
    requests: Mutex<Vec<ClassificationRequest>>,
}

impl FixedClassifier {
    pub fn new(response: serde_json::Value) -> Self {
        Self {
            response: Mutex::new(Ok(response)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            response: Mutex::new(Err(error)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, response: serde_json::Value) {
        *self.response.lock().unwrap() = Ok(response);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ClassificationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, request: ClassificationRequest) -> Result<serde_json::Value, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.response.lock().unwrap().clone()
    }
}

/// Never answers.
pub struct HangingClassifier;

#[async_trait]
impl Classifier for HangingClassifier {
    async fn classify(&self, _request: ClassificationRequest) -> Result<serde_json::Value, ProviderError> {
        std::future::pending().await
    }
}

// ── Embedders ──

/// Embeds everything as a vector of ones.
pub struct FixedEmbedder {
    dim: usize,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _request: EmbeddingRequest) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0; self.dim])
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _request: EmbeddingRequest) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Network("embedding service unreachable".into()))
    }
}

// ── Summarizers ──

pub struct RecordingSummarizer {
    summary: String,
    requests: Mutex<Vec<SummaryRequest>>,
}

impl RecordingSummarizer {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<SummaryRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Summarizer for RecordingSummarizer {
    async fn summarize(&self, request: SummaryRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request);
        Ok(self.summary.clone())
    }
}

pub struct FailingSummarizer;

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _request: SummaryRequest) -> Result<String, ProviderError> {
        Err(ProviderError::ApiError {
            status_code: 503,
            message: "summarizer overloaded".into(),
        })
    }
}

// ── Stores ──

/// Reads as empty, refuses every write.
pub struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn load(&self, _id: &SessionId) -> Result<Option<StoredSession>, StoreError> {
        Ok(None)
    }

    async fn write_summary(&self, _id: &SessionId, _summary: &str, _turns: usize) -> Result<(), StoreError> {
        Err(StoreError::Storage("disk full".into()))
    }

    async fn append_turns(&self, _id: &SessionId, _turns: &[Turn]) -> Result<(), StoreError> {
        Err(StoreError::Storage("disk full".into()))
    }
}

// ── Tools ──

/// Offers one tool and answers every call with the same outcome.
pub struct ScriptedTools {
    outcome: ToolOutcome,
    delay: Option<Duration>,
    invoked: Mutex<Vec<String>>,
}

impl ScriptedTools {
    pub fn new(outcome: ToolOutcome) -> Self {
        Self {
            outcome,
            delay: None,
            invoked: Mutex::new(Vec::new()),
        }
    }

    /// For loops that are not expected to call a tool.
    pub fn none() -> Self {
        Self::new(ToolOutcome::failure("no tool expected"))
    }

    /// Takes `delay` to answer.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(ToolOutcome::success(serde_json::json!({})))
        }
    }

    pub fn calls(&self) -> usize {
        self.invoked.lock().unwrap().len()
    }

    pub fn invoked(&self) -> Vec<String> {
        self.invoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "generate_media".into(),
            description: "Generate an illustration".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }

    async fn execute(&self, invocation: &ToolInvocation) -> ToolOutcome {
        self.invoked.lock().unwrap().push(invocation.name.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}
