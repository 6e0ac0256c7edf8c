//! Wires the configured collaborators into a [`TurnPipeline`].

use lectern_agent::{AgentLoop, ContextAssembler, IntentRouter, Retriever, TurnPipeline};
use lectern_config::AppConfig;
use lectern_core::event::{DomainEvent, EventBus};
use lectern_core::store::SessionStore;
use lectern_memory::{Corpus, FileSessionStore, InMemorySessionStore, LruSessionCache};
use lectern_providers::OpenAiCompatProvider;
use lectern_tools::{default_registry, CallbackBroker};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub struct Runtime {
    pub pipeline: TurnPipeline,
    pub broker: Arc<CallbackBroker>,
    pub corpus_fragments: usize,
    pub tools: Vec<String>,
    pub store: &'static str,
}

/// What the tutor is told about itself ahead of every context.
pub fn tutor_instructions(domain_summary: &str) -> String {
    let mut instructions = String::from(
        "You are a patient tutor. Explain step by step, check understanding with short \
         questions, and prefer the provided reference material over your own recollection.",
    );
    if !domain_summary.is_empty() {
        instructions.push_str(&format!("\nYou teach: {domain_summary}"));
    }
    instructions
}

pub async fn build(config: &AppConfig, corpus_path: &Path) -> Result<Runtime, Box<dyn std::error::Error>> {
    let provider = Arc::new(OpenAiCompatProvider::from_config(&config.provider)?);

    let event_bus = Arc::new(EventBus::default());
    tokio::spawn(log_events(event_bus.subscribe()));

    let cache = Arc::new(LruSessionCache::new(config.session.cache_capacity).with_event_bus(event_bus.clone()));
    let (store, store_name): (Arc<dyn SessionStore>, &'static str) = match config.session.store.as_str() {
        "memory" => (Arc::new(InMemorySessionStore::new()), "memory"),
        _ => (Arc::new(FileSessionStore::new(config.session_store_dir())), "file"),
    };

    let router = IntentRouter::new(provider.clone())
        .with_timeout(config.agent.classification_timeout())
        .with_context_turns(config.agent.classifier_context_turns);

    let assembler = ContextAssembler::new(provider.clone(), config.session.window_size)
        .with_store(store.clone())
        .with_timeout(config.agent.summarization_timeout())
        .with_event_bus(event_bus.clone());

    let broker = Arc::new(CallbackBroker::new());
    let registry = default_registry(&config.tools, broker.clone());
    let tools = registry.names().into_iter().map(String::from).collect();

    let agent = AgentLoop::new(provider.clone(), Arc::new(registry))
        .with_max_iterations(config.agent.max_iterations)
        .with_generation_timeout(config.agent.generation_timeout())
        .with_tool_timeout(config.agent.tool_timeout())
        .with_instructions(tutor_instructions(&config.agent.domain_summary))
        .with_event_bus(event_bus.clone());

    let mut pipeline = TurnPipeline::new(cache, router, assembler, agent)
        .with_store(store)
        .with_domain_summary(config.agent.domain_summary.clone())
        .with_max_fragments(config.session.max_fragments)
        .with_event_bus(event_bus.clone());

    let corpus = Corpus::load(corpus_path)?;
    if corpus.is_empty() {
        warn!(path = %corpus_path.display(), "No corpus loaded; answers will not be grounded");
    } else {
        let (index, fragments) = corpus.build_index().await;
        let retriever = Retriever::new(
            provider.clone(),
            Arc::new(index),
            Arc::new(fragments),
            config.retrieval.collection.clone(),
        )
        .with_top_k(config.retrieval.top_k)
        .with_vector_dim(config.retrieval.vector_dim)
        .with_max_fragment_chars(config.retrieval.max_fragment_chars)
        .with_timeout(Duration::from_secs(config.retrieval.timeout_secs))
        .with_event_bus(event_bus);
        pipeline = pipeline.with_retriever(retriever);
    }

    Ok(Runtime {
        pipeline,
        broker,
        corpus_fragments: corpus.len(),
        tools,
        store: store_name,
    })
}

async fn log_events(mut rx: broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        match rx.recv().await {
            Ok(event) => debug!(event = ?event, "Domain event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
