//! Turn pipeline: request in, answer out.
//!
//! For one learner turn:
//!
//! 1. Take the session's lock
//! 2. Check out a working copy (cache, else durable store, else empty)
//! 3. Classify; an out-of-domain turn is answered right away and nothing changes
//! 4. Retrieve reference material if the classifier asked for it
//! 5. Append the learner turn (may compact), assemble, run the agent loop
//! 6. Commit the working copy to the cache unless the loop failed
//!
//! The working copy is committed once, at the end. A turn that errors, fails,
//! or is cancelled leaves the cached session as it was.

use crate::context::ContextAssembler;
use crate::locks::SessionLocks;
use crate::loop_runner::{AgentLoop, LoopOutcome, LoopState};
use crate::retriever::Retriever;
use crate::router::IntentRouter;
use lectern_core::cache::SessionCache;
use lectern_core::error::{Degradation, Error};
use lectern_core::event::{DomainEvent, EventBus};
use lectern_core::message::{Attachment, SessionId, ToolResultPart, Turn};
use lectern_core::session::{Session, DEFAULT_MAX_FRAGMENTS};
use lectern_core::store::SessionStore;
use lectern_core::tool::ToolOutcome;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One learner turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: SessionId,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<SessionId>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// What the learner gets back.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub answer: String,
    pub state: LoopState,
    pub in_domain: bool,
    pub media_generated: bool,
    pub degradations: Vec<Degradation>,

    /// Correlation id of a tool result still on its way
    pub pending_correlation_id: Option<String>,
}

pub struct TurnPipeline {
    cache: Arc<dyn SessionCache>,
    store: Option<Arc<dyn SessionStore>>,
    locks: SessionLocks,
    router: IntentRouter,
    retriever: Option<Retriever>,
    assembler: ContextAssembler,
    agent: AgentLoop,
    domain_summary: String,
    max_fragments: usize,
    event_bus: Option<Arc<EventBus>>,
}

impl TurnPipeline {
    pub fn new(
        cache: Arc<dyn SessionCache>,
        router: IntentRouter,
        assembler: ContextAssembler,
        agent: AgentLoop,
    ) -> Self {
        Self {
            cache,
            store: None,
            locks: SessionLocks::new(),
            router,
            retriever: None,
            assembler,
            agent,
            domain_summary: String::new(),
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            event_bus: None,
        }
    }

    /// Rehydrate cache misses from, and append new turns to, a durable store.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// What the tutor covers, as shown to the classifier.
    pub fn with_domain_summary(mut self, summary: impl Into<String>) -> Self {
        self.domain_summary = summary.into();
        self
    }

    pub fn with_max_fragments(mut self, max: usize) -> Self {
        self.max_fragments = max;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Answer one learner turn.
    pub async fn respond(&self, request: TurnRequest) -> Result<TurnReply, Error> {
        let TurnRequest {
            session_id,
            text,
            attachments,
        } = request;
        let attachments_present = !attachments.is_empty();

        let _guard = self.locks.acquire(&session_id).await;
        info!(session_id = %session_id, attachments = attachments_present, "Turn received");
        self.publish(DomainEvent::TurnReceived {
            session_id: session_id.to_string(),
            attachments: attachments_present,
            timestamp: chrono::Utc::now(),
        });

        let mut session = self.checkout(&session_id).await?;

        let decision = self
            .router
            .classify(&session, &text, attachments_present, &self.domain_summary)
            .await
            .map_err(|e| self.fail("classification", e.into()))?;
        self.publish(DomainEvent::TurnClassified {
            session_id: session_id.to_string(),
            in_domain: decision.in_domain(),
            retrieval_needed: decision.retrieval_needed(),
            timestamp: chrono::Utc::now(),
        });

        if let Some(message) = decision.out_of_domain_message() {
            info!(session_id = %session_id, "Turn is out of domain");
            return Ok(TurnReply {
                answer: message.to_string(),
                state: LoopState::Done,
                in_domain: false,
                media_generated: false,
                degradations: Vec::new(),
                pending_correlation_id: None,
            });
        }

        let mut degradations = Vec::new();
        let mut new_turns = Vec::new();

        if let Some(placeholder) = Self::close_unanswered_call(&session) {
            new_turns.push(placeholder.clone());
            degradations.extend(self.assembler.append_turn(&mut session, placeholder).await);
        }

        if let Some(query) = decision.retrieval_query() {
            match &self.retriever {
                Some(retriever) => {
                    let outcome = retriever.retrieve(&mut session, query).await;
                    degradations.extend(outcome.degraded.map(Degradation::RetrievalDegraded));
                }
                None => debug!(session_id = %session_id, "Retrieval requested but no retriever configured"),
            }
        }

        let user_turn = if attachments_present {
            Turn::user_with_attachments(text, attachments)
        } else {
            Turn::user(text)
        };
        new_turns.push(user_turn.clone());
        degradations.extend(self.assembler.append_turn(&mut session, user_turn).await);

        let context = self.assembler.assemble(&session);
        let outcome = self
            .agent
            .run(&session.id, &context)
            .await
            .map_err(|e| self.fail("generation", e))?;

        Ok(self.commit(session, new_turns, outcome, degradations, false).await)
    }

    /// Deliver the late result of a pending tool call and finish the answer.
    pub async fn deliver_tool_result(
        &self,
        session_id: &SessionId,
        correlation_id: &str,
        outcome: ToolOutcome,
    ) -> Result<TurnReply, Error> {
        if outcome == ToolOutcome::Pending {
            return Err(Error::Internal(format!(
                "delivered result for {correlation_id} is still pending"
            )));
        }

        let _guard = self.locks.acquire(session_id).await;
        let mut session = self.checkout(session_id).await?;

        let Some(pending) = session.pending_tool.take() else {
            return Err(Error::NoPendingTool {
                session_id: session_id.to_string(),
            });
        };
        if pending.correlation_id != correlation_id {
            return Err(Error::PendingMismatch {
                correlation_id: correlation_id.to_string(),
                expected: pending.correlation_id,
            });
        }

        info!(session_id = %session_id, tool = %pending.name, correlation_id, "Tool result delivered");

        let mut degradations = Vec::new();
        let delivered_media = outcome.media().is_some();
        if let ToolOutcome::Failure { reason } = &outcome {
            warn!(session_id = %session_id, tool = %pending.name, reason = %reason, "Late tool result is a failure");
            self.publish(DomainEvent::Degraded {
                session_id: session_id.to_string(),
                kind: "tool_invocation_failed".into(),
                detail: reason.clone(),
                timestamp: chrono::Utc::now(),
            });
            degradations.push(Degradation::ToolInvocationFailed {
                tool_name: pending.name.clone(),
                reason: reason.clone(),
            });
        }

        let result_turn = Turn::tool_result(ToolResultPart {
            name: pending.name,
            correlation_id: pending.correlation_id,
            outcome,
        });
        let new_turns = vec![result_turn.clone()];
        degradations.extend(self.assembler.append_turn(&mut session, result_turn).await);

        let context = self.assembler.assemble(&session);
        let outcome = self
            .agent
            .resume(&session.id, &context)
            .await
            .map_err(|e| self.fail("generation", e))?;

        Ok(self.commit(session, new_turns, outcome, degradations, delivered_media).await)
    }

    /// Create a session (or touch an existing one) and return its id.
    pub async fn start_session(&self, id: Option<SessionId>) -> Result<SessionId, Error> {
        let id = id.unwrap_or_default();
        let _guard = self.locks.acquire(&id).await;
        let session = self.checkout(&id).await?;
        self.cache.set(id.clone(), session);
        debug!(session_id = %id, "Session started");
        Ok(id)
    }

    /// Drop a session from the cache. The durable record is kept.
    pub async fn end_session(&self, id: &SessionId) {
        let _guard = self.locks.acquire(id).await;
        self.cache.delete(id);
        debug!(session_id = %id, "Session ended");
    }

    /// A copy of the cached session, if it is live. Does not touch recency.
    pub fn snapshot(&self, id: &SessionId) -> Option<Session> {
        self.cache.peek(id)
    }

    async fn checkout(&self, id: &SessionId) -> Result<Session, Error> {
        if let Some(session) = self.cache.get(id) {
            return Ok(session);
        }

        let stored = match &self.store {
            Some(store) => store.load(id).await.map_err(|e| self.fail("session load", e.into()))?,
            None => None,
        };
        Ok(match stored {
            Some(stored) => {
                debug!(session_id = %id, turns = stored.history.len(), "Session rehydrated");
                Session::from_stored(id.clone(), stored, self.max_fragments)
            }
            None => Session::new(id.clone(), self.max_fragments),
        })
    }

    /// A placeholder result for a pending call the learner moved past, so the
    /// request is never left without a result in history.
    fn close_unanswered_call(session: &Session) -> Option<Turn> {
        let pending = session.pending_tool.as_ref()?;
        let last = session.history.last()?.tool_request_part()?;
        (last.correlation_id == pending.correlation_id).then(|| {
            Turn::tool_result(ToolResultPart {
                name: pending.name.clone(),
                correlation_id: pending.correlation_id.clone(),
                outcome: ToolOutcome::Pending,
            })
        })
    }

    /// The single checkpoint: write the working copy back unless the loop failed.
    async fn commit(
        &self,
        mut session: Session,
        mut new_turns: Vec<Turn>,
        outcome: LoopOutcome,
        mut degradations: Vec<Degradation>,
        delivered_media: bool,
    ) -> TurnReply {
        degradations.extend(outcome.degradations);

        if outcome.state == LoopState::Failed {
            warn!(session_id = %session.id, iterations = outcome.iterations, "Turn failed; session not updated");
            return TurnReply {
                answer: outcome.answer,
                state: outcome.state,
                in_domain: true,
                media_generated: false,
                degradations,
                pending_correlation_id: None,
            };
        }

        for turn in outcome.transcript {
            new_turns.push(turn.clone());
            if let Some(d) = self.assembler.append_turn(&mut session, turn).await
                && !degradations.iter().any(|known| known.kind() == d.kind())
            {
                degradations.push(d);
            }
        }
        if let Some(call) = outcome.pending_tool {
            session.pending_tool = Some(call);
        }
        let pending_correlation_id = session.pending_tool.as_ref().map(|c| c.correlation_id.clone());

        let id = session.id.clone();
        self.cache.set(id.clone(), session);

        if let Some(store) = &self.store
            && let Err(e) = store.append_turns(&id, &new_turns).await
        {
            warn!(session_id = %id, error = %e, "Turns not persisted");
            self.publish(DomainEvent::ErrorOccurred {
                context: format!("persist session {id}"),
                error_message: e.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }

        for d in &degradations {
            debug!(session_id = %id, kind = d.kind(), detail = %d, "Turn degraded");
        }

        TurnReply {
            answer: outcome.answer,
            state: outcome.state,
            in_domain: true,
            media_generated: outcome.media_generated || delivered_media,
            degradations,
            pending_correlation_id,
        }
    }

    fn fail(&self, context: &str, error: Error) -> Error {
        warn!(context, error = %error, "Turn aborted");
        self.publish(DomainEvent::ErrorOccurred {
            context: context.to_string(),
            error_message: error.to_string(),
            timestamp: chrono::Utc::now(),
        });
        error
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use lectern_core::error::ProviderError;
    use lectern_core::message::{Role, ToolInvocation};
    use lectern_core::provider::{GenerationResponse, Generator};
    use lectern_core::tool::ToolExecutor;
    use lectern_core::StoredSession;
    use lectern_memory::{InMemoryFragmentStore, InMemorySessionStore, InMemoryVectorIndex, LruSessionCache};
    use std::time::Duration;

    struct Harness {
        pipeline: TurnPipeline,
        classifier: Arc<FixedClassifier>,
        cache: Arc<LruSessionCache>,
        store: Arc<InMemorySessionStore>,
    }

    fn harness_with(
        classification: serde_json::Value,
        generator: Arc<dyn Generator>,
        tools: Arc<dyn ToolExecutor>,
        cache_capacity: usize,
        window: usize,
    ) -> Harness {
        let classifier = Arc::new(FixedClassifier::new(classification));
        let cache = Arc::new(LruSessionCache::new(cache_capacity));
        let store = Arc::new(InMemorySessionStore::new());
        let assembler = ContextAssembler::new(Arc::new(RecordingSummarizer::new("summary")), window)
            .with_store(store.clone());
        let pipeline = TurnPipeline::new(
            cache.clone(),
            IntentRouter::new(classifier.clone()),
            assembler,
            AgentLoop::new(generator, tools).with_max_iterations(3),
        )
        .with_store(store.clone())
        .with_domain_summary("Introductory cell biology");
        Harness {
            pipeline,
            classifier,
            cache,
            store,
        }
    }

    fn harness(generator: Arc<dyn Generator>) -> Harness {
        harness_with(in_domain(None), generator, Arc::new(ScriptedTools::none()), 16, 10)
    }

    async fn retriever(embedder: Arc<dyn lectern_core::provider::Embedder>) -> Retriever {
        let index = Arc::new(InMemoryVectorIndex::new());
        let fragments = Arc::new(InMemoryFragmentStore::new());
        index.upsert("bio", "cell-1", vec![1.0, 1.0]).await;
        fragments.insert("cell-1", "The cell membrane controls what enters the cell.").await;
        Retriever::new(embedder, index, fragments, "bio").with_vector_dim(2)
    }

    fn sid(id: &str) -> SessionId {
        SessionId::from(id)
    }

    #[tokio::test]
    async fn in_domain_turn_is_answered_and_committed() {
        let generator = Arc::new(ScriptedGenerator::new(vec![GenerationResponse::text("Cells are small.")]));
        let h = harness(generator.clone());

        let reply = h.pipeline.respond(TurnRequest::new("s1", "What is a cell?")).await.unwrap();
        assert_eq!(reply.answer, "Cells are small.");
        assert_eq!(reply.state, LoopState::Done);
        assert!(reply.in_domain);
        assert!(reply.degradations.is_empty());

        let session = h.pipeline.snapshot(&sid("s1")).unwrap();
        let roles: Vec<Role> = session.history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model]);

        let stored = h.store.load(&sid("s1")).await.unwrap().unwrap();
        assert_eq!(stored.history.len(), 2);
    }

    #[tokio::test]
    async fn out_of_domain_turn_short_circuits() {
        let generator = Arc::new(ScriptedGenerator::answering());
        let embedder = Arc::new(FixedEmbedder::new(2));
        let h = harness(generator.clone());
        let pipeline = h.pipeline.with_retriever(retriever(embedder.clone()).await);

        pipeline.respond(TurnRequest::new("s1", "What is a cell?")).await.unwrap();
        assert_eq!(generator.calls(), 1);

        h.classifier.set(out_of_domain("I can only help with cell biology."));
        let reply = pipeline.respond(TurnRequest::new("s1", "Who won the match?")).await.unwrap();

        assert_eq!(reply.answer, "I can only help with cell biology.");
        assert!(!reply.in_domain);
        assert_eq!(generator.calls(), 1);
        assert_eq!(embedder.calls(), 0);
        assert_eq!(pipeline.snapshot(&sid("s1")).unwrap().history.len(), 2);
    }

    #[tokio::test]
    async fn grounded_turn_carries_reference_material() {
        let generator = Arc::new(ScriptedGenerator::answering());
        let h = harness_with(
            in_domain(Some("cell membrane")),
            generator.clone(),
            Arc::new(ScriptedTools::none()),
            16,
            10,
        );
        let pipeline = h.pipeline.with_retriever(retriever(Arc::new(FixedEmbedder::new(2))).await);

        let reply = pipeline.respond(TurnRequest::new("s1", "What does the membrane do?")).await.unwrap();
        assert!(reply.degradations.is_empty());

        let request = &generator.requests()[0];
        assert_eq!(request.context[0].role, Role::System);
        assert!(request.context[0].text().contains("controls what enters the cell"));
        let session = pipeline.snapshot(&sid("s1")).unwrap();
        assert_eq!(session.fragments.len(), 1);
        // Reference material never enters history.
        assert_eq!(session.history.len(), 2);
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_but_answers() {
        let generator = Arc::new(ScriptedGenerator::answering());
        let h = harness_with(
            in_domain(Some("mitosis")),
            generator.clone(),
            Arc::new(ScriptedTools::none()),
            16,
            10,
        );
        let pipeline = h.pipeline.with_retriever(retriever(Arc::new(FailingEmbedder)).await);

        let reply = pipeline.respond(TurnRequest::new("s1", "Explain mitosis")).await.unwrap();
        assert_eq!(reply.state, LoopState::Done);
        assert_eq!(reply.answer, ScriptedGenerator::FALLBACK);
        assert!(matches!(reply.degradations.as_slice(), [Degradation::RetrievalDegraded(_)]));
    }

    #[tokio::test]
    async fn malformed_classification_is_fatal() {
        let generator = Arc::new(ScriptedGenerator::answering());
        let h = harness_with(
            serde_json::json!({"in_domain": true, "retrieval_needed": true}),
            generator.clone(),
            Arc::new(ScriptedTools::none()),
            16,
            10,
        );

        let err = h.pipeline.respond(TurnRequest::new("s1", "hi")).await.unwrap_err();
        assert!(matches!(err, Error::Classification(_)));
        assert_eq!(generator.calls(), 0);
        assert!(h.pipeline.snapshot(&sid("s1")).is_none());
    }

    #[tokio::test]
    async fn generation_failure_commits_nothing() {
        let generator = Arc::new(ScriptedGenerator::failing(ProviderError::Timeout("slow".into())));
        let h = harness(generator);

        let err = h.pipeline.respond(TurnRequest::new("s1", "hi")).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(h.pipeline.snapshot(&sid("s1")).is_none());
        assert!(h.store.load(&sid("s1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exhausted_loop_commits_nothing() {
        let h = harness_with(
            in_domain(None),
            Arc::new(AlwaysToolGenerator::new()),
            Arc::new(ScriptedTools::new(ToolOutcome::success(serde_json::json!({})))),
            16,
            10,
        );

        let reply = h.pipeline.respond(TurnRequest::new("s1", "Draw forever")).await.unwrap();
        assert_eq!(reply.state, LoopState::Failed);
        assert_eq!(reply.answer, crate::loop_runner::EXHAUSTED_ANSWER);
        assert!(h.pipeline.snapshot(&sid("s1")).is_none());
    }

    #[tokio::test]
    async fn tool_round_trip_is_recorded_in_history() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            GenerationResponse::tool_call(ToolInvocation::new(
                "generate_media",
                serde_json::json!({"prompt": "animal cell"}),
            )),
            GenerationResponse::text("Here's a diagram of an animal cell."),
        ]));
        let h = harness_with(in_domain(None), generator, Arc::new(ScriptedTools::new(media_success())), 16, 10);

        let reply = h.pipeline.respond(TurnRequest::new("s1", "Show me a cell")).await.unwrap();
        assert!(reply.media_generated);

        let history = h.pipeline.snapshot(&sid("s1")).unwrap().history;
        assert_eq!(history.len(), 4);
        let request = history[1].tool_request_part().unwrap();
        let result = history[2].tool_result_part().unwrap();
        assert_eq!(request.correlation_id, result.correlation_id);
        assert_eq!(history[3].text(), "Here's a diagram of an animal cell.");
    }

    #[tokio::test]
    async fn pending_tool_result_can_be_delivered_later() {
        let call = ToolInvocation::new("generate_media", serde_json::json!({"prompt": "ribosome"}));
        let generator = Arc::new(ScriptedGenerator::new(vec![GenerationResponse::tool_call(call.clone())]));
        let h = harness_with(
            in_domain(None),
            generator.clone(),
            Arc::new(ScriptedTools::new(ToolOutcome::Pending)),
            16,
            10,
        );
        let s1 = sid("s1");

        let reply = h.pipeline.respond(TurnRequest::new("s1", "Draw a ribosome")).await.unwrap();
        assert_eq!(reply.state, LoopState::Pending);
        assert_eq!(reply.pending_correlation_id.as_deref(), Some(call.correlation_id.as_str()));
        assert!(h.pipeline.snapshot(&s1).unwrap().pending_tool.is_some());

        let err = h
            .pipeline
            .deliver_tool_result(&s1, "someone-else", media_success())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PendingMismatch { .. }));

        generator.push(GenerationResponse::text("Here is your ribosome."));
        let reply = h
            .pipeline
            .deliver_tool_result(&s1, &call.correlation_id, media_success())
            .await
            .unwrap();
        assert_eq!(reply.state, LoopState::Done);
        assert_eq!(reply.answer, "Here is your ribosome.");
        assert!(reply.media_generated);

        let session = h.pipeline.snapshot(&s1).unwrap();
        assert!(session.pending_tool.is_none());
        let roles: Vec<Role> = session.history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::System, Role::Model]);

        let err = h
            .pipeline
            .deliver_tool_result(&s1, &call.correlation_id, media_success())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoPendingTool { .. }));
    }

    #[tokio::test]
    async fn late_failure_is_reported_as_degradation() {
        let call = ToolInvocation::new("generate_media", serde_json::json!({"prompt": "ribosome"}));
        let generator = Arc::new(ScriptedGenerator::new(vec![GenerationResponse::tool_call(call.clone())]));
        let h = harness_with(
            in_domain(None),
            generator,
            Arc::new(ScriptedTools::new(ToolOutcome::Pending)),
            16,
            10,
        );
        let bus = Arc::new(EventBus::new(32));
        let mut rx = bus.subscribe();
        let pipeline = h.pipeline.with_event_bus(bus);

        pipeline.respond(TurnRequest::new("s1", "Draw a ribosome")).await.unwrap();
        let reply = pipeline
            .deliver_tool_result(&sid("s1"), &call.correlation_id, ToolOutcome::failure("renderer crashed"))
            .await
            .unwrap();
        assert_eq!(reply.state, LoopState::Done);
        assert!(!reply.media_generated);
        assert_eq!(reply.degradations.len(), 1);
        assert_eq!(reply.degradations[0].kind(), "tool_invocation_failed");

        let mut degraded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::Degraded { kind, detail, .. } = event.as_ref() {
                degraded.push((kind.clone(), detail.clone()));
            }
        }
        assert_eq!(
            degraded,
            vec![("tool_invocation_failed".to_string(), "renderer crashed".to_string())]
        );
    }

    #[tokio::test]
    async fn pending_delivery_is_rejected() {
        let h = harness(Arc::new(ScriptedGenerator::answering()));
        let err = h
            .pipeline
            .deliver_tool_result(&sid("s1"), "c1", ToolOutcome::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn moving_past_a_pending_call_closes_it() {
        let call = ToolInvocation::new("generate_media", serde_json::json!({"prompt": "x"}));
        let generator = Arc::new(ScriptedGenerator::new(vec![GenerationResponse::tool_call(call.clone())]));
        let h = harness_with(
            in_domain(None),
            generator,
            Arc::new(ScriptedTools::new(ToolOutcome::Pending)),
            16,
            10,
        );

        h.pipeline.respond(TurnRequest::new("s1", "Draw it")).await.unwrap();
        h.pipeline.respond(TurnRequest::new("s1", "Meanwhile, what's DNA?")).await.unwrap();

        let session = h.pipeline.snapshot(&sid("s1")).unwrap();
        let placeholder = session.history[2].tool_result_part().unwrap();
        assert_eq!(placeholder.correlation_id, call.correlation_id);
        assert_eq!(placeholder.outcome, ToolOutcome::Pending);
        assert_eq!(session.history[3].text(), "Meanwhile, what's DNA?");
        // Still accepts the real result later.
        assert!(session.pending_tool.is_some());
    }

    #[tokio::test]
    async fn pending_call_survives_eviction() {
        let call = ToolInvocation::new("generate_media", serde_json::json!({"prompt": "ribosome"}));
        let generator = Arc::new(ScriptedGenerator::new(vec![GenerationResponse::tool_call(call.clone())]));
        let h = harness_with(
            in_domain(None),
            generator.clone(),
            Arc::new(ScriptedTools::new(ToolOutcome::Pending)),
            1,
            10,
        );

        h.pipeline.respond(TurnRequest::new("a", "Draw a ribosome")).await.unwrap();
        h.pipeline.respond(TurnRequest::new("b", "Unrelated")).await.unwrap();
        assert!(!h.cache.has(&sid("a")));

        generator.push(GenerationResponse::text("Here is your ribosome."));
        let reply = h
            .pipeline
            .deliver_tool_result(&sid("a"), &call.correlation_id, media_success())
            .await
            .unwrap();
        assert_eq!(reply.state, LoopState::Done);
        assert!(reply.media_generated);

        let session = h.pipeline.snapshot(&sid("a")).unwrap();
        assert!(session.pending_tool.is_none());
        let roles: Vec<Role> = session.history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::System, Role::Model]);
    }

    #[tokio::test]
    async fn moving_past_an_evicted_pending_call_closes_it() {
        let call = ToolInvocation::new("generate_media", serde_json::json!({"prompt": "x"}));
        let generator = Arc::new(ScriptedGenerator::new(vec![GenerationResponse::tool_call(call.clone())]));
        let h = harness_with(
            in_domain(None),
            generator,
            Arc::new(ScriptedTools::new(ToolOutcome::Pending)),
            1,
            10,
        );

        h.pipeline.respond(TurnRequest::new("a", "Draw it")).await.unwrap();
        h.pipeline.respond(TurnRequest::new("b", "Unrelated")).await.unwrap();
        h.pipeline.respond(TurnRequest::new("a", "Meanwhile, what's DNA?")).await.unwrap();

        let stored = h.store.load(&sid("a")).await.unwrap().unwrap();
        assert!(stored.history[1].tool_request_part().is_some());
        let placeholder = stored.history[2].tool_result_part().unwrap();
        assert_eq!(placeholder.correlation_id, call.correlation_id);
        assert_eq!(placeholder.outcome, ToolOutcome::Pending);
        assert_eq!(stored.history[3].text(), "Meanwhile, what's DNA?");
        assert_eq!(
            h.pipeline.snapshot(&sid("a")).unwrap().pending_tool.unwrap().correlation_id,
            call.correlation_id
        );
    }

    #[tokio::test]
    async fn snapshot_leaves_recency_alone() {
        let h = harness_with(
            in_domain(None),
            Arc::new(ScriptedGenerator::answering()),
            Arc::new(ScriptedTools::none()),
            2,
            10,
        );
        h.pipeline.respond(TurnRequest::new("a", "first")).await.unwrap();
        h.pipeline.respond(TurnRequest::new("b", "second")).await.unwrap();

        assert!(h.pipeline.snapshot(&sid("a")).is_some());
        h.pipeline.respond(TurnRequest::new("c", "third")).await.unwrap();

        assert!(!h.cache.has(&sid("a")));
        assert!(h.cache.has(&sid("b")));
    }

    #[tokio::test]
    async fn evicted_session_is_rehydrated_from_store() {
        let h = harness_with(
            in_domain(None),
            Arc::new(ScriptedGenerator::answering()),
            Arc::new(ScriptedTools::none()),
            1,
            10,
        );

        h.pipeline.respond(TurnRequest::new("a", "first")).await.unwrap();
        h.pipeline.respond(TurnRequest::new("b", "other")).await.unwrap();
        assert!(!h.cache.has(&sid("a")));

        h.pipeline.respond(TurnRequest::new("a", "second")).await.unwrap();
        let history = h.pipeline.snapshot(&sid("a")).unwrap().history;
        let texts: Vec<String> = history.iter().map(|t| t.text()).collect();
        assert_eq!(texts[0], "first");
        assert_eq!(texts[2], "second");
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn stored_summary_is_carried_after_rehydration() {
        let h = harness(Arc::new(ScriptedGenerator::answering()));
        h.store
            .insert(
                sid("old"),
                StoredSession {
                    history: vec![Turn::user("q"), Turn::model("a")],
                    summary: "We covered osmosis.".into(),
                    summarized_turns: 2,
                },
            )
            .await;

        h.pipeline.respond(TurnRequest::new("old", "And diffusion?")).await.unwrap();
        let session = h.pipeline.snapshot(&sid("old")).unwrap();
        assert_eq!(session.summary, "We covered osmosis.");
        assert_eq!(session.history.len(), 2);
        let prior = h.classifier.last_request().unwrap().prior_context_summary;
        assert!(prior.contains("We covered osmosis."));
    }

    #[tokio::test]
    async fn long_conversation_is_compacted() {
        let h = harness_with(
            in_domain(None),
            Arc::new(ScriptedGenerator::answering()),
            Arc::new(ScriptedTools::none()),
            16,
            2,
        );
        for i in 0..3 {
            h.pipeline.respond(TurnRequest::new("s1", format!("question {i}"))).await.unwrap();
        }
        let session = h.pipeline.snapshot(&sid("s1")).unwrap();
        assert_eq!(session.summary, "summary");
        assert!(session.history.len() <= 4);
        let stored = h.store.load(&sid("s1")).await.unwrap().unwrap();
        assert_eq!(stored.summary, "summary");
    }

    #[tokio::test]
    async fn same_session_turns_are_serialized() {
        let generator = Arc::new(TrackingGenerator::new(Duration::from_millis(10)));
        let h = harness(generator.clone());
        let pipeline = Arc::new(h.pipeline);

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    pipeline.respond(TurnRequest::new("shared", format!("turn {i}"))).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(generator.max_in_flight(), 1);
        assert_eq!(generator.calls(), 5);
        // No lost updates: every learner turn and every answer is in history.
        assert_eq!(pipeline.snapshot(&sid("shared")).unwrap().history.len(), 10);
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let h = harness(Arc::new(BarrierGenerator::new(2)));
        let pipeline = Arc::new(h.pipeline);

        let a = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.respond(TurnRequest::new("a", "hi")).await })
        };
        let b = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.respond(TurnRequest::new("b", "hi")).await })
        };

        // Both generation calls must be in flight at once to pass the barrier.
        let joined = tokio::time::timeout(Duration::from_secs(5), async { (a.await, b.await) }).await;
        let (a, b) = joined.expect("sessions were serialized against each other");
        assert_eq!(a.unwrap().unwrap().answer, "together");
        assert_eq!(b.unwrap().unwrap().answer, "together");
    }

    #[tokio::test]
    async fn cancelled_turn_leaves_cache_untouched() {
        let generator = Arc::new(TrackingGenerator::new(Duration::from_secs(30)));
        let h = harness(generator);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            h.pipeline.respond(TurnRequest::new("s1", "hi")),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(h.pipeline.snapshot(&sid("s1")).is_none());

        // The lock was released with the dropped future.
        h.classifier.set(out_of_domain("Off topic."));
        let reply = tokio::time::timeout(
            Duration::from_secs(1),
            h.pipeline.respond(TurnRequest::new("s1", "still there?")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply.answer, "Off topic.");
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let h = harness(Arc::new(ScriptedGenerator::answering()));

        let id = h.pipeline.start_session(None).await.unwrap();
        assert!(h.pipeline.snapshot(&id).unwrap().is_empty());

        let named = h.pipeline.start_session(Some(sid("named"))).await.unwrap();
        assert_eq!(named, sid("named"));
        assert_eq!(h.cache.len(), 2);

        h.pipeline.end_session(&id).await;
        assert!(h.pipeline.snapshot(&id).is_none());
        // Ending an unknown session is a no-op.
        h.pipeline.end_session(&sid("ghost")).await;
        assert_eq!(h.cache.len(), 1);
    }

    #[tokio::test]
    async fn attachments_reach_classifier_and_history() {
        let h = harness(Arc::new(ScriptedGenerator::answering()));
        let request = TurnRequest::new("s1", "What is this organelle?").with_attachments(vec![Attachment {
            uri: "blob://uploads/organelle.png".into(),
            mime_type: "image/png".into(),
        }]);

        h.pipeline.respond(request).await.unwrap();
        assert!(h.classifier.last_request().unwrap().attachments_present);
        let session = h.pipeline.snapshot(&sid("s1")).unwrap();
        assert!(session.history[0].has_attachments());
    }
}
