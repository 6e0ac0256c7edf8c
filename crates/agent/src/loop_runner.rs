//! The agent reasoning loop implementation.
//!
//! One learner turn is answered by alternating generation and tool calls:
//!
//! 1. **Compose**: send the assembled context plus this turn's transcript
//! 2. **If a tool call**: record the request, run the tool, record the result, loop
//! 3. **If text**: that is the answer
//!
//! The loop is bounded by `max_iterations`. A tool that accepts the job but
//! answers later parks the loop in [`LoopState::Pending`]; the pipeline
//! resumes it once the result is delivered.

use crate::context::AssembledContext;
use lectern_core::error::{Degradation, Error, ProviderError};
use lectern_core::event::{DomainEvent, EventBus};
use lectern_core::message::{Part, SessionId, ToolInvocation, ToolResultPart, Turn};
use lectern_core::provider::{GenerationRequest, GenerationResponse, Generator};
use lectern_core::tool::{ToolExecutor, ToolOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shown when the iteration cap is hit.
pub const EXHAUSTED_ANSWER: &str = "I'm sorry, I couldn't put together a complete answer this time. \
     Could you rephrase the question or break it into smaller parts?";

/// Shown while a tool result is still on its way.
pub const PENDING_ANSWER: &str = "I've started preparing that for you. It will appear here shortly.";

/// Where the loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Composing,
    AwaitingToolResult,
    Done,
    Failed,
    Pending,
}

/// The result of running the loop for one turn.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub state: LoopState,

    /// The text shown to the learner
    pub answer: String,

    /// Turns produced this run, in order, to be appended to history
    pub transcript: Vec<Turn>,

    /// Whether a successful tool result carried a media artifact
    pub media_generated: bool,

    pub degradations: Vec<Degradation>,

    /// The call the loop is waiting on, when `state` is `Pending`
    pub pending_tool: Option<ToolInvocation>,

    /// Generation calls made
    pub iterations: u32,
}

/// The agent loop that alternates generation and tool execution.
pub struct AgentLoop {
    /// The generation collaborator
    generator: Arc<dyn Generator>,

    /// Tools the model may call
    tools: Arc<dyn ToolExecutor>,

    /// Maximum generation calls per turn
    max_iterations: u32,

    generation_timeout: Duration,

    tool_timeout: Duration,

    /// Tutor instructions sent ahead of the context
    instructions: Option<String>,

    event_bus: Option<Arc<EventBus>>,
}

impl AgentLoop {
    pub fn new(generator: Arc<dyn Generator>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            generator,
            tools,
            max_iterations: 5,
            generation_timeout: Duration::from_secs(90),
            tool_timeout: Duration::from_secs(60),
            instructions: None,
            event_bus: None,
        }
    }

    /// Set the maximum number of generation calls per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// System instructions placed before the assembled context.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Answer the latest learner turn in `context`.
    pub async fn run(&self, session_id: &SessionId, context: &AssembledContext) -> Result<LoopOutcome, Error> {
        info!(
            session_id = %session_id,
            turns = context.turns.len(),
            estimated_tokens = context.estimated_tokens,
            "Running agent loop"
        );
        self.drive(session_id, context).await
    }

    /// Continue after a late tool result has been appended to the history.
    pub async fn resume(&self, session_id: &SessionId, context: &AssembledContext) -> Result<LoopOutcome, Error> {
        info!(session_id = %session_id, "Resuming agent loop after tool result");
        self.drive(session_id, context).await
    }

    async fn drive(&self, session_id: &SessionId, context: &AssembledContext) -> Result<LoopOutcome, Error> {
        let tool_definitions = self.tools.definitions();
        let mut transcript: Vec<Turn> = Vec::new();
        let mut degradations = Vec::new();
        let mut media_generated = false;
        let mut state = LoopState::Composing;

        for iteration in 1..=self.max_iterations {
            debug!(session_id = %session_id, iteration, state = ?state, "Agent loop iteration");

            let mut turns = Vec::with_capacity(context.turns.len() + transcript.len() + 1);
            if let Some(instructions) = &self.instructions {
                turns.push(Turn::system(instructions.clone()));
            }
            turns.extend(context.turns.iter().cloned());
            turns.extend(transcript.iter().cloned());

            let response = self
                .generate(GenerationRequest {
                    context: turns,
                    tools: tool_definitions.clone(),
                })
                .await?;

            if let Some(usage) = &response.usage
                && let Some(bus) = &self.event_bus
            {
                bus.publish(DomainEvent::ResponseGenerated {
                    session_id: session_id.to_string(),
                    model: response.model.clone(),
                    tokens_used: usage.total_tokens,
                    timestamp: chrono::Utc::now(),
                });
            }

            let GenerationResponse { text, tool_calls, .. } = response;

            // Only the first call is acted on; the model sees its result and may ask again.
            let Some(call) = tool_calls.into_iter().next() else {
                let answer = text.unwrap_or_default();
                transcript.push(Turn::model(answer.clone()));
                return Ok(LoopOutcome {
                    state: LoopState::Done,
                    answer,
                    transcript,
                    media_generated,
                    degradations,
                    pending_tool: None,
                    iterations: iteration,
                });
            };

            state = LoopState::AwaitingToolResult;
            let mut request = Turn::tool_request(call.clone());
            if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                request.parts.insert(0, Part::Text { text });
            }
            transcript.push(request);
            debug!(session_id = %session_id, tool = %call.name, state = ?state, "Executing tool");

            let outcome = self.execute_tool(&call).await;
            match &outcome {
                ToolOutcome::Pending => {
                    info!(
                        session_id = %session_id,
                        tool = %call.name,
                        correlation_id = %call.correlation_id,
                        "Tool result pending"
                    );
                    return Ok(LoopOutcome {
                        state: LoopState::Pending,
                        answer: PENDING_ANSWER.to_string(),
                        transcript,
                        media_generated,
                        degradations,
                        pending_tool: Some(call),
                        iterations: iteration,
                    });
                }
                ToolOutcome::Failure { reason } => {
                    warn!(session_id = %session_id, tool = %call.name, reason = %reason, "Tool invocation failed");
                    if let Some(bus) = &self.event_bus {
                        bus.publish(DomainEvent::Degraded {
                            session_id: session_id.to_string(),
                            kind: "tool_invocation_failed".into(),
                            detail: reason.clone(),
                            timestamp: chrono::Utc::now(),
                        });
                    }
                    degradations.push(Degradation::ToolInvocationFailed {
                        tool_name: call.name.clone(),
                        reason: reason.clone(),
                    });
                }
                ToolOutcome::Success { media, .. } => {
                    media_generated |= media.is_some();
                }
            }

            transcript.push(Turn::tool_result(ToolResultPart {
                name: call.name,
                correlation_id: call.correlation_id,
                outcome,
            }));
            state = LoopState::Composing;
        }

        warn!(
            session_id = %session_id,
            iterations = self.max_iterations,
            "Max iterations reached without an answer"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::LoopExhausted {
                session_id: session_id.to_string(),
                iterations: self.max_iterations,
                timestamp: chrono::Utc::now(),
            });
        }

        Ok(LoopOutcome {
            state: LoopState::Failed,
            answer: EXHAUSTED_ANSWER.to_string(),
            transcript,
            media_generated,
            degradations,
            pending_tool: None,
            iterations: self.max_iterations,
        })
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        tokio::time::timeout(self.generation_timeout, self.generator.generate(request))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "{} did not answer within {}s",
                    self.generator.name(),
                    self.generation_timeout.as_secs()
                ))
            })?
    }

    /// Run a tool. A timeout becomes a failure outcome.
    async fn execute_tool(&self, call: &ToolInvocation) -> ToolOutcome {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.tool_timeout, self.tools.execute(call)).await {
            Ok(outcome) => outcome,
            Err(_) => ToolOutcome::failure(format!(
                "timed out after {}s",
                self.tool_timeout.as_secs()
            )),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(tool = %call.name, duration_ms, outcome = %outcome.describe(), "Tool executed");
        if let Some(bus) = &self.event_bus {
            let label = match &outcome {
                ToolOutcome::Success { .. } => "success",
                ToolOutcome::Failure { .. } => "failure",
                ToolOutcome::Pending => "pending",
            };
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                outcome: label.into(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }
        outcome
    }
}
