//! Context assembler: window enforcement, compaction, and context assembly.
//!
//! History grows one turn at a time through [`ContextAssembler::append_turn`].
//! Once it holds more than twice the window size, the oldest turns beyond the
//! window are summarized together with the carried summary and dropped. The
//! summary is made durable before the in-memory history is touched, so a
//! failed or cancelled compaction leaves the session exactly as it was.
//!
//! # Determinism
//!
//! [`ContextAssembler::assemble`] is a pure function of the session: it never
//! mutates it, and identical sessions produce identical contexts.

use crate::context::token;
use lectern_core::error::Degradation;
use lectern_core::event::{DomainEvent, EventBus};
use lectern_core::message::Turn;
use lectern_core::provider::{Summarizer, SummaryRequest};
use lectern_core::session::Session;
use lectern_core::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The context handed to the agent loop for one turn.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Reference material, preamble, then history, in that order
    pub turns: Vec<Turn>,

    /// The summary merged in as the preamble, if any
    pub carried_summary: Option<String>,

    /// Ids of the fragments included as reference material, most recent first
    pub grounding: Vec<String>,

    /// Rough size of `turns`, for logging
    pub estimated_tokens: usize,
}

pub struct ContextAssembler {
    summarizer: Arc<dyn Summarizer>,
    store: Option<Arc<dyn SessionStore>>,
    window_size: usize,
    timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl ContextAssembler {
    pub fn new(summarizer: Arc<dyn Summarizer>, window_size: usize) -> Self {
        Self {
            summarizer,
            store: None,
            window_size: window_size.max(1),
            timeout: Duration::from_secs(45),
            event_bus: None,
        }
    }

    /// Persist each new summary here before acknowledging a compaction.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bound on each summarizer and store call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Append a turn and compact if the history outgrew twice the window.
    ///
    /// The append itself always succeeds. A failed compaction is returned as
    /// a degradation; the history stays over-size and compaction is retried
    /// on the next append.
    pub async fn append_turn(&self, session: &mut Session, turn: Turn) -> Option<Degradation> {
        session.history.push(turn);

        if session.history.len() <= 2 * self.window_size {
            return None;
        }

        match self.compact(session).await {
            Ok(()) => None,
            Err(reason) => {
                warn!(session_id = %session.id, reason = %reason, "Compaction skipped");
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::Degraded {
                        session_id: session.id.to_string(),
                        kind: "summarization_degraded".into(),
                        detail: reason.clone(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                Some(Degradation::SummarizationDegraded { reason })
            }
        }
    }

    /// Where the kept window starts.
    ///
    /// Normally `len - window_size`. A tool result at that position would lose
    /// its request to the summary, so the boundary moves forward past it.
    fn split_point(&self, history: &[Turn]) -> usize {
        let mut split = history.len().saturating_sub(self.window_size);
        while split < history.len().saturating_sub(1) && history[split].tool_result_part().is_some() {
            split += 1;
        }
        split
    }

    async fn compact(&self, session: &mut Session) -> Result<(), String> {
        let split = self.split_point(&session.history);
        if split == 0 {
            return Ok(());
        }

        debug!(session_id = %session.id, turns = split, "Summarizing old turns");

        let request = SummaryRequest {
            existing_summary: session.summary.clone(),
            turns: session.history[..split].to_vec(),
        };
        let summary = match tokio::time::timeout(self.timeout, self.summarizer.summarize(request)).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => {
                return Err(format!("summarizer timed out after {}s", self.timeout.as_secs()));
            }
        };

        let compacted_turns = session.compacted_turns + split;
        if let Some(store) = &self.store {
            match tokio::time::timeout(
                self.timeout,
                store.write_summary(&session.id, &summary, compacted_turns),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(format!("summary not persisted: {e}")),
                Err(_) => {
                    return Err(format!(
                        "summary write timed out after {}s",
                        self.timeout.as_secs()
                    ));
                }
            }
        }

        session.history.drain(..split);
        session.summary = summary;
        session.compacted_turns = compacted_turns;

        info!(
            session_id = %session.id,
            turns_summarized = split,
            kept = session.history.len(),
            "History compacted"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::HistoryCompacted {
                session_id: session.id.to_string(),
                turns_summarized: split,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(())
    }

    /// Build the generation context for a session without mutating it.
    pub fn assemble(&self, session: &Session) -> AssembledContext {
        let mut turns = Vec::with_capacity(session.history.len() + 2);
        let mut grounding = Vec::with_capacity(session.fragments.len());

        if !session.fragments.is_empty() {
            let mut material = String::from(
                "Reference material for this session. Ground your answer in it where relevant.\n",
            );
            for (id, text) in session.fragments.iter() {
                material.push_str(&format!("\n[{id}]\n{text}\n"));
                grounding.push(id.to_string());
            }
            turns.push(Turn::system(material));
        }

        let carried_summary = (!session.summary.is_empty()).then(|| session.summary.clone());
        if let Some(summary) = &carried_summary {
            turns.push(Turn::preamble(format!(
                "Summary of our conversation so far:\n{summary}"
            )));
        }

        turns.extend(session.history.iter().cloned());

        let estimated_tokens = token::estimate_turns_tokens(&turns);
        debug!(
            session_id = %session.id,
            turns = turns.len(),
            fragments = grounding.len(),
            estimated_tokens,
            "Context assembled"
        );

        AssembledContext {
            turns,
            carried_summary,
            grounding,
            estimated_tokens,
        }
    }
}
