//! Domain event system: decoupled observability for the tutoring pipeline.
//!
//! Events are published when something interesting happens: a turn arrives,
//! history is compacted, a collaborator degrades. Subscribers (metrics,
//! audit logs, dashboards) react without coupling to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A learner turn entered the pipeline
    TurnReceived {
        session_id: String,
        attachments: bool,
        timestamp: DateTime<Utc>,
    },

    /// The intent router made its decision
    TurnClassified {
        session_id: String,
        in_domain: bool,
        retrieval_needed: bool,
        timestamp: DateTime<Utc>,
    },

    /// Reference fragments were merged into a session
    FragmentsRetrieved {
        session_id: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Older turns were folded into the carried summary
    HistoryCompacted {
        session_id: String,
        turns_summarized: usize,
        timestamp: DateTime<Utc>,
    },

    /// The generation collaborator answered
    ResponseGenerated {
        session_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        outcome: String, // "success", "failure", "pending"
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A recoverable condition; the turn continued with a best-effort answer
    Degraded {
        session_id: String,
        kind: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// The agent loop hit its iteration cap
    LoopExhausted {
        session_id: String,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// A session was pushed out of the cache
    SessionEvicted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A turn was aborted
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
