//! Session: the per-conversation working state.
//!
//! A session holds the chronological turn history, the carried summary of
//! compacted turns, and a bounded cache of retrieved reference fragments.

use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;

use crate::message::{SessionId, ToolInvocation, Turn};
use crate::store::StoredSession;
use crate::tool::ToolOutcome;

/// Default cap on cached fragments per session.
pub const DEFAULT_MAX_FRAGMENTS: usize = 64;

/// Retrieved fragment texts keyed by fragment id.
///
/// Bounded: once `capacity` entries are cached, inserting a new id evicts the
/// least recently inserted or refreshed one. Re-inserting an id overwrites its
/// text and refreshes it.
#[derive(Debug, Clone)]
pub struct FragmentCache {
    entries: LruCache<String, String>,
}

impl FragmentCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Insert or overwrite a fragment. Returns the id evicted to make room, if any.
    pub fn insert(&mut self, id: impl Into<String>, text: impl Into<String>) -> Option<String> {
        let id = id.into();
        match self.entries.push(id.clone(), text.into()) {
            Some((evicted, _)) if evicted != id => Some(evicted),
            _ => None,
        }
    }

    /// Look up a fragment without refreshing it.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.peek(id).map(|s| s.as_str())
    }

    /// Iterate fragments, most recently inserted first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

impl Default for FragmentCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAGMENTS)
    }
}

/// The working state of one tutoring session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,

    /// Chronological turns; append-only except during compaction
    pub history: Vec<Turn>,

    /// Retrieved reference material owned by this session
    pub fragments: FragmentCache,

    /// Narrative summary of compacted turns; empty until the first compaction
    pub summary: String,

    /// A tool call whose result has not arrived yet
    pub pending_tool: Option<ToolInvocation>,

    /// Total turns folded into `summary` over the session's lifetime
    pub compacted_turns: usize,
}

impl Session {
    /// Create an empty session.
    pub fn new(id: SessionId, max_fragments: usize) -> Self {
        Self {
            id,
            history: Vec::new(),
            fragments: FragmentCache::new(max_fragments),
            summary: String::new(),
            pending_tool: None,
            compacted_turns: 0,
        }
    }

    /// Rehydrate a session from its durable record.
    ///
    /// Turns already covered by the stored summary are skipped. The fragment
    /// cache is not durable and starts empty. A tool call still waiting on its
    /// result is recovered from the full durable history.
    pub fn from_stored(id: SessionId, stored: StoredSession, max_fragments: usize) -> Self {
        let covered = stored.summarized_turns.min(stored.history.len());
        let pending_tool = unanswered_call(&stored.history);
        Self {
            id,
            history: stored.history.into_iter().skip(covered).collect(),
            fragments: FragmentCache::new(max_fragments),
            summary: stored.summary,
            pending_tool,
            compacted_turns: covered,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.summary.is_empty()
    }
}

/// The most recent tool request without a delivered result. A `Pending`
/// placeholder result does not count as delivered.
fn unanswered_call(history: &[Turn]) -> Option<ToolInvocation> {
    let mut delivered = HashSet::new();
    for turn in history.iter().rev() {
        if let Some(result) = turn.tool_result_part()
            && result.outcome != ToolOutcome::Pending
        {
            delivered.insert(result.correlation_id.as_str());
        }
        if let Some(request) = turn.tool_request_part()
            && !delivered.contains(request.correlation_id.as_str())
        {
            return Some(request.clone());
        }
    }
    None
}
