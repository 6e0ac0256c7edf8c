//! SessionCache trait: the fast-path store of live sessions.
//!
//! Operations are synchronous and never suspend. A miss is ordinary control
//! flow (`None`), not an error: the caller rehydrates from the durable store.

use crate::message::SessionId;
use crate::session::Session;

/// A capacity-bounded, recency-ordered map from session id to session state.
///
/// Contract:
/// - `get` on a hit marks the entry most recently used.
/// - `set` on an existing key rewrites it and refreshes recency; on a new key
///   at capacity it evicts exactly one entry, the least recently used.
/// - `delete` on an absent key is a no-op.
/// - `has` and `peek` do not change recency.
pub trait SessionCache: Send + Sync {
    fn get(&self, id: &SessionId) -> Option<Session>;

    /// Read an entry without promoting it.
    fn peek(&self, id: &SessionId) -> Option<Session>;

    fn set(&self, id: SessionId, session: Session);

    fn has(&self, id: &SessionId) -> bool;

    fn delete(&self, id: &SessionId);

    /// Number of live entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    fn capacity(&self) -> usize;
}
