//! LRU-backed session cache.
//!
//! The fast path for live sessions. A single mutex guards the recency list;
//! every operation is O(1) and never awaits, so the lock is never held across
//! a suspension point. Evicted sessions are handed to an optional hook after
//! the lock is released.

use lru::LruCache;
use lectern_core::cache::SessionCache;
use lectern_core::event::{DomainEvent, EventBus};
use lectern_core::message::SessionId;
use lectern_core::session::Session;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Called with each session pushed out by a capacity eviction.
pub type EvictionHook = Box<dyn Fn(&SessionId, &Session) + Send + Sync>;

pub struct LruSessionCache {
    entries: Mutex<LruCache<SessionId, Session>>,
    on_evict: Option<EvictionHook>,
    events: Option<Arc<EventBus>>,
    evictions: AtomicU64,
}

impl LruSessionCache {
    /// Create a cache holding at most `capacity` sessions (a capacity of zero is treated as one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            on_evict: None,
            events: None,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_eviction_hook(mut self, hook: EvictionHook) -> Self {
        self.on_evict = Some(hook);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Total capacity evictions since creation. Explicit deletes are not counted.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<SessionId, Session>> {
        // A panic while holding the guard cannot leave the LRU list half-updated.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn evicted(&self, id: &SessionId, session: &Session) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = %id, "Session evicted from cache");

        if let Some(hook) = &self.on_evict {
            hook(id, session);
        }
        if let Some(events) = &self.events {
            events.publish(DomainEvent::SessionEvicted {
                session_id: id.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

impl SessionCache for LruSessionCache {
    fn get(&self, id: &SessionId) -> Option<Session> {
        self.entries().get(id).cloned()
    }

    fn peek(&self, id: &SessionId) -> Option<Session> {
        self.entries().peek(id).cloned()
    }

    fn set(&self, id: SessionId, session: Session) {
        let displaced = self.entries().push(id.clone(), session);
        // `push` also returns the old value when the key was already present;
        // only a different key means something was evicted.
        if let Some((evicted_id, evicted)) = displaced
            && evicted_id != id
        {
            self.evicted(&evicted_id, &evicted);
        }
    }

    fn has(&self, id: &SessionId) -> bool {
        self.entries().contains(id)
    }

    fn delete(&self, id: &SessionId) {
        self.entries().pop(id);
    }

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn capacity(&self) -> usize {
        self.entries().cap().get()
    }
}
