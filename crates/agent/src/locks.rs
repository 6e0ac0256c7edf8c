//! Per-session serialization.
//!
//! Every turn for a session runs while holding that session's lock, so two
//! turns for the same session never interleave and one never overwrites the
//! other's history. Sessions do not contend with each other.

use lectern_core::message::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a session.
    ///
    /// The guard releases the session when dropped, including when the
    /// holding future is cancelled.
    pub async fn acquire(&self, id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Sessions with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_session_is_exclusive() {
        let locks = SessionLocks::new();
        let id = SessionId::from("s1");

        let guard = locks.acquire(&id).await;
        let second = tokio::time::timeout(Duration::from_millis(20), locks.acquire(&id)).await;
        assert!(second.is_err());

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(200), locks.acquire(&id)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn different_sessions_do_not_contend() {
        let locks = SessionLocks::new();
        let _a = locks.acquire(&SessionId::from("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&SessionId::from("b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = SessionLocks::new();
        for i in 0..10 {
            let _g = locks.acquire(&SessionId::from(format!("s{i}"))).await;
        }
        let _held = locks.acquire(&SessionId::from("last")).await;
        assert_eq!(locks.len(), 1);
    }
}
