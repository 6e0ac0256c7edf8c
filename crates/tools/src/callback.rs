//! Out-of-band tool results, matched by correlation id.
//!
//! Long-running tools acknowledge a request immediately and deliver the
//! result later through a callback. A tool registers a waiter before it sends
//! the request; the callback side calls [`CallbackBroker::deliver`]. Results
//! that arrive after the waiter gave up are parked until the pipeline
//! collects them with [`CallbackBroker::take_late`]. Parked results are
//! bounded; the oldest uncollected one is dropped first.

use lectern_core::tool::ToolOutcome;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default cap on parked late results.
pub const DEFAULT_LATE_CAPACITY: usize = 256;

struct Slots {
    waiting: HashMap<String, oneshot::Sender<ToolOutcome>>,
    late: LruCache<String, ToolOutcome>,
}

pub struct CallbackBroker {
    slots: Mutex<Slots>,
}

impl Default for CallbackBroker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LATE_CAPACITY)
    }
}

/// A live waiter. Dropping it stops waiting, so a cancelled tool call never
/// leaves its slot behind.
pub struct Registration<'a> {
    broker: &'a CallbackBroker,
    correlation_id: String,
    receiver: oneshot::Receiver<ToolOutcome>,
}

impl Registration<'_> {
    /// Wait up to `grace` for the result.
    pub async fn wait(&mut self, grace: Duration) -> Option<ToolOutcome> {
        tokio::time::timeout(grace, &mut self.receiver).await.ok()?.ok()
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.broker.forget(&self.correlation_id);
    }
}

impl CallbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker parking at most `capacity` late results (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            slots: Mutex::new(Slots {
                waiting: HashMap::new(),
                late: LruCache::new(capacity),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register interest in a correlation id. Replaces any earlier waiter.
    pub fn register(&self, correlation_id: &str) -> Registration<'_> {
        let (tx, receiver) = oneshot::channel();
        self.slots().waiting.insert(correlation_id.to_string(), tx);
        Registration {
            broker: self,
            correlation_id: correlation_id.to_string(),
            receiver,
        }
    }

    /// Stop waiting. Anything delivered afterwards is kept as a late result.
    pub fn forget(&self, correlation_id: &str) {
        self.slots().waiting.remove(correlation_id);
    }

    /// Hand a result to whoever is waiting for it.
    ///
    /// Returns `true` if a live waiter received it. Otherwise the result is
    /// parked for [`take_late`](Self::take_late).
    pub fn deliver(&self, correlation_id: &str, outcome: ToolOutcome) -> bool {
        let mut slots = self.slots();
        let outcome = match slots.waiting.remove(correlation_id) {
            Some(tx) => match tx.send(outcome) {
                Ok(()) => return true,
                // Receiver dropped between registration and delivery.
                Err(outcome) => outcome,
            },
            None => outcome,
        };

        debug!(correlation_id, "Parking late tool result");
        if let Some((dropped, _)) = slots.late.push(correlation_id.to_string(), outcome)
            && dropped != correlation_id
        {
            warn!(correlation_id = %dropped, "Uncollected late tool result dropped");
        }
        false
    }

    /// Collect a parked late result.
    pub fn take_late(&self, correlation_id: &str) -> Option<ToolOutcome> {
        self.slots().late.pop(correlation_id)
    }

    pub fn waiting(&self) -> usize {
        self.slots().waiting.len()
    }

    /// Late results parked and not yet collected.
    pub fn parked(&self) -> usize {
        self.slots().late.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn delivery_reaches_waiter() {
        let broker = Arc::new(CallbackBroker::new());
        let mut registration = broker.register("c1");

        let sender = broker.clone();
        tokio::spawn(async move {
            assert!(sender.deliver("c1", ToolOutcome::success(serde_json::json!({"n": 1}))));
        });

        let outcome = registration.wait(Duration::from_secs(5)).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(broker.waiting(), 0);
    }

    #[test]
    fn delivery_without_waiter_is_parked() {
        let broker = CallbackBroker::new();
        assert!(!broker.deliver("c1", ToolOutcome::failure("render crashed")));
        assert!(matches!(broker.take_late("c1"), Some(ToolOutcome::Failure { .. })));
        assert!(broker.take_late("c1").is_none());
    }

    #[test]
    fn forgotten_waiter_parks_result() {
        let broker = CallbackBroker::new();
        let _registration = broker.register("c1");
        broker.forget("c1");
        assert!(!broker.deliver("c1", ToolOutcome::Pending));
        assert!(broker.take_late("c1").is_some());
    }

    #[test]
    fn dropped_registration_stops_waiting() {
        let broker = CallbackBroker::new();
        drop(broker.register("c1"));
        assert_eq!(broker.waiting(), 0);
        assert!(!broker.deliver("c1", ToolOutcome::failure("late")));
        assert!(broker.take_late("c1").is_some());
    }

    #[tokio::test]
    async fn cancelled_wait_releases_the_slot() {
        let broker = CallbackBroker::new();
        let wait = async {
            let mut registration = broker.register("c1");
            registration.wait(Duration::from_secs(60)).await
        };
        assert!(tokio::time::timeout(Duration::from_millis(10), wait).await.is_err());
        assert_eq!(broker.waiting(), 0);
    }

    #[test]
    fn parked_results_are_bounded() {
        let broker = CallbackBroker::with_capacity(4);
        for i in 0..10_000 {
            broker.deliver(&format!("unknown-{i}"), ToolOutcome::failure("orphaned"));
        }
        assert_eq!(broker.parked(), 4);
        assert!(broker.take_late("unknown-0").is_none());
        assert!(broker.take_late("unknown-9999").is_some());
    }
}
