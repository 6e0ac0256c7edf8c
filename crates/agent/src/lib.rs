//! The tutoring pipeline: from a learner turn to a grounded answer.
//!
//! Every turn flows through the same stages:
//!
//! 1. **Route**: the [`IntentRouter`] decides whether the turn is in scope
//!    and whether it needs reference material
//! 2. **Retrieve**: the [`Retriever`] grounds the turn in fragments from the
//!    curriculum index
//! 3. **Assemble**: the [`ContextAssembler`] keeps history inside its window,
//!    compacting old turns into a carried summary
//! 4. **Answer**: the [`AgentLoop`] alternates generation and tool calls
//!    until the model produces text, or gives up after `max_iterations`
//!
//! [`TurnPipeline`] runs the stages under a per-session lock and commits
//! the session back to the cache once, at the end of the turn.

pub mod context;
pub mod locks;
pub mod loop_runner;
pub mod pipeline;
pub mod retriever;
pub mod router;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{AssembledContext, ContextAssembler};
pub use locks::SessionLocks;
pub use loop_runner::{AgentLoop, LoopOutcome, LoopState};
pub use pipeline::{TurnPipeline, TurnReply, TurnRequest};
pub use retriever::{RetrievalOutcome, Retriever};
pub use router::IntentRouter;
