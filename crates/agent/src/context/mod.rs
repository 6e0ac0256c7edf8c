//! Working-window management over a session's history.
//!
//! The assembler keeps the history bounded by folding old turns into a
//! carried summary, and builds the context handed to generation:
//!
//! | Position | Source | Present when |
//! |----------|--------|--------------|
//! | 1. Reference material | Session fragment cache | Fragments cached |
//! | 2. Preamble | Carried summary | Summary non-empty |
//! | 3. History | Session history | Always |

pub mod assembler;
pub mod token;

pub use assembler::{AssembledContext, ContextAssembler};
