//! The classification decision for a learner turn.

use serde::{Deserialize, Serialize};

/// Whether a turn is in scope and, if so, whether it needs grounding first.
///
/// The enum shape makes the pairing rules structural: an out-of-domain
/// decision always carries its message, and a retrieval query only exists
/// for in-domain turns that need one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ClassificationResult {
    /// Outside the tutor's domain; `message` is the final answer.
    OutOfDomain { message: String },
    /// In scope; `retrieval_query` is a self-contained query when grounding is needed.
    InDomain { retrieval_query: Option<String> },
}

impl ClassificationResult {
    pub fn in_domain(&self) -> bool {
        matches!(self, Self::InDomain { .. })
    }

    pub fn out_of_domain_message(&self) -> Option<&str> {
        match self {
            Self::OutOfDomain { message } => Some(message),
            Self::InDomain { .. } => None,
        }
    }

    pub fn retrieval_needed(&self) -> bool {
        self.retrieval_query().is_some()
    }

    pub fn retrieval_query(&self) -> Option<&str> {
        match self {
            Self::InDomain { retrieval_query } => retrieval_query.as_deref(),
            Self::OutOfDomain { .. } => None,
        }
    }
}
