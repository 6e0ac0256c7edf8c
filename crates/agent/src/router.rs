//! Intent router: decides whether a learner turn is in scope and whether
//! it needs grounding before the tutor answers.
//!
//! The decision itself is delegated to the classification collaborator; the
//! router builds its input and enforces the shape of its output. Anything
//! that does not parse into a consistent decision is a hard error.

use lectern_core::error::ClassificationError;
use lectern_core::intent::ClassificationResult;
use lectern_core::provider::{ClassificationRequest, Classifier};
use lectern_core::session::Session;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The classifier's wire format.
#[derive(Debug, Deserialize)]
struct RawClassification {
    in_domain: bool,
    #[serde(default)]
    out_of_domain_message: Option<String>,
    retrieval_needed: bool,
    #[serde(default)]
    retrieval_query: Option<String>,
}

/// Treat blank strings the same as null.
fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub struct IntentRouter {
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
    context_turns: usize,
}

impl IntentRouter {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            timeout: Duration::from_secs(20),
            context_turns: 4,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How many recent turns to include in the prior-context summary.
    pub fn with_context_turns(mut self, turns: usize) -> Self {
        self.context_turns = turns;
        self
    }

    pub async fn classify(
        &self,
        session: &Session,
        turn_text: &str,
        attachments_present: bool,
        domain_summary: &str,
    ) -> Result<ClassificationResult, ClassificationError> {
        let request = ClassificationRequest {
            prior_context_summary: self.prior_context(session),
            current_turn_text: turn_text.to_string(),
            attachments_present,
            domain_summary: domain_summary.to_string(),
        };

        let raw = tokio::time::timeout(self.timeout, self.classifier.classify(request))
            .await
            .map_err(|_| ClassificationError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })??;

        let result = Self::parse(raw)?;
        debug!(
            session_id = %session.id,
            in_domain = result.in_domain(),
            retrieval_needed = result.retrieval_needed(),
            "Turn classified"
        );
        Ok(result)
    }

    /// The carried summary followed by the last few turns, rendered as text.
    fn prior_context(&self, session: &Session) -> String {
        let start = session.history.len().saturating_sub(self.context_turns);
        let mut parts: Vec<String> = Vec::with_capacity(self.context_turns + 1);
        if !session.summary.is_empty() {
            parts.push(format!("Summary: {}", session.summary));
        }
        parts.extend(session.history[start..].iter().map(|t| t.render()));
        parts.join("\n")
    }

    /// Validate a raw classifier document.
    ///
    /// `out_of_domain_message` must be present exactly when `in_domain` is
    /// false, and `retrieval_query` exactly when `retrieval_needed` is true.
    pub fn parse(raw: serde_json::Value) -> Result<ClassificationResult, ClassificationError> {
        let raw: RawClassification = serde_json::from_value(raw)
            .map_err(|e| ClassificationError::Malformed(e.to_string()))?;

        let message = non_blank(raw.out_of_domain_message);
        let query = non_blank(raw.retrieval_query);

        if raw.retrieval_needed != query.is_some() {
            return Err(ClassificationError::Malformed(if raw.retrieval_needed {
                "retrieval_needed is true but retrieval_query is empty".into()
            } else {
                "retrieval_query given but retrieval_needed is false".into()
            }));
        }

        match (raw.in_domain, message) {
            (false, Some(message)) => Ok(ClassificationResult::OutOfDomain { message }),
            (false, None) => Err(ClassificationError::Malformed(
                "out-of-domain decision without a message".into(),
            )),
            (true, Some(_)) => Err(ClassificationError::Malformed(
                "in-domain decision carries an out-of-domain message".into(),
            )),
            (true, None) => Ok(ClassificationResult::InDomain {
                retrieval_query: query,
            }),
        }
    }
}
