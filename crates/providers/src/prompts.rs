//! Prompt templates for the single-shot collaborators.

use lectern_core::provider::{ClassificationRequest, SummaryRequest};

pub const SUMMARIZE: &str = "You maintain the running memory of a tutoring session. \
Merge the existing summary and the new exchanges into one concise narrative, written \
in the third person. Keep what the learner is studying, what they have understood, \
where they struggled, and any open questions. Reply with the summary only.";

pub const CLASSIFY: &str = r#"You route messages for a tutoring assistant.
Decide whether the learner's message belongs to the tutor's subject area, and whether
answering it needs reference material from the curriculum.

Reply with a single JSON object and nothing else:
{
  "in_domain": boolean,
  "out_of_domain_message": string,   // polite redirection; required when in_domain is false, else ""
  "retrieval_needed": boolean,       // must be false when in_domain is false
  "retrieval_query": string          // search query; required when retrieval_needed is true, else ""
}

Greetings, thanks and follow-ups to an in-domain conversation are in domain."#;

pub fn summary_input(request: &SummaryRequest) -> String {
    let mut input = String::new();
    if !request.existing_summary.is_empty() {
        input.push_str("Existing summary:\n");
        input.push_str(&request.existing_summary);
        input.push_str("\n\n");
    }
    input.push_str("New exchanges:\n");
    for turn in &request.turns {
        input.push_str(&turn.render());
        input.push('\n');
    }
    input
}

pub fn classification_input(request: &ClassificationRequest) -> String {
    format!(
        "Subject area: {}\n\nConversation so far:\n{}\n\nAttachments present: {}\n\nLearner's message:\n{}",
        request.domain_summary,
        if request.prior_context_summary.is_empty() {
            "(none)"
        } else {
            &request.prior_context_summary
        },
        request.attachments_present,
        request.current_turn_text,
    )
}
