//! `lectern chat`: interactive or single-message tutoring.

use crate::commands::runtime::{self, Runtime};
use lectern_agent::{LoopState, TurnReply, TurnRequest};
use lectern_config::AppConfig;
use lectern_core::message::SessionId;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    session: Option<String>,
    message: Option<String>,
    corpus: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Fail early with setup guidance when no key is configured
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    LECTERN_API_KEY=...   (generic)");
        eprintln!("    OPENAI_API_KEY=...    (for OpenAI direct)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let corpus_path = super::corpus_path(corpus);
    let rt = runtime::build(&config, &corpus_path).await?;
    let session_id = rt.pipeline.start_session(session.map(SessionId::from)).await?;

    if let Some(msg) = message {
        // Single message mode
        let reply = ask(&rt, &session_id, msg)
            .await
            .map_err(|e| e.user_message())?;
        println!("{}", reply.answer);
        return Ok(());
    }

    println!();
    println!("  Lectern — interactive tutoring");
    println!();
    println!("  Session:   {session_id}");
    println!("  Model:     {}", config.provider.model);
    println!("  Corpus:    {} fragments ({})", rt.corpus_fragments, corpus_path.display());
    println!("  Tools:     {}", if rt.tools.is_empty() { "none".to_string() } else { rt.tools.join(", ") });
    println!("  History:   {} store", rt.store);
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<String> = None;

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line == "exit" || line == "quit" {
            break;
        }

        if let Some(correlation_id) = pending.take() {
            pending = collect_late_result(&rt, &session_id, correlation_id).await;
        }

        if !line.is_empty() {
            eprint!("  ...");
            match ask(&rt, &session_id, line).await {
                Ok(reply) => {
                    eprint!("\r     \r");
                    show(&reply);
                    if let Some(correlation_id) = reply.pending_correlation_id
                        && let Some(superseded) = pending.replace(correlation_id)
                    {
                        discard_late_result(&rt, &superseded);
                    }
                }
                Err(e) => {
                    eprint!("\r     \r");
                    eprintln!("{}", failure_notice(&e));
                    println!();
                }
            }
        }

        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

async fn ask(rt: &Runtime, session_id: &SessionId, text: String) -> Result<TurnReply, lectern_core::Error> {
    rt.pipeline
        .respond(TurnRequest::new(session_id.clone(), text))
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "Turn failed"))
}

/// Hand a late tool result to the pipeline if the callback has landed.
/// Returns the correlation id again while it is still outstanding.
async fn collect_late_result(rt: &Runtime, session_id: &SessionId, correlation_id: String) -> Option<String> {
    let Some(outcome) = rt.broker.take_late(&correlation_id) else {
        return Some(correlation_id);
    };
    match rt.pipeline.deliver_tool_result(session_id, &correlation_id, outcome).await {
        Ok(reply) => {
            show(&reply);
            reply.pending_correlation_id
        }
        Err(e) => {
            tracing::warn!(error = %e, correlation_id, "Late tool result not delivered");
            eprintln!("{}", failure_notice(&e));
            None
        }
    }
}

/// The session only waits on its newest call; an older result can no longer be delivered.
fn discard_late_result(rt: &Runtime, correlation_id: &str) {
    if rt.broker.take_late(correlation_id).is_some() {
        tracing::debug!(correlation_id, "Discarded superseded tool result");
    }
}

/// What the learner sees when a turn is aborted. The detail goes to the log.
fn failure_notice(error: &lectern_core::Error) -> String {
    format!("  Tutor > {}", error.user_message())
}

fn show(reply: &TurnReply) {
    println!();
    for line in reply.answer.lines() {
        println!("  Tutor > {line}");
    }
    if reply.media_generated {
        println!("  (an illustration was generated)");
    }
    if reply.state == LoopState::Failed {
        println!("  (this answer is incomplete)");
    }
    for degradation in &reply.degradations {
        println!("  [note] {degradation}");
    }
    println!();
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}
