//! Lectern CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive tutoring session or single-message mode
//! - `ingest`: Chunk and embed reference material into the corpus
//! - `config`: Show, locate or validate the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern — a grounded tutoring assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Talk to the tutor
    Chat {
        /// Resume (or name) a session
        #[arg(short, long)]
        session: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Corpus file to ground answers in (defaults to ~/.lectern/corpus.jsonl)
        #[arg(long)]
        corpus: Option<PathBuf>,
    },

    /// Chunk and embed the text files in a directory
    Ingest {
        /// Directory of .txt and .md files
        dir: PathBuf,

        /// Corpus file to write (defaults to ~/.lectern/corpus.jsonl)
        #[arg(long)]
        corpus: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat {
            session,
            message,
            corpus,
        } => commands::chat::run(session, message, corpus).await?,
        Commands::Ingest { dir, corpus } => commands::ingest::run(&dir, corpus).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}
