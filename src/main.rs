//! # docqa CLI
//!
//! The `docqa` binary runs the HTTP service and offers operator commands
//! for ingesting, searching, and asking questions from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa serve` | Load the index and start the HTTP API |
//! | `docqa ingest <file>` | Copy a file into the upload directory and index it |
//! | `docqa search "<query>"` | Print what the `search_documents` tool returns |
//! | `docqa ask "<query>"` | Answer a question and print the context preview |
//! | `docqa status` | Show index state, passage count, and model |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `docqa=info`). API keys may be placed in a `.env` file in the
//! working directory.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use docqa::config::{self, Config};
use docqa::embedding::create_embedder;
use docqa::ingest::{save_upload, try_ingest_document};
use docqa::knowledge::KnowledgeBase;
use docqa::server::{self, AppState};
use docqa::traits::ToolContext;

/// docqa: ask questions about your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa: question answering over uploaded documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docqa.toml`. When the file does not exist,
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    ///
    /// Loads the persisted index (if any) and binds to `[server].bind`.
    Serve,

    /// Ingest a document.
    ///
    /// The file is copied into `[storage].upload_dir`, split into
    /// passages, embedded, and appended to the index.
    Ingest {
        /// Path to a `.pdf` or text file.
        file: PathBuf,
    },

    /// Search indexed documents.
    ///
    /// Prints exactly what the agent's `search_documents` tool would see.
    Search {
        /// The search query string.
        query: String,
    },

    /// Ask a question.
    Ask {
        /// The question.
        query: String,
    },

    /// Show the state of the knowledge base.
    Status,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docqa=info,docqa_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    warn!(path = %path.display(), "config file not found, using defaults");
    Ok(Config::minimal())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { file } => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("Not a file: {}", file.display()))?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let stored = save_upload(&cfg.storage.upload_dir, &name, &bytes).await?;

            let kb = KnowledgeBase::new(cfg.storage.index_path.clone(), create_embedder(&cfg.embedding)?);
            kb.load_existing_index().await;
            let report = try_ingest_document(&kb, &cfg.chunking, &stored).await?;
            println!(
                "Ingested {}: {} pages, {} passages ({} total in index)",
                report.document, report.pages, report.passages, report.total_passages
            );
        }
        Commands::Search { query } => {
            let kb = Arc::new(KnowledgeBase::new(
                cfg.storage.index_path.clone(),
                create_embedder(&cfg.embedding)?,
            ));
            let ctx = ToolContext::new(kb, cfg.retrieval.clone());
            println!("{}", ctx.search_documents(&query).await);
        }
        Commands::Ask { query } => {
            let state = AppState::from_config(&cfg)?;
            let out = state.agent.answer(&query, &[]).await;
            println!("{}", out.answer);
            if !out.context_preview.is_empty() {
                println!("\n--- context ---\n{}", out.context_preview);
            }
        }
        Commands::Status => {
            let kb = KnowledgeBase::new(cfg.storage.index_path.clone(), create_embedder(&cfg.embedding)?);
            kb.load_existing_index().await;
            let status = kb.status().await;
            println!("Index:    {}", cfg.storage.index_path.display());
            println!("State:    {}", status.state);
            if let Some(reason) = &status.reason {
                println!("Reason:   {}", reason);
            }
            println!("Passages: {}", status.passages);
            if let Some(model) = &status.model {
                println!("Model:    {} ({} dims)", model, status.dims);
            }
            if status.state == "failed" {
                bail!("index could not be loaded");
            }
        }
    }

    Ok(())
}
