//! # repo-rag CLI (`rag`)
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the database and run migrations |
//! | `rag index [--force] [--file PATH]` | Index the corpus, or one file |
//! | `rag search "<query>"` | Relevance-filtered semantic search |
//! | `rag status` | Document counts by type and language |
//! | `rag clear --yes` | Delete every indexed document |
//! | `rag serve` | Start the HTTP API |
//! | `rag session history <id>` | Show a session's recent messages |
//! | `rag session reset <id>` | Delete a session's messages |
//!
//! Command output goes to stdout; logs and progress go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use repo_rag::config;
use repo_rag::indexer::{FileIndexOutcome, IndexReport};
use repo_rag::migrate;
use repo_rag::progress::{format_number, ProgressMode};
use repo_rag::server;
use repo_rag::service::{IndexRequest, IndexResponse, RagService, SearchFormat, SearchRequest, SearchResponse};
use repo_rag::tools::ToolRegistry;

/// Incremental semantic index over a project's source and docs.
#[derive(Parser)]
#[command(name = "rag", version)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Safe to run repeatedly.
    Init,

    /// Bring the index in line with the corpus.
    ///
    /// Only new and changed files are embedded; files gone from the corpus
    /// are removed from the index.
    Index {
        /// Re-embed every file, ignoring stored hashes.
        #[arg(long)]
        force: bool,

        /// Index only this file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Progress output on stderr: off, human, or json.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Search the index.
    Search {
        query: String,

        /// Number of unfiltered results.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity for the relevant set.
        #[arg(long)]
        threshold: Option<f64>,

        /// Output format: text or json.
        #[arg(long, default_value = "text")]
        format: SearchFormat,
    },

    /// Document counts by type and language.
    Status,

    /// Delete every indexed document.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Inspect or reset conversation sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show the most recent messages of a session, oldest first.
    History {
        id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete every message of a session.
    Reset { id: String },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Index {
            force,
            file,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let service = RagService::open_with_reporter(cfg, mode.reporter()).await?;
            let response = service.index(IndexRequest { force, file }).await;
            service.close().await;
            match response? {
                IndexResponse::Full(report) => print_report(&report),
                IndexResponse::File(outcome) => print_file_outcome(&outcome),
            }
        }
        Commands::Search {
            query,
            limit,
            threshold,
            format,
        } => {
            let service = RagService::open(cfg).await?;
            let response = service
                .search(SearchRequest {
                    query,
                    limit,
                    threshold,
                    format,
                    session_id: None,
                })
                .await;
            service.close().await;
            match response? {
                SearchResponse::Text { text, .. } => print!("{}", text),
                json @ SearchResponse::Json { .. } => {
                    println!("{}", serde_json::to_string_pretty(&json)?)
                }
            }
        }
        Commands::Status => {
            let service = RagService::open(cfg).await?;
            let stats = service.status().await;
            service.close().await;
            println!("{}", serde_json::to_string_pretty(&stats?)?);
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("refusing to clear the index without --yes");
            }
            let service = RagService::open(cfg).await?;
            let result = service.clear().await;
            service.close().await;
            result?;
            println!("Index cleared.");
        }
        Commands::Serve => {
            let service = Arc::new(RagService::open(cfg).await?);
            server::run_server(service, ToolRegistry::with_builtins())
                .await
                .context("HTTP server failed")?;
        }
        Commands::Session { action } => {
            let service = RagService::open(cfg).await?;
            let result = run_session(&service, action).await;
            service.close().await;
            result?;
        }
    }

    Ok(())
}

async fn run_session(service: &RagService, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::History { id, limit } => {
            let history = service.session_history(&id, limit).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        SessionAction::Reset { id } => {
            let reset = service.session_reset(&id).await?;
            println!(
                "Deleted {} messages from session {}",
                format_number(reset.deleted),
                reset.session_id
            );
        }
    }
    Ok(())
}

fn print_report(report: &IndexReport) {
    println!("Index complete");
    println!("  indexed:   {}", format_number(report.indexed_count as u64));
    println!("  unchanged: {}", format_number(report.skipped_count as u64));
    println!("  removed:   {}", format_number(report.removed_count));
    println!("  total:     {}", format_number(report.total_in_store));
    for (doc_type, count) in &report.by_type {
        println!("    {:<8} {}", doc_type, format_number(*count));
    }
}

fn print_file_outcome(outcome: &FileIndexOutcome) {
    match outcome {
        FileIndexOutcome::Indexed {
            path,
            doc_type,
            language,
            line_count,
        } => println!(
            "Indexed {} ({}, {}, {} lines)",
            path,
            doc_type,
            language.as_deref().unwrap_or("unknown"),
            line_count
        ),
        FileIndexOutcome::Unchanged { message, .. } => println!("{}", message),
    }
}
