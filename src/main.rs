//! # kb-assistant CLI (`kba`)
//!
//! The `kba` binary ingests documents into the local vector index and
//! answers questions over them.
//!
//! ## Usage
//!
//! ```bash
//! kba --config ./config/kba.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kba ingest <PATH>...` | Index PDF / DOCX / PPTX / TXT / MD files or directories |
//! | `kba confluence space <KEY>` | Index a Confluence space, optionally with `--cql` |
//! | `kba confluence pages <ID\|URL>...` | Index specific Confluence pages |
//! | `kba ask "<question>"` | Answer one question with sources |
//! | `kba chat` | Interactive question loop |
//! | `kba summarize` | Summarize the corpus, or one file with `--file` |
//!
//! ## Environment
//!
//! A `.env` file in the working directory is loaded first. Credentials:
//! `OPENAI_API_KEY`, or `AZURE_OPENAI_API_KEY` + `AZURE_OPENAI_ENDPOINT`;
//! `CONFLUENCE_URL`, `CONFLUENCE_USERNAME`, `CONFLUENCE_API_TOKEN`.
//! Log verbosity: `RUST_LOG`, else `LOG_LEVEL` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kb_assistant::chat;
use kb_assistant::config::{Backend, Config};
use kb_assistant::index::IndexMode;
use kb_assistant::ingest;

/// kb-assistant: ask questions about your documents and Confluence pages.
#[derive(Parser)]
#[command(
    name = "kba",
    about = "Retrieval-augmented assistant over local documents and Confluence",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./config/kba.toml")]
    config: PathBuf,

    /// Vector index directory (overrides `index.path`).
    #[arg(long, global = true)]
    index_path: Option<PathBuf>,

    /// Start from an empty index instead of loading the persisted one.
    #[arg(long, global = true)]
    recreate: bool,

    /// Number of chunks to retrieve per question.
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(2..=15))]
    top_k: Option<u16>,

    /// Model backend: `openai` or `azure`.
    #[arg(long, global = true)]
    provider: Option<Backend>,

    /// Chat model (or Azure deployment) name.
    #[arg(long, global = true)]
    chat_model: Option<String>,

    /// Embedding model (or Azure deployment) name.
    #[arg(long, global = true)]
    embedding_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index local files and directories.
    ///
    /// Directories are walked recursively; unsupported files inside them
    /// are skipped. A named file with an unsupported extension aborts the
    /// whole batch.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Index Confluence content.
    Confluence {
        #[command(subcommand)]
        action: ConfluenceAction,
    },

    /// Answer a question from the indexed content.
    Ask {
        question: String,

        /// Print `{answer, source_documents}` as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive question loop.
    Chat,

    /// Summarize the indexed corpus or a single file.
    Summarize {
        /// Summarize only this file, using a temporary in-memory index.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Extra guidance for the summary.
        #[arg(long)]
        instruction: Option<String>,

        /// Print `{summary, source_documents}` as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfluenceAction {
    /// Index every page of a space.
    Space {
        space_key: String,

        /// Additional CQL filter whose results are also indexed.
        #[arg(long)]
        cql: Option<String>,
    },
    /// Index pages by id or URL.
    Pages {
        #[arg(required = true)]
        pages: Vec<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL")
            .map(|l| l.trim().to_lowercase())
            .unwrap_or_else(|_| "info".to_string());
        tracing_subscriber::EnvFilter::try_new(level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(path) = &cli.index_path {
        cfg.index.path = path.clone();
    }
    if let Some(k) = cli.top_k {
        cfg.retrieval.top_k = usize::from(k);
    }
    if let Some(backend) = cli.provider {
        cfg.provider.backend = backend;
    }
    if let Some(model) = &cli.chat_model {
        cfg.provider.chat_model = model.clone();
    }
    if let Some(model) = &cli.embedding_model {
        cfg.provider.embedding_model = model.clone();
    }
    cfg.validate()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;
    apply_cli_overrides(&mut cfg, &cli)?;

    let mode = if cli.recreate {
        IndexMode::Recreate(cfg.index.path.clone())
    } else {
        IndexMode::Load(cfg.index.path.clone())
    };

    match cli.command {
        Commands::Ingest { paths } => {
            ingest::run_ingest(&cfg, mode, &paths).await?;
        }
        Commands::Confluence { action } => match action {
            ConfluenceAction::Space { space_key, cql } => {
                ingest::run_confluence_space(&cfg, mode, &space_key, cql.as_deref()).await?;
            }
            ConfluenceAction::Pages { pages } => {
                ingest::run_confluence_pages(&cfg, mode, &pages).await?;
            }
        },
        Commands::Ask { question, json } => {
            chat::run_ask(&cfg, mode, &question, json).await?;
        }
        Commands::Chat => {
            chat::run_chat(&cfg, mode).await?;
        }
        Commands::Summarize {
            file,
            instruction,
            json,
        } => {
            chat::run_summarize(&cfg, mode, file.as_deref(), instruction.as_deref(), json).await?;
        }
    }

    Ok(())
}
