//! # Study Insights CLI (`studyctl`)
//!
//! ## Usage
//!
//! ```bash
//! studyctl --config ./config/studyctl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `studyctl init` | Create the SQLite cache and run schema migrations |
//! | `studyctl extract <file>` | Show extraction status and text metrics |
//! | `studyctl analyze <paths…>` | Analyze documents (files or directories) |
//! | `studyctl backends` | List configured backends and their availability |
//! | `studyctl invalidate <fp>` | Drop cached insights for a document |
//! | `studyctl show <fp>` | Show a stored document's extraction status |
//!
//! A missing config file means mock backend only and a memory cache.
//! Set `RUST_LOG` to change log verbosity; logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use study_insights::commands::{self, AnalyzeArgs};
use study_insights::config::{self, Config};

/// Study Insights CLI: extract study documents and estimate exam topics.
#[derive(Parser)]
#[command(
    name = "studyctl",
    about = "Study Insights — document extraction and AI topic analysis for study material",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/studyctl.toml`. When the file does not exist,
    /// built-in defaults are used (mock backend, memory-only cache).
    #[arg(long, global = true, default_value = "./config/studyctl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the persistent cache.
    ///
    /// Requires `[cache] path`. Idempotent.
    Init,

    /// Extract text from one file and print its status.
    Extract {
        file: PathBuf,

        /// Declared type (`pdf`, `docx`, `txt` or a MIME type). Defaults to
        /// the file extension.
        #[arg(long = "type")]
        doc_type: Option<String>,
    },

    /// Analyze documents. Directories are searched for PDF, DOCX and text files.
    Analyze {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Preferred backend: `remote`, `local` or `mock`.
        #[arg(long)]
        backend: Option<String>,

        /// Insight categories to request.
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,

        #[arg(long)]
        max_topics: Option<usize>,

        /// Documents analyzed concurrently.
        #[arg(long)]
        workers: Option<usize>,

        /// Print outcomes as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List configured backends and whether they respond.
    Backends,

    /// Drop every cached insight for a document fingerprint.
    Invalidate { fingerprint: String },

    /// Show the stored extraction status for a document fingerprint.
    Show { fingerprint: String },
}

fn load(path: &std::path::Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("study_insights=info,studyctl=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Extraction needs no config
    if let Commands::Extract { file, doc_type } = &cli.command {
        return commands::run_extract(file, doc_type.as_deref());
    }

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Extract { .. } => {}
        Commands::Analyze {
            paths,
            backend,
            categories,
            max_topics,
            workers,
            json,
        } => {
            commands::run_analyze(
                &cfg,
                AnalyzeArgs {
                    paths,
                    backend,
                    categories,
                    max_topics,
                    workers,
                    json,
                },
            )
            .await?
        }
        Commands::Backends => commands::run_backends(&cfg).await?,
        Commands::Invalidate { fingerprint } => {
            commands::run_invalidate(&cfg, &fingerprint).await?
        }
        Commands::Show { fingerprint } => commands::run_show(&cfg, &fingerprint).await?,
    }

    Ok(())
}
