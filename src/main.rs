//! # docvault CLI
//!
//! ## Usage
//!
//! ```bash
//! docvault --config ./config/docvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docvault init` | Create the SQLite database and run schema migrations |
//! | `docvault serve` | Start the HTTP API server |
//! | `docvault ingest <path>` | Register a local file and ingest it synchronously |
//! | `docvault reprocess <id>` | Re-run ingestion for a stored document |
//! | `docvault files` | List documents with chunk and embedding counts |
//! | `docvault create-admin` | Create or promote an administrator |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `docvault=info,tower_http=info`). Command output goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docvault::{accounts, config, files, ingest, migrate, server};

/// docvault: document upload, extraction, chunking and embedding backend.
#[derive(Parser)]
#[command(
    name = "docvault",
    about = "Document ingestion backend: extract, chunk, embed, store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Safe to run
    /// repeatedly.
    Init,

    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Register a local file as a document and ingest it.
    ///
    /// Runs extraction, chunking and embedding inline and prints the result.
    /// Exits with an error when the document ends in `Error`.
    Ingest {
        /// Path to a `.txt`, `.pdf` or `.docx` file.
        path: PathBuf,
    },

    /// Delete a document's chunks and embeddings and ingest it again.
    Reprocess {
        /// Document UUID.
        id: String,
    },

    /// List documents with their status and chunk counts.
    Files,

    /// Create an admin account, or promote an existing one.
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docvault=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { path } => {
            ingest::run_ingest(&cfg, &path).await?;
        }
        Commands::Reprocess { id } => {
            ingest::run_reprocess(&cfg, &id).await?;
        }
        Commands::Files => {
            files::run_list_files(&cfg).await?;
        }
        Commands::CreateAdmin {
            email,
            password,
            full_name,
        } => {
            accounts::run_create_admin(&cfg, &email, &password, full_name.as_deref()).await?;
        }
    }

    Ok(())
}
