//! # doc-chat CLI
//!
//! ## Usage
//!
//! ```bash
//! doc-chat --config ./config/doc-chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `doc-chat serve` | Load + index the document, then serve the chat API |
//! | `doc-chat query "<text>"` | Print the chunks retrieved for a question |
//! | `doc-chat extract` | Print the text extracted from the document |
//!
//! `OPENAI_API_KEY` must be set (environment or `.env`) for `serve`, and for
//! `query` when the embedding provider is `openai`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use doc_chat::config::{self, Credentials};
use doc_chat::document::load_document;
use doc_chat::index::Retriever;
use doc_chat::server;

/// doc-chat — ask questions about a PDF and get streamed, grounded answers.
#[derive(Parser)]
#[command(name = "doc-chat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/doc-chat.toml`. A missing file means "use the
    /// built-in defaults".
    #[arg(long, global = true, default_value = "./config/doc-chat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP chat server.
    ///
    /// Fails without binding if the API key is missing, the document
    /// cannot be loaded, or the index cannot be built.
    Serve,

    /// Retrieve the chunks most relevant to a question.
    Query {
        /// The question to retrieve context for.
        text: String,

        /// Number of chunks to return (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print the text extracted from the configured document.
    Extract,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("doc_chat=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Query { text, top_k } => {
            let credentials = if cfg.embedding.needs_api_key() {
                Some(Credentials::from_env()?)
            } else {
                None
            };
            let index = server::build_index(&cfg, credentials.as_ref()).await?;
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let chunks = index.retrieve(&text, top_k).await?;
            for (rank, chunk) in chunks.iter().enumerate() {
                println!("--- [{}] ---", rank + 1);
                println!("{}", chunk);
            }
        }
        Commands::Extract => {
            let text = load_document(&cfg.document.path)?;
            println!("{}", text);
        }
    }

    Ok(())
}
