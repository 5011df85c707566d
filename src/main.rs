//! # Luật Thuế CLI (`luatthue`)
//!
//! Question answering over Vietnamese tax-law PDFs with Gemini.
//!
//! ## Usage
//!
//! ```bash
//! luatthue --config ./config/luatthue.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `luatthue chat` | Interactive chat over the documents directory |
//! | `luatthue ask "<question>"` | One question, one answer |
//! | `luatthue sync` | Build the knowledge base and print the report |
//! | `luatthue docs` | List the local PDFs |
//! | `luatthue serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Chat, printing replies as they stream in
//! GOOGLE_API_KEY=... luatthue chat --stream
//!
//! # Check which laws will be loaded
//! luatthue docs
//!
//! # Try the whole flow without network access
//! luatthue --offline ask "Thuế TNCN tính thế nào?"
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG` (default `warn`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use luatthue::chat::{self, ChatContext};
use luatthue::config::{self, Config};
use luatthue::credentials::resolve_api_key;
use luatthue::documents;
use luatthue::gemini::GeminiClient;
use luatthue::knowledge::KnowledgeCache;
use luatthue::memory::{InMemoryDocumentStore, ScriptedChatModel};
use luatthue::progress::ProgressMode;
use luatthue::server;
use luatthue::traits::{ChatModel, DocumentStore};

/// Vietnamese tax-law assistant backed by Gemini.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults: PDFs from `./tailieu`, the key from
/// `GOOGLE_API_KEY`.
#[derive(Parser)]
#[command(
    name = "luatthue",
    about = "Trợ lý Luật Thuế Việt Nam: hỏi đáp trên văn bản luật PDF với Gemini",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/luatthue.toml")]
    config: PathBuf,

    /// Sync progress on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Use in-process fakes instead of Gemini: uploads are kept in memory
    /// and replies echo the question.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat interactively.
    ///
    /// Loads the knowledge base, lists the documents, then answers questions
    /// from stdin. Commands: /history, /reset, /quit.
    Chat {
        /// Print replies as they stream in.
        #[arg(long)]
        stream: bool,
    },

    /// Ask a single question and exit.
    Ask {
        question: String,

        #[arg(long)]
        stream: bool,
    },

    /// Upload or reuse every local PDF and report the result.
    Sync {
        /// Print the knowledge base as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the PDFs in the documents directory.
    Docs,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

/// Remote (or fake) provider shared by every command.
struct Backend {
    store: Arc<dyn DocumentStore>,
    model: Arc<dyn ChatModel>,
}

impl Backend {
    fn connect(cfg: &Config, offline: bool, interactive: bool) -> Result<Self> {
        if offline {
            tracing::info!("using offline backend");
            return Ok(Self {
                store: Arc::new(InMemoryDocumentStore::new()),
                model: Arc::new(ScriptedChatModel::new()),
            });
        }

        let key = resolve_api_key(&cfg.credentials, interactive)?;
        tracing::debug!(source = ?key.source, "API key resolved");
        let client = Arc::new(GeminiClient::new(&cfg.gemini, key.expose())?);
        Ok(Self {
            store: client.clone(),
            model: client,
        })
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let cfg = config::load_config_or_default(&cli.config)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Docs => {
            documents::list_documents(&cfg.documents.dir)?;
        }
        Commands::Sync { json } => {
            let backend = Backend::connect(&cfg, cli.offline, false)?;
            let knowledge = KnowledgeCache::new();
            let outcome = knowledge
                .load(&cfg, backend.store.as_ref(), progress.as_ref())
                .await;
            let kb = match outcome.as_ref() {
                Ok(kb) => kb,
                Err(e) => anyhow::bail!("{}", e),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(kb)?);
            } else {
                println!(
                    "{} document(s) ready ({} reused, {} uploaded, {} skipped)",
                    kb.len(),
                    kb.report.reused,
                    kb.report.uploaded,
                    kb.report.skipped.len()
                );
                for doc in &kb.documents {
                    println!("  {}  {}", doc.display_name, doc.uri);
                }
                for skipped in &kb.report.skipped {
                    println!("  skipped {}: {}", skipped.name, skipped.reason);
                }
                if !kb.report.listing_available {
                    println!("  (remote listing unavailable; every file was uploaded)");
                }
            }
        }
        Commands::Chat { stream } => {
            let backend = Backend::connect(&cfg, cli.offline, true)?;
            let knowledge = KnowledgeCache::new();
            let ctx = ChatContext {
                config: &cfg,
                knowledge: &knowledge,
                store: backend.store.as_ref(),
                model: backend.model.as_ref(),
                progress: progress.as_ref(),
                stream: stream || cfg.chat.stream,
            };
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            chat::run_repl(&ctx, stdin, &mut std::io::stdout()).await?;
        }
        Commands::Ask { question, stream } => {
            let backend = Backend::connect(&cfg, cli.offline, true)?;
            let knowledge = KnowledgeCache::new();
            let ctx = ChatContext {
                config: &cfg,
                knowledge: &knowledge,
                store: backend.store.as_ref(),
                model: backend.model.as_ref(),
                progress: progress.as_ref(),
                stream: stream || cfg.chat.stream,
            };
            chat::ask(&ctx, &question, &mut std::io::stdout()).await?;
        }
        Commands::Serve => {
            let backend = Backend::connect(&cfg, cli.offline, false)?;
            server::run_server(cfg, backend.store, backend.model).await?;
        }
    }

    Ok(())
}
