//! # Notizbuch CLI (`nb`)
//!
//! Command-line front end over the ingestion and request pipeline. The
//! desktop shell drives the same [`notizbuch::pipeline::Notebook`] surface;
//! `nb` exists for scripting and for exercising the pipeline without a UI.
//!
//! ## Usage
//!
//! ```bash
//! nb --settings ./config/notizbuch.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nb status` | Probe the Ollama server (starting it if `auto_start` is set) |
//! | `nb models` | List models available on the server |
//! | `nb chat "<message>" [--file <path>]` | Send a chat, optionally grounded in a document |
//! | `nb extract <path> [--json]` | Extract (and normalize) a document's text |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use notizbuch::config::FileSettings;
use notizbuch::pipeline::Notebook;

/// Notizbuch — chat with a local Ollama server, grounded in your documents.
#[derive(Parser)]
#[command(
    name = "nb",
    about = "Notizbuch — document ingestion and chat against a local Ollama server",
    version
)]
struct Cli {
    /// Path to the settings file (TOML). Created with defaults when missing.
    #[arg(long, global = true, default_value = "./config/notizbuch.toml")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the Ollama server is reachable.
    ///
    /// When unreachable and `server.auto_start` is set, tries to launch
    /// `ollama serve` before reporting.
    Status,

    /// List models available on the server.
    Models,

    /// Send a chat message.
    ///
    /// With `--file`, the document is extracted and normalized first and
    /// the model answers grounded in its content.
    Chat {
        /// The user message.
        message: String,

        /// Document to use as context (pdf, docx, xlsx, xls, txt, md, json).
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Extract a document's text.
    Extract {
        /// Document path.
        path: PathBuf,

        /// Print the full outcome as JSON instead of the raw text.
        #[arg(long)]
        json: bool,

        /// Normalize the text for model consumption before printing.
        #[arg(long)]
        normalize: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Arc::new(FileSettings::load_or_init(&cli.settings)?);
    let notebook = Notebook::new(settings)?;

    match cli.command {
        Commands::Status => {
            if notebook.ensure_server_running().await {
                println!("Ollama server erreichbar.");
            } else {
                println!("Ollama server nicht erreichbar.");
                std::process::exit(1);
            }
        }
        Commands::Models => {
            let list = notebook.list_models().await;
            if let Some(error) = &list.error {
                eprintln!("Warnung: {}", error);
            }
            if list.models.is_empty() {
                println!("Keine Modelle gemeldet.");
            }
            for model in &list.models {
                println!("{}\t{} bytes", model.name, model.size);
            }
        }
        Commands::Chat { message, file } => {
            let context = match &file {
                Some(path) => {
                    let doc = notebook.read_and_normalize_document(path).await;
                    if !doc.success {
                        anyhow::bail!(
                            "Datei konnte nicht gelesen werden: {}",
                            doc.error.unwrap_or_default()
                        );
                    }
                    doc.content
                }
                None => None,
            };

            let outcome = notebook.send_chat(&message, context.as_deref()).await;
            if outcome.success {
                println!("{}", outcome.response.unwrap_or_default());
            } else {
                anyhow::bail!(outcome.error.unwrap_or_default());
            }
        }
        Commands::Extract {
            path,
            json,
            normalize,
        } => {
            if normalize {
                let doc = notebook.read_and_normalize_document(&path).await;
                if json {
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                } else if doc.success {
                    println!("{}", doc.content.unwrap_or_default());
                } else {
                    anyhow::bail!(doc.error.unwrap_or_default());
                }
            } else {
                let outcome = notebook.extract_document_text(&path).await;
                if json {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                } else if outcome.success {
                    println!("{}", outcome.text.unwrap_or_default());
                } else {
                    anyhow::bail!(outcome.error.unwrap_or_default());
                }
            }
        }
    }

    Ok(())
}
