use anyhow::{bail, Context, Result};
use assistant_console_lib::api::{Backend, HttpBackend, UploadFile};
use assistant_console_lib::chat::ChatController;
use assistant_console_lib::config::{self, AppConfig};
use assistant_console_lib::db::Database;
use assistant_console_lib::format::sanitize_terminal;
use assistant_console_lib::terminal::{document_line, TerminalView};
use assistant_console_lib::upload::UploadController;
use assistant_console_lib::view::{Notice, UploadView};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "assistant-console", version, about = "Document upload, RAG query and streaming chat client")]
struct Cli {
    /// Directory holding the settings database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Backend address; overrides the stored setting
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat; `/clear` drops the server-side history, `/quit` leaves
    Chat,
    /// Upload documents and follow their processing
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Return as soon as the uploads are accepted
        #[arg(long)]
        no_wait: bool,
    },
    /// List uploaded documents
    Documents,
    /// Show one document with a preview of its chunks
    Info { id: String },
    /// Delete a document
    Delete {
        id: String,
        #[arg(short, long)]
        yes: bool,
    },
    /// Search the uploaded documents
    Query {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Knowledge base statistics
    Stats,
    /// Backend health check
    Health,
    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get,
    Set { key: String, value: String },
    Unset { key: String },
}

fn data_dir(cli: &Cli) -> PathBuf {
    if let Some(dir) = &cli.data_dir {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "assistant-console")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("assistant_console_lib=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = Database::new(&data_dir(&cli)).context("failed to open settings database")?;
    let base_url = cli.base_url;

    match cli.command {
        Command::Config { action } => run_config(&db, &action),
        Command::Chat => {
            let (_, backend) = connect(&db, base_url)?;
            run_chat(ChatController::new(backend, terminal(false))).await
        }
        Command::Upload { paths, no_wait } => {
            let (config, backend) = connect(&db, base_url)?;
            let view = terminal(false);
            let uploads = UploadController::new(backend, view.clone(), config.poll.clone());
            let mut files = Vec::new();
            for path in &paths {
                match UploadFile::from_path(path).await {
                    Ok(file) => files.push(file),
                    Err(e) => {
                        tracing::warn!("cannot read {}: {}", path.display(), e);
                        UploadView::notify(
                            &*view,
                            Notice::error(format!("Skipping {}: {}", path.display(), e)),
                        );
                    }
                }
            }
            let records = uploads.handle_files(files).await;
            if !no_wait {
                uploads.wait_idle().await;
                // let the last progress lines settle before exiting
                tokio::time::sleep(config.poll.grace).await;
            }
            uploads.shutdown();
            if records.len() < paths.len() {
                bail!("{} of {} files were not uploaded", paths.len() - records.len(), paths.len());
            }
            Ok(())
        }
        Command::Documents => {
            let (config, backend) = connect(&db, base_url)?;
            let uploads = UploadController::new(backend, terminal(false), config.poll);
            uploads.refresh_document_list().await?;
            Ok(())
        }
        Command::Info { id } => {
            let (config, backend) = connect(&db, base_url)?;
            let uploads = UploadController::new(backend, terminal(false), config.poll);
            let detail = uploads.document_detail(&id).await?;
            println!("{}", document_line(&detail.document));
            println!(
                "    progress {}% {}",
                detail.processing.progress,
                sanitize_terminal(&detail.processing.message)
            );
            for chunk in &detail.chunks {
                println!("\n  #{} {}", chunk.chunk_index, sanitize_terminal(&chunk.content));
            }
            Ok(())
        }
        Command::Delete { id, yes } => {
            let (config, backend) = connect(&db, base_url)?;
            let uploads = UploadController::new(backend, terminal(yes), config.poll);
            if !uploads.delete_document(&id).await {
                bail!("document {} was not deleted", id);
            }
            Ok(())
        }
        Command::Query { text } => {
            let (config, backend) = connect(&db, base_url)?;
            let uploads = UploadController::new(backend, terminal(false), config.poll);
            if uploads.query(&text.join(" ")).await.is_none() {
                bail!("query failed");
            }
            Ok(())
        }
        Command::Stats => {
            let (config, backend) = connect(&db, base_url)?;
            let uploads = UploadController::new(backend, terminal(false), config.poll);
            let stats = uploads.stats().await?;
            println!(
                "{} documents, {} chunks, dimension {}",
                stats.total_documents, stats.total_chunks, stats.vector_dimension
            );
            for doc in &stats.documents {
                println!(
                    "  {}  {}  {}  {} chunks",
                    sanitize_terminal(&doc.id),
                    sanitize_terminal(&doc.name),
                    doc.status,
                    doc.chunk_count.unwrap_or(0)
                );
            }
            Ok(())
        }
        Command::Health => {
            let (_, backend) = connect(&db, base_url)?;
            let health = backend.health().await?;
            println!(
                "{}: {}",
                sanitize_terminal(&health.status),
                sanitize_terminal(&health.message)
            );
            println!("active conversations: {}", health.active_conversations);
            if !health.available_agents.is_empty() {
                println!(
                    "agents: {}",
                    sanitize_terminal(&health.available_agents.join(", "))
                );
            }
            Ok(())
        }
    }
}

/// Stored settings, then the `--base-url` flag, then the HTTP client built from them.
fn connect(db: &Database, base_url: Option<String>) -> Result<(AppConfig, Arc<dyn Backend>)> {
    let mut config = AppConfig::load(db)?;
    if let Some(url) = base_url {
        config.base_url = url;
    }
    tracing::debug!("using backend at {}", config.base_url);
    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(config.http()));
    Ok((config, backend))
}

fn terminal(assume_yes: bool) -> Arc<TerminalView> {
    Arc::new(TerminalView::new(assume_yes))
}

async fn run_chat(chat: ChatController) -> Result<()> {
    chat.greet();
    print!("\n> ");
    let _ = std::io::Write::flush(&mut std::io::stdout());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/clear" => {
                let _ = chat.clear_history().await;
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
            }
            "" => {
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
            }
            text => {
                chat.send_message(text).await;
            }
        }
    }
    Ok(())
}

fn run_config(db: &Database, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get => {
            for (key, value) in config::masked_settings(db)? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Set { key, value } => config::set_setting(db, key, value)?,
        ConfigAction::Unset { key } => {
            if !config::delete_setting(db, key)? {
                println!("{} was not set", key);
            }
        }
    }
    Ok(())
}
