mod picker;
mod repl;
mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dialoguer::Select;
use docqa_core::config::DEFAULT_PORT;
use docqa_core::embeddings::NOMIC_BASE_URL;
use docqa_core::llm::{DEFAULT_CHAT_MODEL, OPENAI_BASE_URL};
use docqa_core::stores::DEFAULT_QDRANT_URL;
use docqa_core::{
    discover_files, CollectionCheck, CollectionSpec, ConversationEngine, ConversationOptions,
    IndexOutcome, IndexingPipeline, JobRegistry, Mode, Settings,
};
use server::AppState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docqa", version, about = "Ask questions about your PDF and text documents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// OpenAI credential
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    openai_api_key: Option<String>,

    /// Nomic credential
    #[arg(long, env = "NOMIC_API_KEY", hide_env_values = true, global = true)]
    nomic_api_key: Option<String>,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = DEFAULT_QDRANT_URL, global = true)]
    qdrant_url: String,

    /// Qdrant credential, sent as the api-key header
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true, global = true)]
    qdrant_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = OPENAI_BASE_URL, global = true)]
    openai_base_url: String,

    #[arg(long, env = "NOMIC_BASE_URL", default_value = NOMIC_BASE_URL, global = true)]
    nomic_base_url: String,

    /// Chat completion model
    #[arg(long, default_value = DEFAULT_CHAT_MODEL, global = true)]
    chat_model: String,

    /// Sampling temperature. Defaults to 0.2 for `chat` and 0 otherwise.
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Fail when an existing collection has a different vector size or metric.
    #[arg(long, default_value_t = false, global = true)]
    validate_collection: bool,

    /// List each (file, page) source once per answer.
    #[arg(long, default_value_t = false, global = true)]
    dedupe_sources: bool,

    /// Rewrite follow-up questions into standalone ones before retrieval.
    #[arg(long, default_value_t = false, global = true)]
    condense_follow_ups: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Load, chunk, embed and store documents.
    Index {
        /// Files to index. When empty, every file in --folder is used.
        paths: Vec<PathBuf>,
        /// Folder scanned when no paths are given.
        #[arg(long, default_value = "docs")]
        folder: PathBuf,
        /// Choose files interactively.
        #[arg(long, default_value_t = false)]
        pick: bool,
        /// Directory listed by --pick.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Interactive question answering in the terminal.
    Chat,
    /// HTTP API and chat page.
    Serve {
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Where uploaded files are saved before indexing.
        #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
        upload_dir: PathBuf,
    },
}

impl Cli {
    fn settings(&self, mode: Mode) -> Settings {
        let default_temperature = if mode == Mode::Chat { 0.2 } else { 0.0 };
        let mut settings = Settings {
            openai_api_key: self.openai_api_key.clone(),
            nomic_api_key: self.nomic_api_key.clone(),
            qdrant_url: self.qdrant_url.clone(),
            qdrant_api_key: self.qdrant_api_key.clone(),
            openai_base_url: self.openai_base_url.clone(),
            nomic_base_url: self.nomic_base_url.clone(),
            chat_model: self.chat_model.clone(),
            temperature: self.temperature.unwrap_or(default_temperature),
            collection: CollectionSpec::default(),
            collection_check: if self.validate_collection {
                CollectionCheck::Validate
            } else {
                CollectionCheck::Trust
            },
            ..Settings::default()
        };
        if let Some(Command::Serve {
            host,
            port,
            upload_dir,
        }) = &self.command
        {
            settings.host = host.clone();
            settings.port = *port;
            settings.upload_dir = upload_dir.clone();
        }
        settings
    }

    fn conversation_options(&self) -> ConversationOptions {
        ConversationOptions {
            dedupe_sources: self.dedupe_sources,
            condense_follow_ups: self.condense_follow_ups,
            ..ConversationOptions::default()
        }
    }
}

enum IndexSource {
    Paths(Vec<PathBuf>),
    Folder(PathBuf),
    Pick(PathBuf),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    // A missing .env is fine; the environment and flags still apply.
    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            eprintln!("failed to read .env: {error}");
        }
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docqa boot"
    );

    match &cli.command {
        Some(Command::Index {
            paths,
            folder,
            pick,
            dir,
        }) => {
            let source = if *pick {
                IndexSource::Pick(dir.clone())
            } else if !paths.is_empty() {
                IndexSource::Paths(paths.clone())
            } else {
                IndexSource::Folder(folder.clone())
            };
            run_index(&cli, source).await
        }
        Some(Command::Chat) => run_chat(&cli).await,
        Some(Command::Serve { .. }) => run_serve(&cli).await,
        None => run_menu(&cli).await,
    }
}

async fn run_menu(cli: &Cli) -> anyhow::Result<()> {
    println!("=== Document Q&A ===");
    let choice = tokio::task::block_in_place(|| {
        Select::new()
            .with_prompt("What would you like to do?")
            .items(&["Index documents", "Start chat"])
            .default(0)
            .interact_opt()
    })?;

    match choice {
        Some(0) => run_index(cli, IndexSource::Pick(PathBuf::from("."))).await,
        Some(1) => run_chat(cli).await,
        _ => {
            println!("No option selected.");
            Ok(())
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run_index(cli: &Cli, source: IndexSource) -> anyhow::Result<()> {
    let settings = cli.settings(Mode::Index);
    settings.validate(Mode::Index)?;

    println!("=== Document Indexer ===");
    let files = match source {
        IndexSource::Paths(paths) => paths,
        IndexSource::Folder(folder) => discover_files(&folder)
            .with_context(|| format!("failed to read folder {}", folder.display()))?,
        IndexSource::Pick(dir) => tokio::task::block_in_place(|| picker::pick_files(&dir))?,
    };

    if files.is_empty() {
        println!("No files were selected.");
        return Ok(());
    }

    println!("Selected {} file(s):", files.len());
    for path in &files {
        println!("  - {}", file_name(path));
    }

    let pipeline = IndexingPipeline::new(settings.embedder()?, settings.vector_store())
        .with_collection(settings.collection.clone(), settings.collection_check);

    match pipeline.run(files).await? {
        IndexOutcome::NothingLoaded { .. } => {
            println!("No documents were loaded successfully.");
        }
        IndexOutcome::Indexed { summary, skipped } => {
            for file in &skipped {
                warn!(path = %file.path.display(), reason = %file.reason, "not indexed");
            }
            println!(
                "Loaded {} document(s), skipped {} file(s).",
                summary.documents, summary.skipped
            );
            println!("Indexed {} chunks into Qdrant.", summary.chunks);
        }
    }

    Ok(())
}

async fn run_chat(cli: &Cli) -> anyhow::Result<()> {
    let settings = cli.settings(Mode::Chat);
    settings.validate(Mode::Chat)?;

    let engine = ConversationEngine::new(
        settings.embedder()?,
        settings.vector_store(),
        settings.chat_model()?,
    )
    .with_options(cli.conversation_options());
    engine
        .ensure_collection(&settings.collection, settings.collection_check)
        .await?;

    println!("=== Document Chat ===");
    repl::run(&engine, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

async fn run_serve(cli: &Cli) -> anyhow::Result<()> {
    let settings = cli.settings(Mode::Serve);
    settings.validate(Mode::Serve)?;

    let embedder = settings.embedder()?;
    let store = settings.vector_store();
    let engine = ConversationEngine::new(embedder.clone(), store.clone(), settings.chat_model()?)
        .with_options(cli.conversation_options());
    engine
        .ensure_collection(&settings.collection, settings.collection_check)
        .await?;

    let state = Arc::new(AppState {
        engine,
        pipeline: IndexingPipeline::new(embedder, store)
            .with_collection(settings.collection.clone(), settings.collection_check),
        jobs: JobRegistry::new(),
        upload_dir: settings.upload_dir.clone(),
    });

    let addr = tokio::net::lookup_host((settings.host.as_str(), settings.port))
        .await?
        .next()
        .with_context(|| format!("cannot resolve {}:{}", settings.host, settings.port))?;
    server::serve(state, addr).await
}
