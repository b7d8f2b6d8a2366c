//! # Blog QA CLI (`blogqa`)
//!
//! ## Usage
//!
//! ```bash
//! blogqa --config ./config/blogqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `blogqa init` | Create the SQLite database and run schema migrations |
//! | `blogqa add-category` | Register a category, optionally under a parent |
//! | `blogqa upsert-post` | Insert or update a post's owner, category and title |
//! | `blogqa add-persona` | Register a tone persona for a user |
//! | `blogqa ingest-title` | Embed and store a post title |
//! | `blogqa ingest-content` | Chunk, embed and store a post body from a file |
//! | `blogqa ask "<question>"` | Stream an answer as SSE frames to stdout |
//! | `blogqa serve` | Start the HTTP server |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to change verbosity.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use blog_qa::chat::OpenAIChatModel;
use blog_qa::config::{self, Config};
use blog_qa::embedding::{create_provider, create_query_provider, EmbeddingProvider};
use blog_qa::ingest::{ingest_content, ingest_title};
use blog_qa::server::{run_server, AppState};
use blog_qa::sqlite_store::SqliteStore;
use blog_qa::synth::{AskRequest, SynthSettings, Synthesizer};
use blog_qa::{db, migrate};
use blog_qa_core::models::Persona;
use blog_qa_core::tone::ToneSelector;

/// Blog QA — answers questions from a user's own blog posts.
#[derive(Parser)]
#[command(
    name = "blogqa",
    about = "Blog QA — grounded, streamed answers over a user's own blog posts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/blogqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Register a category. Parents must be added before their children.
    AddCategory {
        #[arg(long)]
        id: i64,

        #[arg(long)]
        user: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        parent: Option<i64>,
    },

    /// Insert or update a post row so its embeddings become retrievable.
    UpsertPost {
        #[arg(long)]
        post_id: i64,

        #[arg(long)]
        user: String,

        #[arg(long)]
        category: Option<i64>,

        #[arg(long)]
        title: String,

        /// File holding the post body, stored alongside the row.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Register a tone persona usable as `--tone <id>`.
    AddPersona {
        #[arg(long)]
        id: i64,

        #[arg(long)]
        user: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        description: String,
    },

    /// Embed a post title and upsert it.
    IngestTitle {
        #[arg(long)]
        post_id: i64,

        #[arg(long)]
        title: String,
    },

    /// Chunk and embed a post body, replacing the post's previous chunks.
    IngestContent {
        #[arg(long)]
        post_id: i64,

        /// File holding the post body.
        #[arg(long)]
        file: PathBuf,
    },

    /// Ask a question and print the event stream.
    Ask {
        question: String,

        /// Owner of the blog to search.
        #[arg(long)]
        user: String,

        /// Restrict to a category and its sub-categories.
        #[arg(long)]
        category: Option<i64>,

        /// Restrict to a single post.
        #[arg(long)]
        post: Option<i64>,

        /// Tone: default, concise-expert, mirror-source-style, formal,
        /// casual, regional-dialect, a persona id, or a legacy code
        /// (-1 concise, -2 mirror).
        #[arg(long, allow_negative_numbers = true)]
        tone: Option<ToneSelector>,
    },

    /// Start the HTTP server.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let pool = db::connect(cfg).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

/// Question embedding is attempted once; ingestion providers keep backoff.
fn build_synthesizer(cfg: &Config, store: Arc<SqliteStore>) -> anyhow::Result<Arc<Synthesizer>> {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_query_provider(&cfg.embedding)?);
    let chat = Arc::new(OpenAIChatModel::new(&cfg.llm)?);
    Ok(Arc::new(Synthesizer::new(
        store,
        embedder,
        chat,
        SynthSettings::from_config(cfg),
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::AddCategory {
            id,
            user,
            name,
            parent,
        } => {
            let store = open_store(&cfg).await?;
            store.insert_category(id, &user, &name, parent).await?;
            println!("Category {} added for {}.", id, user);
        }
        Commands::UpsertPost {
            post_id,
            user,
            category,
            title,
            file,
        } => {
            let content = match &file {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => String::new(),
            };
            let store = open_store(&cfg).await?;
            store
                .upsert_post(post_id, &user, category, &title, &content)
                .await?;
            println!("Post {} saved for {}.", post_id, user);
        }
        Commands::AddPersona {
            id,
            user,
            name,
            description,
        } => {
            let store = open_store(&cfg).await?;
            store
                .insert_persona(id, &user, &Persona { name, description })
                .await?;
            println!("Persona {} added for {}.", id, user);
        }
        Commands::IngestTitle { post_id, title } => {
            let store = open_store(&cfg).await?;
            let embedder = create_provider(&cfg.embedding)?;
            ingest_title(store.as_ref(), embedder.as_ref(), post_id, &title).await?;
            println!("Title embedding stored for post {}.", post_id);
        }
        Commands::IngestContent { post_id, file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let tokenizer = cfg.chunking.tokenizer()?;
            let store = open_store(&cfg).await?;
            let embedder = create_provider(&cfg.embedding)?;
            let report = ingest_content(
                store.as_ref(),
                embedder.as_ref(),
                &tokenizer,
                &cfg.chunking,
                cfg.embedding.batch_size,
                post_id,
                &content,
            )
            .await?;
            println!(
                "Stored {} chunks for post {}.",
                report.chunk_count, report.post_id
            );
        }
        Commands::Ask {
            question,
            user,
            category,
            post,
            tone,
        } => {
            let request = AskRequest {
                question,
                user_id: user,
                category_id: category,
                post_id: post,
                speech_tone: tone,
            };
            request.validate()?;
            let store = open_store(&cfg).await?;
            let synthesizer = build_synthesizer(&cfg, store)?;

            let mut rx = synthesizer.start(request)?;
            while let Some(event) = rx.recv().await {
                print!("{}", event.to_sse_frame());
            }
        }
        Commands::Serve => {
            let store = open_store(&cfg).await?;
            let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&cfg.embedding)?);
            let tokenizer = Arc::new(cfg.chunking.tokenizer()?);
            let synthesizer = build_synthesizer(&cfg, store.clone())?;
            let state = AppState {
                config: Arc::new(cfg),
                store,
                embedder,
                tokenizer,
                synthesizer,
            };
            run_server(state).await?;
        }
    }

    Ok(())
}
