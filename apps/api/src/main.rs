mod config;
mod content;
mod db;
mod errors;
mod generation;
mod jobs;
mod llm_client;
mod models;
mod render;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StorageBackend};
use crate::db::create_pool;
use crate::generation::pipeline::{run_pipeline, JobWorkspace, PipelineContext, RetryPolicy};
use crate::jobs::memory::MemoryStore;
use crate::jobs::postgres::PgStore;
use crate::jobs::queue::RedisQueue;
use crate::jobs::store::JobStore;
use crate::jobs::tasks::TaskRunner;
use crate::jobs::worker::Worker;
use crate::llm_client::LlmClient;
use crate::models::job::{GenerationProvider, Job, JobConfig, OutputFormat};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{FsObjectStore, KeyLayout, MemoryObjectStore, ObjectStore, S3ObjectStore};

#[derive(Parser)]
#[command(name = "deckgen", version, about = "Turns documents into slide decks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve,
    /// Drain the task queue; exits after WORKER_MAX_JOBS tasks.
    Worker {
        /// Stable id; a restarted worker re-queues its own unfinished task.
        #[arg(long, default_value = "worker-1")]
        id: String,
    },
    /// Generate a deck locally without the database, queue or object store.
    Generate {
        /// Source document (.pdf, .md, .txt, ...).
        input: PathBuf,
        /// Where to write the assembled deck.
        #[arg(short, long)]
        output: PathBuf,
        /// JSON job configuration; defaults apply to missing fields.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Design instructions fed into content prompts.
        #[arg(long)]
        instructions: Option<PathBuf>,
        #[arg(long)]
        slides: Option<i64>,
        #[arg(long)]
        provider: Option<GenerationProvider>,
        #[arg(long)]
        format: Option<OutputFormat>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            let config = Config::from_env()?;
            init_tracing(&config.rust_log);
            serve(config).await
        }
        Command::Worker { id } => {
            let config = Config::from_env()?;
            init_tracing(&config.rust_log);
            run_worker(config, id).await
        }
        Command::Generate {
            input,
            output,
            config,
            instructions,
            slides,
            provider,
            format,
        } => {
            dotenvy::dotenv().ok();
            init_tracing(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));

            let mut job_config = match config {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Cannot read {}", path.display()))?;
                    serde_json::from_str::<JobConfig>(&raw)
                        .with_context(|| format!("Invalid job config in {}", path.display()))?
                }
                None => JobConfig::default(),
            };
            if let Some(n) = slides {
                job_config.number_of_slides = n;
            }
            if let Some(p) = provider {
                job_config.llm_provider = p;
            }
            if let Some(f) = format {
                job_config.output_format = f;
            }
            generate_locally(input, output, instructions, job_config).await
        }
    }
}

/// Initializes structured logging once per process.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), level))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn build_storage(config: &Config) -> Arc<dyn ObjectStore> {
    match config.storage_backend {
        StorageBackend::S3 => {
            info!("Object storage: S3 bucket '{}'", config.s3_bucket);
            Arc::new(S3ObjectStore::from_config(config).await)
        }
        StorageBackend::Fs => {
            info!(
                "Object storage: local directory {}",
                config.local_storage_dir.display()
            );
            Arc::new(FsObjectStore::new(config.local_storage_dir.clone()))
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting deckgen API v{}", env!("CARGO_PKG_VERSION"));

    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgStore::new(db));

    let redis = redis::Client::open(config.redis_url.clone())?;
    let queue = Arc::new(RedisQueue::new(redis, config.queue_name.clone()));
    info!("Redis queue '{}' initialized", config.queue_name);

    let state = AppState {
        jobs: store.clone(),
        slides: store,
        storage: build_storage(&config).await,
        queue,
        keys: KeyLayout::new(config.storage_prefix.clone()),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_worker(config: Config, id: String) -> Result<()> {
    info!("Starting deckgen worker '{}'", id);

    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgStore::new(db));
    let llm = LlmClient::new(
        config.anthropic_api_key.clone(),
        config.google_api_key.clone(),
    )?;

    let ctx = PipelineContext {
        storage: build_storage(&config).await,
        jobs: store.clone(),
        slides: store,
        generator: Arc::new(llm),
        keys: KeyLayout::new(config.storage_prefix.clone()),
    };

    let redis = redis::Client::open(config.redis_url.clone())?;
    let queue = RedisQueue::new(redis, config.queue_name.clone());
    let worker = Worker::new(id, queue, TaskRunner::new(ctx), config.worker_max_jobs);

    worker.run().await?;
    Ok(())
}

/// Runs the pipeline with the retry-and-skip policy against in-memory
/// stores, then writes the assembled deck to `output`.
async fn generate_locally(
    input: PathBuf,
    output: PathBuf,
    instructions: Option<PathBuf>,
    config: JobConfig,
) -> Result<()> {
    config.validate().map_err(anyhow::Error::msg)?;

    let source_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Input path has no file name")?;

    let workdir = tempfile::tempdir()?;
    let input_dir = workdir.path().join("input");
    tokio::fs::create_dir_all(&input_dir).await?;
    tokio::fs::copy(&input, input_dir.join(&source_name))
        .await
        .with_context(|| format!("Cannot read {}", input.display()))?;
    if let Some(path) = instructions {
        tokio::fs::copy(&path, workdir.path().join("instructions.md"))
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;
    }

    let (anthropic_api_key, google_api_key) = crate::config::llm_keys_from_env();
    let store = Arc::new(MemoryStore::new());
    let ctx = PipelineContext {
        storage: Arc::new(MemoryObjectStore::new()),
        jobs: store.clone(),
        slides: store.clone(),
        generator: Arc::new(LlmClient::new(anthropic_api_key, google_api_key)?),
        keys: KeyLayout::new("local"),
    };

    let job = Job::new(source_name.clone(), config);
    store.create(&job).await?;

    let workspace = JobWorkspace::new(workdir.path(), source_name);
    let policy = RetryPolicy::retry_and_skip(job.config.max_retries);
    let outcome = run_pipeline(&ctx, job.id, &job.config, &workspace, policy).await?;
    if !outcome.skipped.is_empty() {
        warn!(
            "{} of {} slides were skipped after retries",
            outcome.skipped.len(),
            outcome.total_slides
        );
    }

    let key = TaskRunner::new(ctx.clone()).convert(job.id).await?;
    let artifact = ctx.storage.get(&key).await?;
    tokio::fs::write(&output, &artifact)
        .await
        .with_context(|| format!("Cannot write {}", output.display()))?;

    info!(
        "Wrote {} ({} slides, {} bytes)",
        output.display(),
        outcome.published,
        artifact.len()
    );
    Ok(())
}
