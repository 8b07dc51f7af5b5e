//! vectord entry point: configuration, wiring, and the serve/rebuild CLI.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vectord::api::{self, ApiState};
use vectord::config::{Config, EmbeddingProviderKind, ModelsConfig};
use vectord::generation::GenerationClient;
use vectord::index::IndexStore;
use vectord::models::{Embedder, HttpEmbedder, HttpReranker, HttpSummarizer, LocalEmbedder};
use vectord::orchestrator::RetrievalOrchestrator;
use vectord::store::DocumentStore;

#[derive(Parser)]
#[command(name = "vectord", about = "Retrieval orchestration over a dual vector index")]
struct Cli {
    /// Configuration file; defaults to config/<VECTORD_ENV>.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve,
    /// Rebuild both indexes from the live document store, then exit.
    Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Rebuild => rebuild(config).await,
    }
}

/// Construct every component explicitly and hand them to the server.
/// Initialization happens once, here — nothing is lazily created behind a
/// global.
fn build_orchestrator(config: &Config) -> anyhow::Result<RetrievalOrchestrator> {
    let index = IndexStore::open(&config.index)?;
    let documents = DocumentStore::open(&config.store.path)?;

    let timeout = Duration::from_secs(config.models.timeout_secs);
    let embedder = build_embedder(&config.models, config.index.embedding_dim)?;
    let summarizer = Arc::new(HttpSummarizer::new(&config.models.base_url, timeout)?);
    let reranker = Arc::new(HttpReranker::new(&config.models.base_url, timeout)?);

    Ok(RetrievalOrchestrator::new(
        index,
        documents,
        embedder,
        summarizer,
        reranker,
        config.retrieval.clone(),
        config.models.summary_min_len,
        config.models.summary_max_len,
    ))
}

fn build_embedder(models: &ModelsConfig, dim: usize) -> anyhow::Result<Arc<dyn Embedder>> {
    let timeout = Duration::from_secs(models.timeout_secs);
    match models.embedding_provider {
        EmbeddingProviderKind::Local => {
            tracing::info!(cache_dir = %models.cache_dir.display(), "loading local embedding model");
            Ok(Arc::new(LocalEmbedder::new(&models.cache_dir, dim)?))
        }
        EmbeddingProviderKind::Remote => {
            Ok(Arc::new(HttpEmbedder::new(&models.base_url, timeout, dim)?))
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(build_orchestrator(&config)?);
    let generation = Arc::new(GenerationClient::new(&config.generation.base_url)?);
    let state = Arc::new(ApiState::new(
        orchestrator,
        generation,
        config.generation.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server = api::start_http_server(config.server.bind, state, shutdown_rx).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    server.await?;

    Ok(())
}

async fn rebuild(config: Config) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config)?;
    let reindexed = orchestrator.rebuild().await?;
    tracing::info!(reindexed, "rebuild finished");
    Ok(())
}
