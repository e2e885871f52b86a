//! Mentor application binary - composition root.
//!
//! Ties the crates together into one executable with three one-shot
//! maintenance commands:
//! - `init-db`: create the SQLite schema
//! - `rebuild-index`: reconstruct the vector index from stored embeddings
//! - `sync <ror-id>`: pull one institution's advisors from the feed
//!
//! Each command prints a human-readable summary and exits non-zero on
//! unhandled failure.

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use cli::{CliArgs, Command};
use mentor_core::config::MentorConfig;
use mentor_core::error::MentorError;
use mentor_feed::OpenAlexFeed;
use mentor_storage::{AdvisorRepository, Database};
use mentor_vector::embedding::{EmbeddingProvider, MockEmbedding, OnnxEmbeddingProvider};
use mentor_vector::{SyncPipeline, VectorIndex};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config = MentorConfig::load_or_default(&args.resolve_config_path());

    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    tracing::info!("Starting Mentor v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args, config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: CliArgs, config: MentorConfig) -> Result<(), MentorError> {
    match args.command {
        Command::InitDb => init_db(&config),
        Command::RebuildIndex => rebuild_index(&config),
        Command::Sync { ror_id } => sync_institution(&config, &ror_id).await,
    }
}

/// Create the database file and apply all migrations.
fn init_db(config: &MentorConfig) -> Result<(), MentorError> {
    let path = Path::new(&config.database.path);
    let db = Database::new(path)?;
    let advisors = AdvisorRepository::new(Arc::new(db));

    println!(
        "Database initialized at {} ({} advisors stored)",
        path.display(),
        advisors.count()?
    );
    Ok(())
}

/// Reconstruct the vector index from every embedding in the store and
/// persist the result.
fn rebuild_index(config: &MentorConfig) -> Result<(), MentorError> {
    let db = Arc::new(Database::new(Path::new(&config.database.path))?);
    let advisors = AdvisorRepository::new(db);

    let entries = advisors.embedded()?;
    let count = entries.len();

    let index = VectorIndex::new(config.embedding.dimension);
    index.rebuild(entries)?;
    index.persist(
        Path::new(&config.index.vectors_path),
        Path::new(&config.index.mapping_path),
    )?;

    println!("Rebuilt vector index with {} advisors", count);
    Ok(())
}

/// Sync one institution's advisors from the feed.
///
/// Uses the ONNX provider when a model directory is configured and present,
/// otherwise falls back to the deterministic mock provider.
async fn sync_institution(config: &MentorConfig, ror_id: &str) -> Result<(), MentorError> {
    let model_dir = Path::new(&config.embedding.model_dir);
    if !config.embedding.model_dir.is_empty() && model_dir.exists() {
        let embedder = OnnxEmbeddingProvider::from_directory(model_dir)?;
        run_sync(config, ror_id, embedder).await
    } else {
        tracing::warn!("No embedding model configured, using the deterministic mock provider");
        let embedder = MockEmbedding::with_dimension(config.embedding.dimension);
        run_sync(config, ror_id, embedder).await
    }
}

async fn run_sync<E: EmbeddingProvider>(
    config: &MentorConfig,
    ror_id: &str,
    embedder: E,
) -> Result<(), MentorError> {
    let db = Arc::new(Database::new(Path::new(&config.database.path))?);

    let vectors_path = PathBuf::from(&config.index.vectors_path);
    let mapping_path = PathBuf::from(&config.index.mapping_path);
    let index = VectorIndex::load_or_empty(&vectors_path, &mapping_path, embedder.dimension());

    let feed = OpenAlexFeed::new(&config.feed);
    let pipeline = SyncPipeline::new(index, db, embedder, feed, vectors_path, mapping_path);

    let summary = pipeline.sync_institution(ror_id).await?;

    println!("Sync complete for institution {}:", ror_id);
    println!("  created: {}", summary.created);
    println!("  updated: {}", summary.updated);
    println!("  failed:  {}", summary.failed);
    Ok(())
}
