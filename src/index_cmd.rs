//! `ctx init` and `ctx update`: build or refresh the index of a root.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use kontext_core::embedding::Embedder;

use crate::config::{self, Config};
use crate::embedding::create_embedder;
use crate::indexer::{IndexReport, Indexer};
use crate::migrate::MigrationOutcome;
use crate::progress::ProgressMode;
use crate::sqlite_store::SqliteStore;

/// Options shared by `init` and `update`.
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    /// Re-parse and re-embed every file.
    pub full: bool,
    /// Index without embeddings even when a provider is configured.
    pub skip_embedding: bool,
    pub json: bool,
    pub progress: ProgressMode,
}

/// Open (creating if needed) the index database of `root`.
pub async fn open_store(root: &Path) -> Result<Arc<SqliteStore>> {
    let db_path = config::db_path(root);
    let (store, outcome) = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open index at {}", db_path.display()))?;
    match outcome {
        MigrationOutcome::Created => tracing::info!(path = %db_path.display(), "created index"),
        MigrationOutcome::Recreated { from } => {
            eprintln!("Index schema v{from} is outdated; rebuilding from scratch.");
        }
        MigrationOutcome::UpToDate => {}
    }
    Ok(Arc::new(store))
}

/// The configured embedder, unless disabled or skipped.
pub fn embedder_for(config: &Config, skip: bool) -> Result<Option<Arc<dyn Embedder>>> {
    if skip {
        return Ok(None);
    }
    create_embedder(&config.embedding)
}

/// Create `.ctx/`, write a default `config.toml` if none exists, then index.
pub async fn run_init(root: &Path, options: IndexOptions) -> Result<IndexReport> {
    let ctx_dir = config::ctx_dir(root);
    std::fs::create_dir_all(&ctx_dir)
        .with_context(|| format!("failed to create {}", ctx_dir.display()))?;

    let config_path = config::config_path(root);
    if !config_path.exists() {
        let rendered = config::show(&Config::default())?;
        std::fs::write(&config_path, rendered)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
    }

    run_index(root, "init", options).await
}

/// Incrementally re-index an initialized root.
pub async fn run_update(root: &Path, options: IndexOptions) -> Result<IndexReport> {
    if !config::db_path(root).exists() {
        anyhow::bail!(
            "No index found in {}. Run `ctx init` first.",
            root.display()
        );
    }
    run_index(root, "update", options).await
}

async fn run_index(root: &Path, label: &str, options: IndexOptions) -> Result<IndexReport> {
    let cfg = config::load_config(root)?;
    let embedder = embedder_for(&cfg, options.skip_embedding)?;
    let store = open_store(root).await?;

    let indexer = Indexer::new(root, store.clone(), embedder.clone(), cfg)
        .with_progress(Arc::from(options.progress.reporter()));
    let report = indexer.index_root(options.full).await?;
    store.close().await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(label, root, &report, embedder.is_some());
    }
    Ok(report)
}

fn print_report(label: &str, root: &Path, report: &IndexReport, embedding: bool) {
    println!("{} {}", label, root.display());
    println!("  files scanned: {}", report.files_scanned);
    println!("  indexed: {}", report.files_indexed);
    println!("  unchanged: {}", report.files_unchanged);
    println!("  removed: {}", report.files_removed);
    println!("  chunks written: {}", report.chunks_created);
    if embedding {
        println!("  vectors written: {}", report.vectors_written);
        if report.embedding_failures > 0 {
            println!("  files without vectors: {}", report.embedding_failures);
        }
    }
    if !report.errors.is_empty() {
        println!("  errors: {}", report.errors.len());
        for error in &report.errors {
            eprintln!("    {}", error);
        }
    }
    println!("  took: {} ms", report.duration_ms);
    println!("ok");
}
