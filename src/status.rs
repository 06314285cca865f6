//! Index statistics and health overview.
//!
//! Provides a quick summary of what's indexed: file, chunk, and vector
//! counts, database size, per-language breakdown, and the embedding
//! configuration. Used by `ctx status` to give confidence that indexing
//! and embeddings are working as expected.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use kontext_core::models::Language;
use kontext_core::store::Store;

use crate::config::{self, Config};
use crate::sqlite_store::SqliteStore;

/// Embedding settings as reported by `ctx status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingSummary {
    pub provider: String,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
}

impl EmbeddingSummary {
    fn from_config(config: &Config) -> Self {
        Self {
            provider: config.embedding.provider.clone(),
            model: config.embedding.model.clone(),
            dimensions: config.embedding.dims,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub root: String,
    pub initialized: bool,
    pub file_count: u64,
    pub chunk_count: u64,
    pub vector_count: u64,
    pub db_size_bytes: u64,
    /// Unix seconds of the most recently indexed file.
    pub last_indexed: Option<i64>,
    pub languages: BTreeMap<Language, u64>,
    pub config: EmbeddingSummary,
}

/// Gather status for `root` without creating an index where none exists.
pub async fn collect_status(root: &Path) -> Result<StatusReport> {
    let cfg = config::load_config(root)?;
    let db_path = config::db_path(root);
    let mut report = StatusReport {
        root: root.display().to_string(),
        initialized: db_path.exists(),
        file_count: 0,
        chunk_count: 0,
        vector_count: 0,
        db_size_bytes: 0,
        last_indexed: None,
        languages: BTreeMap::new(),
        config: EmbeddingSummary::from_config(&cfg),
    };
    if !report.initialized {
        return Ok(report);
    }

    let (store, _) = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open index at {}", db_path.display()))?;
    let stats = store.stats().await?;
    store.close().await;

    report.file_count = stats.file_count;
    report.chunk_count = stats.chunk_count;
    report.vector_count = stats.vector_count;
    report.last_indexed = stats.last_indexed;
    report.languages = stats.languages;
    report.db_size_bytes = db_file_size(&db_path);
    Ok(report)
}

/// Main database file plus its WAL sidecar, if any.
fn db_file_size(db_path: &Path) -> u64 {
    let size = |p: &Path| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0);
    let wal = db_path.with_extension("db-wal");
    size(db_path) + size(&wal)
}

/// Human-readable rendering of a [`StatusReport`].
pub fn render_text(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Kontext Status");
    let _ = writeln!(out, "==============");
    let _ = writeln!(out);
    let _ = writeln!(out, "  Root:         {}", report.root);

    if !report.initialized {
        let _ = writeln!(out, "  Initialized:  no");
        let _ = writeln!(out);
        let _ = writeln!(out, "  Not initialized. Run `ctx init` to index this directory.");
        return out;
    }

    let _ = writeln!(out, "  Initialized:  yes");
    let _ = writeln!(
        out,
        "  Database:     {}/{} ({})",
        config::CTX_DIR,
        config::DB_FILE,
        format_bytes(report.db_size_bytes)
    );
    let _ = writeln!(
        out,
        "  Last indexed: {}",
        report
            .last_indexed
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "  Files:        {}", report.file_count);
    let _ = writeln!(out, "  Chunks:       {}", report.chunk_count);
    let _ = writeln!(
        out,
        "  Vectors:      {} / {} ({}%)",
        report.vector_count,
        report.chunk_count,
        if report.chunk_count > 0 {
            (report.vector_count * 100) / report.chunk_count
        } else {
            0
        }
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "  Languages:");
    if report.languages.is_empty() {
        let _ = writeln!(out, "    (none)");
    }
    for (language, count) in &report.languages {
        let _ = writeln!(out, "    {:<12} {:>6}", language.label(), count);
    }

    let _ = writeln!(out);
    let embedding = &report.config;
    match (&embedding.model, embedding.dimensions) {
        (Some(model), Some(dims)) => {
            let _ = writeln!(out, "  Embedding:    {} {} ({} dims)", embedding.provider, model, dims);
        }
        (Some(model), None) => {
            let _ = writeln!(out, "  Embedding:    {} {}", embedding.provider, model);
        }
        _ => {
            let _ = writeln!(out, "  Embedding:    {}", embedding.provider);
        }
    }
    out
}

/// Run the status command: gather and print a summary.
pub async fn run_status(root: &Path, json: bool) -> Result<()> {
    let report = collect_status(root).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_text(&report));
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
