//! Read-side commands: `ctx find`, `ctx symbols`, `ctx deps`, `ctx chunk`.
//!
//! All of them open the existing index read-mostly and never create one.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use kontext_core::models::{ChunkRecord, Language, NodeKind, SearchFilters, SearchResult};
use kontext_core::plan::{default_plan, execute_plan, QueryPlan};
use kontext_core::search::dependency::{self, Direction};
use kontext_core::search::path::normalize_path;
use kontext_core::search::symbol;
use kontext_core::store::{MatchMode, SymbolQuery};

use crate::config;
use crate::index_cmd::{embedder_for, open_store};
use crate::sqlite_store::SqliteStore;

/// One result as printed by `--json`. `text` only with `--full`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView<'a> {
    pub file_path: &'a str,
    pub line_start: u32,
    pub line_end: u32,
    pub name: Option<&'a str>,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub language: Language,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
}

impl<'a> ResultView<'a> {
    pub fn new(result: &'a SearchResult, full: bool) -> Self {
        Self {
            file_path: &result.file_path,
            line_start: result.line_start,
            line_end: result.line_end,
            name: result.name.as_deref(),
            kind: result.kind,
            language: result.language,
            score: result.score,
            text: full.then_some(result.text.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub language: Option<Language>,
    pub json: bool,
    pub full: bool,
    /// Leave out the vector strategy and never call the embedder.
    pub no_vector: bool,
    /// JSON plan file replacing the built-in planner.
    pub plan: Option<PathBuf>,
}

async fn open_existing(root: &Path) -> Result<std::sync::Arc<SqliteStore>> {
    if !config::db_path(root).exists() {
        bail!("No index found in {}. Run `ctx init` first.", root.display());
    }
    open_store(root).await
}

/// Hybrid search: plan, run strategies concurrently, fuse.
pub async fn find(root: &Path, query: &str, options: &FindOptions) -> Result<Vec<SearchResult>> {
    let cfg = config::load_config(root)?;
    let store = open_existing(root).await?;
    let embedder = embedder_for(&cfg, options.no_vector)?;

    let plan = match &options.plan {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read plan {}", path.display()))?;
            QueryPlan::from_json(&text)?
        }
        None => default_plan(query, embedder.is_some()),
    };
    tracing::debug!(?plan, "query plan");

    let filters = SearchFilters {
        language: options.language,
    };
    let limit = options.limit.unwrap_or(cfg.retrieval.default_limit);
    let results = execute_plan(
        store.as_ref(),
        embedder.as_deref(),
        &plan,
        limit,
        cfg.retrieval.candidate_k,
        &filters,
    )
    .await?;
    store.close().await;
    Ok(results)
}

pub async fn run_find(root: &Path, query: &str, options: &FindOptions) -> Result<()> {
    let results = find(root, query, options).await?;
    print_results(&results, options.json, options.full)
}

#[derive(Debug, Clone, Default)]
pub struct SymbolOptions {
    pub name: Option<String>,
    pub kind: Option<NodeKind>,
    pub parent: Option<String>,
    pub language: Option<Language>,
    pub mode: MatchMode,
    pub limit: usize,
}

/// Structural lookup by name, type, parent, and language.
pub async fn symbols(root: &Path, options: &SymbolOptions) -> Result<Vec<SearchResult>> {
    let store = open_existing(root).await?;
    let query = SymbolQuery {
        name: options.name.clone(),
        mode: options.mode,
        kind: options.kind,
        parent: options.parent.clone(),
        language: options.language,
    };
    let results = symbol::search(store.as_ref(), &query, options.limit).await?;
    store.close().await;
    Ok(results)
}

/// Import trace. Forward lists what `target` imports; `reverse` lists
/// who imports `target`.
pub async fn deps(
    root: &Path,
    target: &str,
    reverse: bool,
    limit: usize,
    language: Option<Language>,
) -> Result<Vec<SearchResult>> {
    let store = open_existing(root).await?;
    let direction = if reverse {
        Direction::Importers
    } else {
        Direction::Imports
    };
    let filters = SearchFilters { language };
    let results = dependency::search(store.as_ref(), target, direction, limit, &filters).await?;
    store.close().await;
    Ok(results)
}

/// Split `file:line` into a normalized path and a 1-based line.
pub fn parse_location(location: &str) -> Result<(String, u32)> {
    let (file, line) = location
        .rsplit_once(':')
        .with_context(|| format!("expected <file>:<line>, got '{location}'"))?;
    let line: u32 = line
        .trim()
        .parse()
        .with_context(|| format!("invalid line number in '{location}'"))?;
    if line == 0 {
        bail!("line numbers start at 1");
    }
    Ok((normalize_path(file), line))
}

/// The chunk that contains `file:line`.
pub async fn chunk_at(root: &Path, location: &str) -> Result<Option<ChunkRecord>> {
    let (path, line) = parse_location(location)?;
    let store = open_existing(root).await?;
    let record = store.chunk_at(&path, line).await?;
    store.close().await;
    Ok(record)
}

pub async fn run_chunk(root: &Path, location: &str, json: bool) -> Result<()> {
    let Some(record) = chunk_at(root, location).await? else {
        bail!("No chunk found at {location}");
    };
    let result = record.to_result(1.0);
    if json {
        println!("{}", serde_json::to_string_pretty(&ResultView::new(&result, true))?);
        return Ok(());
    }
    println!("{}", heading(&result));
    if !record.chunk.imports.is_empty() {
        println!("imports: {}", record.chunk.imports.join(", "));
    }
    println!();
    println!("{}", record.chunk.text);
    Ok(())
}

fn heading(result: &SearchResult) -> String {
    let mut line = format!(
        "{}:{}-{}  {}",
        result.file_path, result.line_start, result.line_end, result.kind
    );
    if let Some(name) = &result.name {
        line.push(' ');
        line.push_str(name);
    }
    line
}

fn excerpt(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| {
            !l.is_empty()
                && !l.starts_with("//")
                && !l.starts_with("/*")
                && !l.starts_with('*')
                && !l.starts_with('#')
        })
        .unwrap_or("")
}

/// Print results as a ranked list, or as a JSON array.
pub fn print_results(results: &[SearchResult], json: bool, full: bool) -> Result<()> {
    if json {
        let views: Vec<ResultView<'_>> = results.iter().map(|r| ResultView::new(r, full)).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, result.score, heading(result));
        if full {
            for line in result.text.lines() {
                println!("    {}", line);
            }
        } else {
            println!("    {}", excerpt(&result.text));
        }
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        assert_eq!(
            parse_location("./src/auth.ts:14").unwrap(),
            ("src/auth.ts".to_string(), 14)
        );
        assert_eq!(
            parse_location("C:/repo/a.py:3").unwrap(),
            ("C:/repo/a.py".to_string(), 3)
        );
        assert!(parse_location("src/auth.ts").is_err());
        assert!(parse_location("src/auth.ts:x").is_err());
        assert!(parse_location("src/auth.ts:0").is_err());
    }

    #[test]
    fn test_excerpt_skips_comments() {
        let text = "/**\n * Validate a token.\n */\nexport function validateToken() {}";
        assert_eq!(excerpt(text), "export function validateToken() {}");
    }

    #[test]
    fn test_result_view_hides_text_unless_full() {
        let result = SearchResult {
            chunk_id: 1,
            file_path: "a.ts".into(),
            line_start: 1,
            line_end: 2,
            name: Some("a".into()),
            kind: NodeKind::Function,
            text: "function a() {}".into(),
            score: 0.5,
            language: Language::TypeScript,
        };
        let brief = serde_json::to_value(ResultView::new(&result, false)).unwrap();
        assert!(brief.get("text").is_none());
        assert_eq!(brief["type"], "function");
        assert_eq!(brief["filePath"], "a.ts");
        let full = serde_json::to_value(ResultView::new(&result, true)).unwrap();
        assert_eq!(full["text"], "function a() {}");
    }

    #[tokio::test]
    async fn test_commands_require_index() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find(tmp.path(), "auth", &FindOptions::default()).await.is_err());
        assert!(chunk_at(tmp.path(), "a.ts:1").await.is_err());
        assert!(!config::db_path(tmp.path()).exists());
    }
}
