//! Dependency strategy: a lexical trace over import references.
//!
//! There is no resolved module graph. Each chunk carries the module
//! strings its file imports, and both trace directions compare those
//! strings against a target by normalized text:
//!
//! - [`Direction::Importers`]: chunks of files whose imports reference the
//!   target module or file (one import chunk per importing file).
//! - [`Direction::Imports`]: chunks of indexed files that the target file
//!   imports.
//!
//! Relative imports (`./db`, `../auth/jwt`) are resolved against the
//! importing file's directory before comparison, so cycles never need
//! special handling.
//!
//! | Match | Score |
//! |-------|-------|
//! | same normalized module | 1.0 |
//! | trailing path segments | 0.8 |
//! | same final segment | 0.6 |
//! | substring | 0.5 |

use std::collections::{HashMap, HashSet};

use crate::error::SearchError;
use crate::models::{Language, NodeKind, SearchFilters, SearchResult};
use crate::store::Store;

use super::path::normalize_path;
use super::sort_and_truncate;

pub const MODULE_SCORE: f64 = 1.0;
pub const SUFFIX_SCORE: f64 = 0.8;
pub const STEM_SCORE: f64 = 0.6;
pub const SUBSTRING_SCORE: f64 = 0.5;

/// Source extensions stripped when normalizing module references.
/// Longer suffixes first so `.mjs` is not read as `.js`.
const SOURCE_EXTENSIONS: &[&str] = &[
    ".tsx", ".mts", ".cts", ".jsx", ".mjs", ".cjs", ".pyi", ".ts", ".js", ".py", ".rs", ".go",
];

/// Which way to walk the import references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Who imports the target.
    Importers,
    /// What the target imports.
    Imports,
}

/// Reduce a module reference or file path to a comparable form:
/// lowercase, `/`-separated, without quotes, relative markers, source
/// extension, or trailing `index`/`mod`/`__init__` segment.
pub fn normalize_module(spec: &str) -> String {
    let mut s = spec
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .replace('\\', "/")
        .to_lowercase();

    if s.contains("::") {
        s = s.replace("::", "/");
        for root in ["crate/", "self/", "super/"] {
            if let Some(rest) = s.strip_prefix(root) {
                s = rest.to_string();
            }
        }
    }

    let path_like = s.contains('/');
    loop {
        if let Some(rest) = s.strip_prefix("./") {
            s = rest.to_string();
        } else if let Some(rest) = s.strip_prefix("../") {
            s = rest.to_string();
        } else {
            break;
        }
    }

    if let Some(ext) = SOURCE_EXTENSIONS.iter().find(|e| s.ends_with(**e)) {
        s.truncate(s.len() - ext.len());
    } else if !path_like {
        // Dotted module path (`app.db`, `.models`).
        s = s.trim_start_matches('.').replace('.', "/");
    }

    for tail in ["/index", "/mod", "/__init__"] {
        if let Some(rest) = s.strip_suffix(tail) {
            s = rest.to_string();
        }
    }
    s.trim_matches('/').to_string()
}

/// Resolve a relative import against the importing file's directory.
/// Non-relative imports are returned unchanged.
pub fn resolve_relative(from_path: &str, import: &str) -> String {
    let import = import.trim().trim_matches(|c| c == '"' || c == '\'');
    if !(import.starts_with("./") || import.starts_with("../")) {
        return import.to_string();
    }

    let from = normalize_path(from_path);
    let mut parts: Vec<&str> = from.split('/').collect();
    parts.pop();
    for segment in import.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Specificity of `import` as a reference to `target`, both raw.
pub fn import_match_score(import: &str, target: &str) -> Option<f64> {
    let imp = normalize_module(import);
    let tgt = normalize_module(target);
    if imp.is_empty() || tgt.is_empty() {
        return None;
    }
    if imp == tgt {
        return Some(MODULE_SCORE);
    }
    let segment_suffix =
        |long: &str, short: &str| long.strip_suffix(short).is_some_and(|h| h.ends_with('/'));
    if segment_suffix(&tgt, &imp) || segment_suffix(&imp, &tgt) {
        return Some(SUFFIX_SCORE);
    }
    if last_segment(&imp) == last_segment(&tgt) {
        return Some(STEM_SCORE);
    }
    if imp.contains(&tgt) || tgt.contains(&imp) {
        return Some(SUBSTRING_SCORE);
    }
    None
}

fn last_segment(module: &str) -> &str {
    module.rsplit('/').next().unwrap_or(module)
}

/// File targets only accept path-level matches; bare module names also
/// accept stem and substring hits.
fn min_score(target: &str) -> f64 {
    if target.contains('/') || Language::from_path(target).is_some() {
        SUFFIX_SCORE
    } else {
        SUBSTRING_SCORE
    }
}

fn best_score(from_path: &str, imports: &[String], target: &str) -> Option<f64> {
    imports
        .iter()
        .filter_map(|i| import_match_score(&resolve_relative(from_path, i), target))
        .fold(None, |best, s| Some(best.map_or(s, |b: f64| b.max(s))))
        .filter(|s| *s >= min_score(target))
}

/// Trace imports to or from `target`.
pub async fn search<S>(
    store: &S,
    target: &str,
    direction: Direction,
    limit: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    let target = normalize_path(target);
    if normalize_module(&target).is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    match direction {
        Direction::Importers => importers(store, &target, limit, filters).await,
        Direction::Imports => imports(store, &target, limit, filters).await,
    }
}

async fn importers<S>(
    store: &S,
    target: &str,
    limit: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    let normalized = normalize_module(target);
    let needle = last_segment(&normalized);
    // The needle is a loose prefilter; scoring decides, so nothing is
    // truncated before it.
    let candidates = store.import_query(needle, usize::MAX, filters).await?;

    let mut seen_files = HashSet::new();
    let mut results = Vec::new();
    for record in candidates {
        if record.file_path == target || !seen_files.insert(record.file_id) {
            continue;
        }
        if let Some(score) = best_score(&record.file_path, &record.chunk.imports, target) {
            results.push(record.to_result(score));
        } else {
            seen_files.remove(&record.file_id);
        }
    }
    sort_and_truncate(&mut results, limit);
    Ok(results)
}

async fn imports<S>(
    store: &S,
    target: &str,
    limit: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    let own = store.chunks_for_file(target).await?;
    let mut referenced: Vec<String> = Vec::new();
    for record in &own {
        for import in &record.chunk.imports {
            if !referenced.contains(import) {
                referenced.push(import.clone());
            }
        }
    }
    if referenced.is_empty() {
        return Ok(Vec::new());
    }
    let resolved: Vec<String> = referenced
        .iter()
        .map(|i| resolve_relative(target, i))
        .collect();

    let mut matched: HashMap<String, f64> = HashMap::new();
    for path in store.file_paths(filters).await? {
        if path == target {
            continue;
        }
        let score = resolved
            .iter()
            .filter_map(|i| import_match_score(i, &path))
            .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));
        if let Some(score) = score.filter(|s| *s >= SUFFIX_SCORE) {
            matched.insert(path, score);
        }
    }
    if matched.is_empty() {
        return Ok(Vec::new());
    }

    let mut ranked: Vec<(String, f64)> = matched.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    // Fetch whole score tiers, best first, until `limit` chunks are held.
    let mut results: Vec<SearchResult> = Vec::new();
    let mut start = 0;
    while start < ranked.len() && results.len() < limit {
        let tier = ranked[start].1;
        let end = ranked[start..]
            .iter()
            .position(|(_, s)| *s != tier)
            .map_or(ranked.len(), |n| start + n);
        let paths: Vec<String> = ranked[start..end].iter().map(|(p, _)| p.clone()).collect();
        results.extend(
            store
                .chunks_for_files(&paths, usize::MAX)
                .await?
                .into_iter()
                .filter(|r| r.chunk.kind != NodeKind::Import)
                .map(|r| r.to_result(tier)),
        );
        start = end;
    }
    sort_and_truncate(&mut results, limit);
    Ok(results)
}
