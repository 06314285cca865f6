//! Symbolic (AST) strategy: structural filters over stored chunks.
//!
//! | Mode | Comparison | Score |
//! |------|------------|-------|
//! | exact | case-sensitive equality | 1.0 |
//! | prefix | case-sensitive prefix | 0.8 |
//! | fuzzy (default) | case-insensitive substring | 0.5 |
//!
//! Name, type, parent, and language filters compose as AND. An absent
//! name applies only the remaining filters.

use std::collections::HashSet;

use crate::error::SearchError;
use crate::models::{SearchFilters, SearchResult};
use crate::store::{MatchMode, Store, SymbolQuery};

use super::sort_and_truncate;

pub const EXACT_SCORE: f64 = 1.0;
pub const PREFIX_SCORE: f64 = 0.8;
pub const FUZZY_SCORE: f64 = 0.5;

/// Fixed score awarded by a match mode.
pub fn mode_score(mode: MatchMode) -> f64 {
    match mode {
        MatchMode::Exact => EXACT_SCORE,
        MatchMode::Prefix => PREFIX_SCORE,
        MatchMode::Fuzzy => FUZZY_SCORE,
    }
}

/// Run one structural query in a single match mode.
pub async fn search<S>(
    store: &S,
    query: &SymbolQuery,
    limit: usize,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    if limit == 0 {
        return Ok(Vec::new());
    }
    let mut query = query.clone();
    if query.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        query.name = None;
    }

    let score = mode_score(query.mode);
    let records = store.symbol_query(&query, limit).await?;
    let mut results: Vec<SearchResult> = records.iter().map(|r| r.to_result(score)).collect();
    sort_and_truncate(&mut results, limit);
    Ok(results)
}

/// Run a symbol lookup from plan-step text.
///
/// Accepts `name`, `Parent.name`, or an explicit `exact:`, `prefix:`, or
/// `fuzzy:` mode prefix. Without a mode prefix the lookup is tiered:
/// exact matches first, then prefix, then fuzzy, each chunk reported once
/// at its best tier.
pub async fn search_text<S>(
    store: &S,
    text: &str,
    limit: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    let (mode, rest) = split_mode(text.trim());
    let (parent, name) = split_qualified(rest);
    if name.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let base = SymbolQuery {
        name: Some(name.to_string()),
        mode: MatchMode::Exact,
        kind: None,
        parent: parent.map(String::from),
        language: filters.language,
    };

    let modes: Vec<MatchMode> = match mode {
        Some(m) => vec![m],
        None => vec![MatchMode::Exact, MatchMode::Prefix, MatchMode::Fuzzy],
    };

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for mode in modes {
        if results.len() >= limit {
            break;
        }
        let query = SymbolQuery {
            mode,
            ..base.clone()
        };
        for r in search(store, &query, limit).await? {
            if seen.insert(r.chunk_id) {
                results.push(r);
            }
        }
    }
    sort_and_truncate(&mut results, limit);
    Ok(results)
}

fn split_mode(text: &str) -> (Option<MatchMode>, &str) {
    for (prefix, mode) in [
        ("exact:", MatchMode::Exact),
        ("prefix:", MatchMode::Prefix),
        ("fuzzy:", MatchMode::Fuzzy),
    ] {
        if let Some(rest) = text.strip_prefix(prefix) {
            return (Some(mode), rest.trim());
        }
    }
    (None, text)
}

/// `AuthService.signToken` → (`Some("AuthService")`, `"signToken"`).
fn split_qualified(text: &str) -> (Option<&str>, &str) {
    let is_ident = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    match text.rsplit_once(['.', ':']) {
        Some((parent, name)) => {
            let parent = parent.trim_end_matches(':');
            if is_ident(parent) && is_ident(name) {
                (Some(parent), name)
            } else {
                (None, text)
            }
        }
        None => (None, text),
    }
}
