//! Lexical (keyword) strategy.
//!
//! Queries are tokenized into lowercase words of alphanumerics and
//! underscores; a trailing `*` marks a prefix term. Compound identifiers
//! (`validateToken`, `create_pool`) also contribute their sub-words so
//! natural-language queries reach camelCase and snake_case code.
//!
//! The store ranks chunks with BM25 over name, parent, text, and the
//! identifier sub-words produced by [`index_terms`]. Relevance is then
//! normalized against the best hit: `score = raw / max(raw)`.

use std::collections::BTreeSet;

use crate::error::SearchError;
use crate::models::{SearchFilters, SearchResult};
use crate::store::{LexicalQuery, LexicalTerm, ScoredChunk, Store};

use super::sort_and_truncate;

/// Upper bound on query terms sent to the store.
const MAX_TERMS: usize = 32;

/// Run a keyword query against the store's lexical index.
pub async fn search<S>(
    store: &S,
    query: &str,
    limit: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    let parsed = parse_query(query);
    if parsed.terms.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let hits = store.lexical_search(&parsed, limit, filters).await?;
    let mut results: Vec<SearchResult> = normalize_scores(&hits)
        .into_iter()
        .map(|(hit, score)| hit.record.to_result(score))
        .collect();
    sort_and_truncate(&mut results, limit);
    Ok(results)
}

/// Tokenize free text into a [`LexicalQuery`].
pub fn parse_query(query: &str) -> LexicalQuery {
    let mut seen = BTreeSet::new();
    let mut terms = Vec::new();
    let mut push = |text: String, prefix: bool, terms: &mut Vec<LexicalTerm>| {
        if !text.is_empty() && seen.insert((text.clone(), prefix)) {
            terms.push(LexicalTerm { text, prefix });
        }
    };

    for raw in query.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '*')) {
        let prefix = raw.ends_with('*');
        let word: String = raw.chars().filter(|c| *c != '*').collect();
        if word.is_empty() {
            continue;
        }
        push(word.to_lowercase(), prefix, &mut terms);
        let parts = split_identifier(&word);
        if parts.len() > 1 {
            for part in parts {
                push(part, false, &mut terms);
            }
        }
    }

    terms.truncate(MAX_TERMS);
    LexicalQuery { terms }
}

/// Split an identifier on underscores and case boundaries into lowercase
/// words: `parseHTTPRequest` → `parse`, `http`, `request`.
pub fn split_identifier(ident: &str) -> Vec<String> {
    let chars: Vec<char> = ident.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_lower) {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Lowercase tokens of `text` as the lexical index sees them.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Identifier sub-words for the `terms` column of the lexical index:
/// every compound identifier in `fields` contributes its split words.
pub fn index_terms(fields: &[&str]) -> String {
    let mut words = BTreeSet::new();
    for field in fields {
        for token in field.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
            let parts = split_identifier(token);
            if parts.len() > 1 {
                words.extend(parts);
            }
        }
    }
    words.into_iter().collect::<Vec<_>>().join(" ")
}

/// Normalize backend relevance into `[0, 1]` relative to the best hit.
///
/// Non-positive maxima (a degenerate ranking) map every hit to `1.0`.
pub fn normalize_scores(hits: &[ScoredChunk]) -> Vec<(&ScoredChunk, f64)> {
    let max = hits
        .iter()
        .map(|h| h.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|h| {
            let norm = if max <= f64::EPSILON || !max.is_finite() {
                1.0
            } else {
                (h.raw_score / max).clamp(0.0, 1.0)
            };
            (h, norm)
        })
        .collect()
}
