//! The five retrieval strategies.
//!
//! Each strategy is independently callable as
//! `(store, query, limit, filters) → Vec<SearchResult>` sorted descending
//! by a score already normalized into `[0, 1]`:
//!
//! | Strategy | Module | Score |
//! |----------|--------|-------|
//! | `vector` | [`vector`] | `(1 + cosine) / 2` |
//! | `fts` | [`lexical`] | BM25 relevance ÷ best relevance |
//! | `ast` | [`symbol`] | 1.0 exact, 0.8 prefix, 0.5 fuzzy |
//! | `path` | [`path`] | match specificity |
//! | `dependency` | [`dependency`] | import match specificity |
//!
//! "No results" is `Ok(vec![])`. An `Err` means the strategy could not
//! execute at all (store failure, missing embedder).

pub mod dependency;
pub mod lexical;
pub mod path;
pub mod symbol;
pub mod vector;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::embedding::Embedder;
use crate::error::SearchError;
use crate::models::{SearchFilters, SearchResult};
use crate::store::Store;

/// Identifier of a retrieval strategy, as named in query plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyName {
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "fts", alias = "lexical")]
    Lexical,
    #[serde(rename = "ast", alias = "symbol")]
    Symbol,
    #[serde(rename = "path")]
    Path,
    #[serde(rename = "dependency", alias = "deps")]
    Dependency,
}

impl StrategyName {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyName::Vector => "vector",
            StrategyName::Lexical => "fts",
            StrategyName::Symbol => "ast",
            StrategyName::Path => "path",
            StrategyName::Dependency => "dependency",
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyName {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" | "semantic" => Ok(StrategyName::Vector),
            "fts" | "lexical" | "keyword" => Ok(StrategyName::Lexical),
            "ast" | "symbol" => Ok(StrategyName::Symbol),
            "path" => Ok(StrategyName::Path),
            "dependency" | "deps" => Ok(StrategyName::Dependency),
            other => Err(SearchError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Run one named strategy with its plan-step query text.
///
/// The symbolic strategy uses tiered matching here (exact, then prefix,
/// then fuzzy) and the dependency strategy traces importers of the target.
pub async fn run_strategy<S>(
    store: &S,
    embedder: Option<&dyn Embedder>,
    strategy: StrategyName,
    query: &str,
    limit: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    match strategy {
        StrategyName::Vector => {
            let embedder = embedder.ok_or(SearchError::EmbedderUnavailable)?;
            vector::search(store, embedder, query, limit, filters).await
        }
        StrategyName::Lexical => lexical::search(store, query, limit, filters).await,
        StrategyName::Symbol => symbol::search_text(store, query, limit, filters).await,
        StrategyName::Path => path::search(store, query, limit, filters).await,
        StrategyName::Dependency => {
            dependency::search(
                store,
                query,
                dependency::Direction::Importers,
                limit,
                filters,
            )
            .await
        }
    }
}

/// Order by score descending, then chunk id ascending.
pub fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.chunk_id.cmp(&b.chunk_id))
}

pub(crate) fn sort_and_truncate(results: &mut Vec<SearchResult>, limit: usize) {
    results.sort_by(compare_results);
    results.truncate(limit);
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::chunk::content_hash;
    use crate::models::{Chunk, FileMeta, Language, NodeKind};
    use crate::store::memory::InMemoryStore;
    use crate::store::Store;

    pub struct Decl<'a> {
        pub kind: NodeKind,
        pub name: Option<&'a str>,
        pub parent: Option<&'a str>,
        pub lines: (u32, u32),
        pub text: &'a str,
    }

    pub fn decl<'a>(kind: NodeKind, name: &'a str, lines: (u32, u32), text: &'a str) -> Decl<'a> {
        Decl {
            kind,
            name: Some(name),
            parent: None,
            lines,
            text,
        }
    }

    /// Write one file with the given declarations and file-level imports.
    pub async fn add_file(
        store: &InMemoryStore,
        path: &str,
        imports: &[&str],
        decls: Vec<Decl<'_>>,
    ) -> Vec<i64> {
        let language = Language::from_path(path).unwrap_or(Language::TypeScript);
        let imports: Vec<String> = imports.iter().map(|s| s.to_string()).collect();
        let chunks: Vec<Chunk> = decls
            .into_iter()
            .map(|d| Chunk {
                line_start: d.lines.0,
                line_end: d.lines.1,
                kind: d.kind,
                name: d.name.map(String::from),
                parent: d.parent.map(String::from),
                text: d.text.to_string(),
                imports: imports.clone(),
                exports: true,
                hash: content_hash(d.text),
            })
            .collect();
        let meta = FileMeta {
            path: path.to_string(),
            language,
            hash: content_hash(path),
            size: 100,
        };
        store.replace_file(&meta, &chunks, None).await.unwrap()
    }
}
