//! Path strategy: match indexed file paths against a path or glob.
//!
//! No text similarity is involved; the score reflects how specific the
//! match is:
//!
//! | Match | Score |
//! |-------|-------|
//! | exact path | 1.0 |
//! | directory prefix (`src/auth` ⊃ `src/auth/jwt.ts`) | 0.8 |
//! | trailing path segments (`auth/jwt.ts`) | 0.7 |
//! | glob (`src/**/*.test.ts`) | 0.6 |
//! | case-insensitive substring | 0.4 |
//!
//! Every chunk of a matched file inherits the file's score.

use std::collections::HashMap;

use globset::{Glob, GlobMatcher};

use crate::error::SearchError;
use crate::models::{SearchFilters, SearchResult};
use crate::store::Store;

use super::sort_and_truncate;

pub const EXACT_SCORE: f64 = 1.0;
pub const DIRECTORY_SCORE: f64 = 0.8;
pub const SEGMENT_SCORE: f64 = 0.7;
pub const GLOB_SCORE: f64 = 0.6;
pub const SUBSTRING_SCORE: f64 = 0.4;

/// A compiled path pattern.
pub struct PathPattern {
    text: String,
    lower: String,
    glob: Option<GlobMatcher>,
}

impl PathPattern {
    /// Normalize `raw` (`./` prefix, backslashes, trailing `/`) and compile
    /// a glob when it contains wildcard syntax. A pattern that fails to
    /// compile as a glob still matches literally.
    pub fn new(raw: &str) -> Self {
        let text = normalize_path(raw);
        let glob = if text.contains(['*', '?', '[', '{']) {
            Glob::new(&text).ok().map(|g| g.compile_matcher())
        } else {
            None
        };
        Self {
            lower: text.to_lowercase(),
            text,
            glob,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Specificity score for `path`, or `None` when it does not match.
    pub fn score(&self, path: &str) -> Option<f64> {
        if self.text.is_empty() {
            return None;
        }
        if path == self.text {
            return Some(EXACT_SCORE);
        }
        if path
            .strip_prefix(&self.text)
            .is_some_and(|rest| rest.starts_with('/'))
        {
            return Some(DIRECTORY_SCORE);
        }
        if path
            .strip_suffix(&self.text)
            .is_some_and(|head| head.ends_with('/'))
        {
            return Some(SEGMENT_SCORE);
        }
        if self.glob.as_ref().is_some_and(|g| g.is_match(path)) {
            return Some(GLOB_SCORE);
        }
        if path.to_lowercase().contains(&self.lower) {
            return Some(SUBSTRING_SCORE);
        }
        None
    }
}

/// Canonical repo-relative form: forward slashes, no leading `./`, no
/// trailing `/`.
pub fn normalize_path(raw: &str) -> String {
    let mut s = raw.trim().replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

/// Return chunks of files matching `query`, best match first.
pub async fn search<S>(
    store: &S,
    query: &str,
    limit: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    let pattern = PathPattern::new(query);
    if pattern.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut matched: Vec<(String, f64)> = store
        .file_paths(filters)
        .await?
        .into_iter()
        .filter_map(|p| pattern.score(&p).map(|s| (p, s)))
        .collect();
    if matched.is_empty() {
        return Ok(Vec::new());
    }
    matched.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    // Fetch chunks a batch of files at a time, best files first.
    let mut results = Vec::new();
    for batch in matched.chunks(limit) {
        let scores: HashMap<&str, f64> = batch.iter().map(|(p, s)| (p.as_str(), *s)).collect();
        let paths: Vec<String> = batch.iter().map(|(p, _)| p.clone()).collect();
        for record in store.chunks_for_files(&paths, limit).await? {
            let score = scores
                .get(record.file_path.as_str())
                .copied()
                .unwrap_or(SUBSTRING_SCORE);
            results.push(record.to_result(score));
        }
        if results.len() >= limit {
            break;
        }
    }

    sort_and_truncate(&mut results, limit);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, NodeKind};
    use crate::search::test_support::{add_file, decl};
    use crate::store::memory::InMemoryStore;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src/auth/"), "src/auth");
        assert_eq!(normalize_path("src\\db.py"), "src/db.py");
        assert_eq!(normalize_path("  "), "");
    }

    #[test]
    fn test_pattern_specificity() {
        let exact = PathPattern::new("src/auth/jwt.ts");
        assert_eq!(exact.score("src/auth/jwt.ts"), Some(EXACT_SCORE));

        let dir = PathPattern::new("src/auth");
        assert_eq!(dir.score("src/auth/jwt.ts"), Some(DIRECTORY_SCORE));
        assert_eq!(dir.score("src/authz.ts"), Some(SUBSTRING_SCORE));

        let tail = PathPattern::new("auth/jwt.ts");
        assert_eq!(tail.score("src/auth/jwt.ts"), Some(SEGMENT_SCORE));

        let glob = PathPattern::new("src/**/*.test.ts");
        assert_eq!(glob.score("src/auth/jwt.test.ts"), Some(GLOB_SCORE));
        assert_eq!(glob.score("src/auth/jwt.ts"), None);

        let sub = PathPattern::new("JWT");
        assert_eq!(sub.score("src/auth/jwt.ts"), Some(SUBSTRING_SCORE));
        assert_eq!(sub.score("src/db.py"), None);
    }

    #[tokio::test]
    async fn test_path_search_orders_by_specificity() {
        let store = InMemoryStore::new();
        add_file(&store, "src/auth/jwt.ts", &[], vec![decl(NodeKind::Function, "sign", (1, 2), "function sign() {}")]).await;
        add_file(&store, "src/auth.ts", &[], vec![decl(NodeKind::Function, "login", (1, 2), "function login() {}")]).await;
        add_file(&store, "lib/other.py", &[], vec![decl(NodeKind::Function, "other", (1, 2), "def other(): pass")]).await;

        let results = search(&store, "src/auth", 10, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].file_path, "src/auth/jwt.ts");
        assert_eq!(results[0].score, DIRECTORY_SCORE);
        assert_eq!(results[1].score, SUBSTRING_SCORE);

        let globbed = search(&store, "**/*.py", 10, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(globbed.len(), 1);
        assert_eq!(globbed[0].language, Language::Python);

        let filtered = search(&store, "src", 10, &SearchFilters::language(Language::Go))
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }
}
