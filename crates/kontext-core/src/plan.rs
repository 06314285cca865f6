//! Query plans and their concurrent execution.
//!
//! A plan names strategies with per-strategy query text and weights. Plans
//! normally come from an external planner as JSON:
//!
//! ```json
//! {
//!   "interpretation": "Find the validateToken symbol.",
//!   "strategies": [
//!     { "strategy": "ast", "query": "validateToken", "weight": 1.0, "reason": "Symbol lookup." },
//!     { "strategy": "fts", "query": "validateToken", "weight": 0.7 }
//!   ]
//! }
//! ```
//!
//! [`default_plan`] is a local heuristic used when no planner is involved.
//! [`execute_plan`] issues every step in parallel, joins them, and fuses.

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::embedding::Embedder;
use crate::error::SearchError;
use crate::fusion::{fuse, StrategyResult};
use crate::models::{Language, SearchFilters, SearchResult};
use crate::search::lexical::split_identifier;
use crate::search::{run_strategy, StrategyName};
use crate::store::Store;

/// One strategy invocation within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub strategy: StrategyName,
    pub query: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

impl PlanStep {
    pub fn new(strategy: StrategyName, query: impl Into<String>, weight: f64, reason: &str) -> Self {
        Self {
            strategy,
            query: query.into(),
            weight,
            reason: Some(reason.to_string()),
        }
    }
}

/// An ordered list of strategy steps for one user query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    pub strategies: Vec<PlanStep>,
}

impl QueryPlan {
    /// Parse a planner response. Accepts either the full object or a bare
    /// array of steps.
    pub fn from_json(text: &str) -> Result<Self, SearchError> {
        let text = text.trim();
        let parsed = if text.starts_with('[') {
            serde_json::from_str::<Vec<PlanStep>>(text).map(|strategies| QueryPlan {
                interpretation: None,
                strategies,
            })
        } else {
            serde_json::from_str::<QueryPlan>(text)
        };
        parsed.map_err(|e| SearchError::InvalidQuery(format!("malformed plan: {e}")))
    }

    /// Drop steps that cannot run, e.g. vector steps without an embedder.
    pub fn runnable(&self, has_embedder: bool) -> Vec<&PlanStep> {
        self.strategies
            .iter()
            .filter(|s| has_embedder || s.strategy != StrategyName::Vector)
            .filter(|s| !s.query.trim().is_empty())
            .collect()
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "code", "do", "does", "find", "for", "from",
    "how", "i", "in", "is", "it", "me", "of", "on", "or", "show", "that", "the", "this", "to",
    "what", "where", "which", "who", "why", "with", "work", "works",
];

/// Build a plan from the query text alone.
///
/// | Query shape | Steps |
/// |-------------|-------|
/// | bare symbol (`createPool`, `Auth.sign`) | ast 1.0, fts 0.7 |
/// | path or glob (`src/auth/*.ts`) | path 0.9, fts 0.6 |
/// | "who imports X" / "depends on X" | dependency 1.0, ast 0.6, fts 0.5 |
/// | anything else | vector 1.0, fts 0.7, ast 0.6 for embedded identifiers |
///
/// Without an embedder the vector step is omitted and fts leads at 1.0.
pub fn default_plan(query: &str, has_embedder: bool) -> QueryPlan {
    let query = query.trim();
    let mut plan = QueryPlan {
        interpretation: None,
        strategies: Vec::new(),
    };
    if query.is_empty() {
        return plan;
    }
    let steps = &mut plan.strategies;

    if is_path(query) {
        steps.push(PlanStep::new(StrategyName::Path, query, 0.9, "scope to matching files"));
        let words = keywords(query);
        if !words.is_empty() {
            steps.push(PlanStep::new(StrategyName::Lexical, words.join(" "), 0.6, "keyword fallback"));
        }
        return plan;
    }

    if is_symbol(query) {
        steps.push(PlanStep::new(StrategyName::Symbol, query, 1.0, "exact symbol lookup"));
        let keyword = query.rsplit(['.', ':']).next().unwrap_or(query);
        steps.push(PlanStep::new(StrategyName::Lexical, keyword, 0.7, "references in code and comments"));
        return plan;
    }

    if let Some(target) = dependency_target(query) {
        steps.push(PlanStep::new(StrategyName::Dependency, target.clone(), 1.0, "import trace"));
        let file = target.rsplit('/').next().unwrap_or(&target);
        let symbol = file.split('.').next().unwrap_or(file).to_string();
        steps.push(PlanStep::new(StrategyName::Symbol, symbol.clone(), 0.6, "definitions in the module"));
        steps.push(PlanStep::new(StrategyName::Lexical, symbol, 0.5, "keyword fallback"));
        return plan;
    }

    let words = keywords(query);
    if has_embedder {
        steps.push(PlanStep::new(StrategyName::Vector, query, 1.0, "semantic match"));
    }
    if !words.is_empty() {
        let weight = if has_embedder { 0.7 } else { 1.0 };
        steps.push(PlanStep::new(StrategyName::Lexical, words.join(" "), weight, "keyword match"));
    }
    if let Some(ident) = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_')))
        .find(|w| is_symbol(w) && split_identifier(w).len() > 1)
    {
        steps.push(PlanStep::new(StrategyName::Symbol, ident, 0.6, "identifier mentioned in query"));
    }
    plan
}

fn is_symbol(text: &str) -> bool {
    let ident = |s: &str| {
        let mut chars = s.chars();
        matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || c == '_')
    };
    if text.contains(char::is_whitespace) {
        return false;
    }
    match text.split_once('.') {
        Some((parent, name)) => ident(parent) && ident(name),
        None => match text.split_once("::") {
            Some((parent, name)) => ident(parent) && ident(name),
            None => ident(text),
        },
    }
}

fn is_path(text: &str) -> bool {
    if text.contains(char::is_whitespace) {
        return false;
    }
    text.contains('/') || text.contains(['*', '?']) || Language::from_path(text).is_some()
}

/// Byte offset of the first ASCII-case-insensitive occurrence of `needle`.
/// Offsets always fall on char boundaries of `haystack`.
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.char_indices().map(|(i, _)| i).find(|&i| {
        haystack
            .get(i..i + needle.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(needle))
    })
}

fn dependency_target(query: &str) -> Option<String> {
    let markers = [
        "who imports ",
        "what imports ",
        "imports of ",
        "importers of ",
        "depends on ",
        "dependents of ",
        "uses module ",
    ];
    let at = markers
        .iter()
        .find_map(|m| find_ignore_ascii_case(query, m).map(|i| i + m.len()))?;
    let target = query[at..]
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '?' || c == ',');
    (!target.is_empty()).then(|| target.to_string())
}

fn keywords(query: &str) -> Vec<String> {
    query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .filter(|w| !STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .map(String::from)
        .collect()
}

/// Run every runnable step concurrently against the store and fuse.
///
/// Each step fetches `candidate_k` (at least `limit`) results before
/// fusion. A step that fails to execute fails the whole query.
pub async fn execute_plan<S>(
    store: &S,
    embedder: Option<&dyn Embedder>,
    plan: &QueryPlan,
    limit: usize,
    candidate_k: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    let steps = plan.runnable(embedder.is_some());
    if steps.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let fetch = candidate_k.max(limit);

    let futures = steps.iter().map(|step| async move {
        let results = run_strategy(store, embedder, step.strategy, &step.query, fetch, filters).await?;
        tracing::debug!(
            strategy = %step.strategy,
            query = %step.query,
            hits = results.len(),
            "strategy finished"
        );
        Ok::<_, SearchError>(StrategyResult {
            strategy: step.strategy,
            weight: step.weight,
            results,
        })
    });

    let strategy_results = join_all(futures)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(fuse(&strategy_results, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeKind;
    use crate::search::test_support::{add_file, decl};
    use crate::store::memory::InMemoryStore;

    fn names(plan: &QueryPlan) -> Vec<(StrategyName, f64)> {
        plan.strategies.iter().map(|s| (s.strategy, s.weight)).collect()
    }

    #[test]
    fn test_symbol_query_plan() {
        let plan = default_plan("createPool", true);
        assert_eq!(
            names(&plan),
            vec![(StrategyName::Symbol, 1.0), (StrategyName::Lexical, 0.7)]
        );
    }

    #[test]
    fn test_path_query_plan() {
        let plan = default_plan("src/middleware/*.ts", true);
        assert_eq!(plan.strategies[0].strategy, StrategyName::Path);
        assert_eq!(plan.strategies[0].query, "src/middleware/*.ts");
    }

    #[test]
    fn test_dependency_query_plan() {
        let plan = default_plan("who imports src/db.ts?", true);
        assert_eq!(plan.strategies[0].strategy, StrategyName::Dependency);
        assert_eq!(plan.strategies[0].query, "src/db.ts");
    }

    #[test]
    fn test_dependency_target_with_non_ascii_text() {
        let plan = default_plan("İ who imports éx", false);
        assert_eq!(plan.strategies[0].strategy, StrategyName::Dependency);
        assert_eq!(plan.strategies[0].query, "éx");

        let plan = default_plan("Ärger: WHO IMPORTS src/ürl.ts", false);
        assert_eq!(plan.strategies[0].query, "src/ürl.ts");
    }

    #[test]
    fn test_natural_language_plan() {
        let plan = default_plan("how does validateToken handle expiry", true);
        assert_eq!(plan.strategies[0].strategy, StrategyName::Vector);
        assert_eq!(plan.strategies[1].strategy, StrategyName::Lexical);
        assert_eq!(plan.strategies[1].query, "validateToken handle expiry");
        assert_eq!(plan.strategies[2].query, "validateToken");

        let no_vector = default_plan("how does validateToken handle expiry", false);
        assert_eq!(no_vector.strategies[0].strategy, StrategyName::Lexical);
        assert_eq!(no_vector.strategies[0].weight, 1.0);
    }

    #[test]
    fn test_plan_from_json() {
        let plan = QueryPlan::from_json(
            r#"{"interpretation":"x","strategies":[
                {"strategy":"ast","query":"validateToken","weight":1.0,"reason":"symbol"},
                {"strategy":"fts","query":"token"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(plan.strategies.len(), 2);
        assert_eq!(plan.strategies[1].weight, 1.0);

        let bare = QueryPlan::from_json(r#"[{"strategy":"path","query":"src","weight":0.9}]"#).unwrap();
        assert_eq!(bare.strategies[0].strategy, StrategyName::Path);

        assert!(QueryPlan::from_json(r#"{"strategies":[{"strategy":"grep","query":"x"}]}"#).is_err());
    }

    #[tokio::test]
    async fn test_execute_plan_fuses_strategies() {
        let store = InMemoryStore::new();
        add_file(
            &store,
            "src/auth.ts",
            &[],
            vec![
                decl(NodeKind::Function, "validateToken", (1, 4), "function validateToken(token) { return token; }"),
                decl(NodeKind::Function, "helper", (6, 8), "function helper() { return validateToken(x); }"),
            ],
        )
        .await;

        let plan = default_plan("validateToken", false);
        let results = execute_plan(&store, None, &plan, 5, 20, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results[0].name.as_deref(), Some("validateToken"));
        assert!(results.len() >= 2);
        for w in results.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[tokio::test]
    async fn test_execute_plan_skips_vector_without_embedder() {
        let store = InMemoryStore::new();
        let plan = QueryPlan {
            interpretation: None,
            strategies: vec![PlanStep::new(StrategyName::Vector, "anything", 1.0, "semantic")],
        };
        let results = execute_plan(&store, None, &plan, 5, 20, &SearchFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
