//! Vector (embedding similarity) strategy.

use crate::embedding::{similarity_to_score, Embedder};
use crate::error::SearchError;
use crate::models::{SearchFilters, SearchResult};
use crate::store::Store;

use super::sort_and_truncate;

/// Embed `query` and return the `limit` nearest stored chunks.
///
/// Scores are `(1 + cosine) / 2`. An empty vector index yields an empty
/// result; a failing embedder is an error.
pub async fn search<S>(
    store: &S,
    embedder: &dyn Embedder,
    query: &str,
    limit: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, SearchError>
where
    S: Store + ?Sized,
{
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let query_vec = embedder
        .embed_single(query)
        .await
        .map_err(|e| SearchError::Embedding(format!("{e:#}")))?;
    if query_vec.len() != embedder.dimensions() {
        return Err(SearchError::Embedding(format!(
            "{} returned {} dimensions, expected {}",
            embedder.name(),
            query_vec.len(),
            embedder.dimensions()
        )));
    }

    let hits = store.nearest_vectors(&query_vec, limit, filters).await?;
    let mut results: Vec<SearchResult> = hits
        .iter()
        .map(|h| h.record.to_result(similarity_to_score(h.raw_score as f32)))
        .collect();
    sort_and_truncate(&mut results, limit);
    Ok(results)
}
