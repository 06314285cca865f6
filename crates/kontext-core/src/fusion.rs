//! Weighted reciprocal-rank fusion.
//!
//! Strategies score on incomparable scales (BM25 ratios, cosine, fixed
//! symbolic tiers), so fusion combines ranks rather than raw scores.
//!
//! # Algorithm
//!
//! 1. Within each strategy list, sort by (score desc, chunk id asc) and
//!    assign competition ranks: tied scores share a rank.
//! 2. Plan weights are divided by the largest weight, so the heaviest
//!    strategy gets `1.0` and the others keep their ratio to it.
//! 3. Each appearance contributes `w / (K + rank)` with `K = 60`.
//! 4. A chunk's fused score is the sum of its contributions divided by
//!    `Σ w / (K + 1)` over all strategies, the score of a chunk ranked
//!    first everywhere. Fused scores therefore lie in `[0, 1]`.
//! 5. Sort by fused score desc, chunk id asc; truncate to `limit`.
//!
//! Contributions are summed in a canonical order, so the output does not
//! depend on the order strategies were run in. Every chunk from every
//! input appears in the pre-truncation union.

use std::collections::HashMap;

use crate::models::SearchResult;
use crate::search::{compare_results, StrategyName};

/// Rank offset dampening the head of each list.
pub const RRF_K: f64 = 60.0;

/// One strategy's ranked output and its plan weight.
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub strategy: StrategyName,
    pub weight: f64,
    pub results: Vec<SearchResult>,
}

/// Negative and non-finite plan weights count as zero.
pub fn effective_weight(weight: f64) -> f64 {
    if weight.is_finite() {
        weight.max(0.0)
    } else {
        0.0
    }
}

/// Effective weights scaled by the largest one. All zero becomes all one.
fn normalized_weights(strategy_results: &[StrategyResult]) -> Vec<f64> {
    let weights: Vec<f64> = strategy_results
        .iter()
        .map(|sr| effective_weight(sr.weight))
        .collect();
    let largest = weights.iter().copied().fold(0.0, f64::max);
    if largest > 0.0 {
        weights.into_iter().map(|w| w / largest).collect()
    } else {
        vec![1.0; weights.len()]
    }
}

/// Merge strategy results into one ranked, deduplicated list.
///
/// If every weight is zero, all strategies are weighted equally so that
/// no found chunk is lost.
pub fn fuse(strategy_results: &[StrategyResult], limit: usize) -> Vec<SearchResult> {
    let weights = normalized_weights(strategy_results);
    let mut sorted_weights = weights.clone();
    sorted_weights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let max_total: f64 = sorted_weights.iter().map(|w| w / (RRF_K + 1.0)).sum();
    if max_total <= 0.0 {
        return Vec::new();
    }

    let mut contributions: HashMap<i64, (SearchResult, Vec<f64>)> = HashMap::new();
    for (sr, weight) in strategy_results.iter().zip(&weights) {
        for (result, rank) in ranked(&sr.results) {
            let contribution = weight / (RRF_K + rank as f64);
            contributions
                .entry(result.chunk_id)
                .or_insert_with(|| (result.clone(), Vec::new()))
                .1
                .push(contribution);
        }
    }

    let mut fused: Vec<SearchResult> = contributions
        .into_values()
        .map(|(mut result, mut parts)| {
            parts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let total: f64 = parts.iter().sum();
            result.score = (total / max_total).clamp(0.0, 1.0);
            result
        })
        .collect();

    fused.sort_by(compare_results);
    fused.truncate(limit);
    fused
}

/// Deduplicate by chunk id (keeping the best score) and pair each result
/// with its competition rank.
fn ranked(results: &[SearchResult]) -> Vec<(&SearchResult, usize)> {
    let mut best: HashMap<i64, &SearchResult> = HashMap::new();
    for r in results {
        best.entry(r.chunk_id)
            .and_modify(|cur| {
                if r.score > cur.score {
                    *cur = r;
                }
            })
            .or_insert(r);
    }
    let mut unique: Vec<&SearchResult> = best.into_values().collect();
    unique.sort_by(|a, b| compare_results(a, b));

    let mut out = Vec::with_capacity(unique.len());
    let mut rank = 0;
    let mut prev_score: Option<f64> = None;
    for (i, r) in unique.into_iter().enumerate() {
        if prev_score != Some(r.score) {
            rank = i + 1;
            prev_score = Some(r.score);
        }
        out.push((r, rank));
    }
    out
}
