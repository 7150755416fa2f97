use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{VectorError, VectorResult};
use crate::models::{Aggregation, SearchResult};

/// Score descending, ties broken by id so output is deterministic.
pub(crate) fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

/// Keep the highest-scoring occurrence of every id.
pub(crate) fn dedupe_max(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut best: HashMap<Uuid, SearchResult> = HashMap::with_capacity(results.len());
    for result in results {
        match best.get(&result.id) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                best.insert(result.id, result);
            }
        }
    }
    best.into_values().collect()
}

/// Weights scaled to sum to 1.
///
/// Requires exactly one finite, non-negative weight per vector and a
/// positive sum.
pub fn normalize_weights(weights: Option<&[f32]>, vectors: usize) -> VectorResult<Vec<f32>> {
    let weights = weights
        .ok_or_else(|| VectorError::validation("weighted aggregation requires weights"))?;
    if weights.len() != vectors {
        return Err(VectorError::validation(format!(
            "expected {} weights, got {}",
            vectors,
            weights.len()
        )));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(VectorError::validation("weights must be finite and non-negative"));
    }
    let sum: f32 = weights.iter().sum();
    if sum <= 0.0 {
        return Err(VectorError::validation("weights must not all be zero"));
    }
    Ok(weights.iter().map(|w| w / sum).collect())
}

/// Combine one result set per query vector into a single ranking.
///
/// `Average` is the mean over the sets an id appears in, `Max` the best
/// score, `Weighted` the sum of `score × normalized weight` (absent counts
/// as 0). `None` keeps a single set as-is and acts as `Max` otherwise.
pub fn aggregate(
    sets: Vec<Vec<SearchResult>>,
    aggregation: Aggregation,
    weights: Option<&[f32]>,
    limit: usize,
) -> VectorResult<Vec<SearchResult>> {
    let weights = match aggregation {
        Aggregation::Weighted => Some(normalize_weights(weights, sets.len())?),
        _ => None,
    };

    let mut merged = match (aggregation, sets.len()) {
        (Aggregation::None, 1) => sets.into_iter().flatten().collect(),
        (Aggregation::None | Aggregation::Max, _) => dedupe_max(sets.into_iter().flatten().collect()),
        (Aggregation::Average, _) => {
            let mut acc: HashMap<Uuid, (f32, u32, SearchResult)> = HashMap::new();
            for result in sets.into_iter().flatten() {
                let entry = acc.entry(result.id).or_insert_with(|| (0.0, 0, result.clone()));
                entry.0 += result.score;
                entry.1 += 1;
            }
            acc.into_values()
                .map(|(sum, count, mut result)| {
                    result.score = sum / count as f32;
                    result
                })
                .collect()
        }
        (Aggregation::Weighted, _) => {
            let weights = weights.unwrap_or_default();
            let mut acc: HashMap<Uuid, SearchResult> = HashMap::new();
            for (set, weight) in sets.into_iter().zip(weights) {
                for result in set {
                    let weighted = result.score * weight;
                    acc.entry(result.id)
                        .and_modify(|r| r.score += weighted)
                        .or_insert_with(|| SearchResult {
                            score: weighted,
                            ..result
                        });
                }
            }
            acc.into_values().collect()
        }
    };

    sort_by_score(&mut merged);
    merged.truncate(limit);
    Ok(merged)
}

/// Blend vector and keyword results: `vector × vector_weight + keyword ×
/// text_weight`, an id missing from one side scoring 0 there.
pub fn merge_hybrid(
    vector: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    vector_weight: f32,
    text_weight: f32,
    limit: usize,
) -> Vec<SearchResult> {
    let mut merged: HashMap<Uuid, SearchResult> = HashMap::with_capacity(vector.len());

    for result in vector {
        merged.insert(
            result.id,
            SearchResult {
                score: result.score * vector_weight,
                ..result
            },
        );
    }

    for result in keyword {
        let weighted = result.score * text_weight;
        match merged.get_mut(&result.id) {
            Some(existing) => {
                existing.score += weighted;
                if existing.payload.is_none() {
                    existing.payload = result.payload;
                }
            }
            None => {
                merged.insert(
                    result.id,
                    SearchResult {
                        score: weighted,
                        ..result
                    },
                );
            }
        }
    }

    let mut merged: Vec<SearchResult> = merged.into_values().collect();
    sort_by_score(&mut merged);
    merged.truncate(limit);
    merged
}
