//! Cosine similarity and ranking over bookmark embeddings.

use serde::{Deserialize, Serialize};

use crate::ai::errors::AiError;
use crate::bookmarks::Bookmark;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub id: u64,
    pub title: String,
    pub url: String,
    pub description: String,
    /// Cosine similarity clamped to [0, 1].
    pub similarity: f64,
}

impl SimilarityResult {
    fn new(bookmark: &Bookmark, similarity: f64) -> Self {
        Self {
            id: bookmark.id,
            title: bookmark.title.clone(),
            url: bookmark.url.clone(),
            description: bookmark.description.clone(),
            similarity: similarity.clamp(0.0, 1.0),
        }
    }
}

fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Cosine similarity of two vectors.
///
/// Returns 0 when either vector is missing or empty, when lengths differ or
/// when either norm is zero. Never fails.
pub fn cosine_similarity(a: Option<&[f64]>, b: Option<&[f64]>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };

    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

/// Score all candidates against `query`, keep those `>= threshold`, order
/// best first and truncate to `limit`. Ties keep candidate order.
pub fn rank(
    query: &[f64],
    candidates: &[Bookmark],
    limit: usize,
    threshold: f64,
) -> Vec<SimilarityResult> {
    let mut results = candidates
        .iter()
        .map(|candidate| {
            let score = cosine_similarity(Some(query), candidate.embedding.as_deref());
            (candidate, score)
        })
        .filter(|(_, score)| *score >= threshold)
        .map(|(candidate, score)| SimilarityResult::new(candidate, score))
        .collect::<Vec<_>>();

    sort_and_truncate(&mut results, limit);
    results
}

/// Bookmarks closest to `source_id`, excluding the source itself.
pub fn find_similar_to(
    source_id: u64,
    candidates: &[Bookmark],
    limit: usize,
) -> Result<Vec<SimilarityResult>, AiError> {
    let source = candidates
        .iter()
        .find(|b| b.id == source_id)
        .and_then(|b| b.embedding.as_deref())
        .ok_or(AiError::NoEmbedding(source_id))?;

    let mut results = candidates
        .iter()
        .filter(|candidate| candidate.id != source_id)
        .map(|candidate| {
            let score = cosine_similarity(Some(source), candidate.embedding.as_deref());
            SimilarityResult::new(candidate, score)
        })
        .collect::<Vec<_>>();

    sort_and_truncate(&mut results, limit);
    Ok(results)
}

fn sort_and_truncate(results: &mut Vec<SimilarityResult>, limit: usize) {
    // sort_by is stable, equal scores keep input order
    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    results.truncate(limit);
}
