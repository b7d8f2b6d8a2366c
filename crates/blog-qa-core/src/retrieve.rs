//! Hybrid title/content retrieval ranker.
//!
//! Scores every candidate chunk of a user's posts against a query vector
//! by blending content similarity and title similarity:
//!
//! ```text
//! score = α · 1/(1 + ‖chunk − q‖) + β · 1/(1 + ‖title − q‖)
//! ```
//!
//! # Algorithm
//!
//! 1. Resolve the post scope: a single post, a category subtree (the
//!    category plus every transitive descendant), or all of the user's posts.
//! 2. Fetch candidate chunks with their title embeddings from the [`Store`].
//! 3. Score each candidate; drop anything with `score < threshold`.
//! 4. Stable-sort by score (desc) so ties keep storage order.
//! 5. Truncate to `limit`.
//!
//! An empty result means nothing relevant was found. It is not an error;
//! store faults are returned as `Err` and the caller owns the retry policy.

use anyhow::Result;

use crate::embedding::{distance_similarity, euclidean_distance};
use crate::models::{CandidateChunk, RetrievalResult};
use crate::store::{PostScope, Store};

pub const DEFAULT_LIMIT: usize = 5;
pub const DEFAULT_ALPHA: f64 = 0.7;
pub const DEFAULT_BETA: f64 = 0.3;
pub const DEFAULT_THRESHOLD: f64 = 0.45;

/// Ranking parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Maximum results to return.
    pub limit: usize,
    /// Weight of chunk-content similarity.
    pub alpha: f64,
    /// Weight of post-title similarity.
    pub beta: f64,
    /// Minimum blended score a result must reach.
    pub threshold: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Bundles all inputs for a single retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub query_vec: &'a [f32],
    pub user_id: &'a str,
    /// Restrict to this category and its descendants.
    pub category_id: Option<i64>,
    /// Restrict to one post. Takes precedence over `category_id`.
    pub post_id: Option<i64>,
    pub params: RetrievalParams,
}

/// Blend content and title similarity for one chunk.
pub fn hybrid_score(
    chunk_embedding: &[f32],
    title_embedding: &[f32],
    query_vec: &[f32],
    alpha: f64,
    beta: f64,
) -> f64 {
    let content = distance_similarity(euclidean_distance(chunk_embedding, query_vec));
    let title = distance_similarity(euclidean_distance(title_embedding, query_vec));
    alpha * content + beta * title
}

/// Score, filter, order, and truncate candidates. Pure.
pub fn rank(
    candidates: Vec<CandidateChunk>,
    query_vec: &[f32],
    params: &RetrievalParams,
) -> Vec<RetrievalResult> {
    let mut results: Vec<RetrievalResult> = candidates
        .into_iter()
        .filter_map(|c| {
            let score = hybrid_score(
                &c.chunk_embedding,
                &c.title_embedding,
                query_vec,
                params.alpha,
                params.beta,
            );
            (score >= params.threshold).then(|| RetrievalResult {
                post_id: c.post_id,
                post_title: c.post_title,
                chunk_text: c.chunk_text,
                similarity_score: score,
            })
        })
        .collect();

    // `sort_by` is stable: equal scores keep storage order.
    results.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(params.limit);
    results
}

/// Run retrieval against a [`Store`] backend.
pub async fn retrieve<S: Store + ?Sized>(
    store: &S,
    req: &RetrievalRequest<'_>,
) -> Result<Vec<RetrievalResult>> {
    let scope = match (req.post_id, req.category_id) {
        (Some(post_id), _) => PostScope::Post(post_id),
        (None, Some(category_id)) => {
            let subtree = store.category_subtree(req.user_id, category_id).await?;
            if subtree.is_empty() {
                return Ok(Vec::new());
            }
            PostScope::Categories(subtree)
        }
        (None, None) => PostScope::All,
    };

    let candidates = store.scoring_candidates(req.user_id, &scope).await?;
    Ok(rank(candidates, req.query_vec, &req.params))
}
