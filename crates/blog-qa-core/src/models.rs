//! Core data models shared by ingestion, retrieval, and synthesis.

use serde::{Deserialize, Serialize};

/// A chunk of a post's body text with its embedding, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub post_id: i64,
    /// Zero-based position within the post.
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A stored chunk joined with its post's title and title embedding.
///
/// This is the unit the ranker scores. Posts without a title embedding
/// never produce candidates.
#[derive(Debug, Clone)]
pub struct CandidateChunk {
    pub post_id: i64,
    pub post_title: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub chunk_embedding: Vec<f32>,
    pub title_embedding: Vec<f32>,
}

/// A named tone profile owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub description: String,
}

/// One ranked chunk returned for a question. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub post_id: i64,
    pub post_title: String,
    pub chunk_text: String,
    pub similarity_score: f64,
}

/// Provenance entry sent to the caller in the `context` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub post_id: i64,
    pub post_title: String,
    pub similarity_score: f64,
}

impl From<&RetrievalResult> for ContextEntry {
    fn from(r: &RetrievalResult) -> Self {
        Self {
            post_id: r.post_id,
            post_title: r.post_title.clone(),
            similarity_score: r.similarity_score,
        }
    }
}
