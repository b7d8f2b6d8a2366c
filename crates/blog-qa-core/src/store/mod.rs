//! Storage abstraction for Blog QA.
//!
//! The [`Store`] trait defines every storage operation the ingestion and
//! ask pipelines need, so the ranker and synthesizer stay independent of
//! the backing database (SQLite in the app crate, in-memory for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CandidateChunk, ChunkRecord, Persona};

/// Which of a user's posts are eligible as retrieval candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostScope {
    /// Every post owned by the user.
    All,
    /// Posts whose category is one of these ids.
    Categories(Vec<i64>),
    /// A single post.
    Post(i64),
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_chunks`](Store::replace_chunks) | Atomically replace all chunks of a post |
/// | [`upsert_title_embedding`](Store::upsert_title_embedding) | Insert or replace a post's title vector |
/// | [`category_subtree`](Store::category_subtree) | Category closure: a category and all descendants |
/// | [`scoring_candidates`](Store::scoring_candidates) | Chunks joined with title vectors, in storage order |
/// | [`find_persona`](Store::find_persona) | Look up a user's persona |
/// | [`category_names`](Store::category_names) | Names of a user's categories |
#[async_trait]
pub trait Store: Send + Sync {
    /// Replace every chunk of `post_id` with `chunks` as one atomic unit.
    ///
    /// A concurrent reader sees either the old set or the new set, never
    /// a post with its chunks half deleted.
    async fn replace_chunks(&self, post_id: i64, chunks: &[ChunkRecord]) -> Result<()>;

    /// Insert or replace the single title embedding of `post_id`.
    async fn upsert_title_embedding(&self, post_id: i64, vector: &[f32]) -> Result<()>;

    /// Return `category_id` plus all of its transitive sub-categories,
    /// restricted to categories owned by `user_id`. Unknown categories
    /// yield an empty list.
    async fn category_subtree(&self, user_id: &str, category_id: i64) -> Result<Vec<i64>>;

    /// Fetch every chunk of the user's posts in `scope` joined with its
    /// post title and title embedding. Posts without a title embedding
    /// are skipped. Rows come back in a stable storage order
    /// (post id, then chunk index).
    async fn scoring_candidates(
        &self,
        user_id: &str,
        scope: &PostScope,
    ) -> Result<Vec<CandidateChunk>>;

    /// Look up a persona by id, scoped to its owner.
    async fn find_persona(&self, persona_id: i64, user_id: &str) -> Result<Option<Persona>>;

    /// Names of the user's categories, sorted.
    async fn category_names(&self, user_id: &str) -> Result<Vec<String>>;
}
