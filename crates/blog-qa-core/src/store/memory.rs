//! In-memory [`Store`] implementation for tests and local experiments.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`, so iteration order is the
//! same stable (post id, chunk index) order the SQLite store produces.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{CandidateChunk, ChunkRecord, Persona};

use super::{PostScope, Store};

struct StoredPost {
    user_id: String,
    category_id: Option<i64>,
    title: String,
}

struct StoredCategory {
    user_id: String,
    name: String,
    parent_id: Option<i64>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    posts: RwLock<BTreeMap<i64, StoredPost>>,
    categories: RwLock<BTreeMap<i64, StoredCategory>>,
    personas: RwLock<HashMap<i64, (String, Persona)>>,
    /// post id → chunk index → (text, embedding)
    chunks: RwLock<BTreeMap<i64, BTreeMap<i64, (String, Vec<f32>)>>>,
    titles: RwLock<HashMap<i64, Vec<f32>>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a post owned by `user_id`.
    pub fn add_post(
        &self,
        post_id: i64,
        user_id: &str,
        category_id: Option<i64>,
        title: &str,
    ) -> Result<()> {
        write(&self.posts)?.insert(
            post_id,
            StoredPost {
                user_id: user_id.to_string(),
                category_id,
                title: title.to_string(),
            },
        );
        Ok(())
    }

    /// Register a category, optionally nested under `parent_id`.
    pub fn add_category(
        &self,
        category_id: i64,
        user_id: &str,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<()> {
        write(&self.categories)?.insert(
            category_id,
            StoredCategory {
                user_id: user_id.to_string(),
                name: name.to_string(),
                parent_id,
            },
        );
        Ok(())
    }

    pub fn add_persona(&self, persona_id: i64, user_id: &str, persona: Persona) -> Result<()> {
        write(&self.personas)?.insert(persona_id, (user_id.to_string(), persona));
        Ok(())
    }

    /// Number of stored chunks for a post.
    pub fn chunk_count(&self, post_id: i64) -> Result<usize> {
        Ok(read(&self.chunks)?.get(&post_id).map_or(0, |c| c.len()))
    }

    /// Stored title embedding for a post, if any.
    pub fn title_embedding(&self, post_id: i64) -> Result<Option<Vec<f32>>> {
        Ok(read(&self.titles)?.get(&post_id).cloned())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn replace_chunks(&self, post_id: i64, chunks: &[ChunkRecord]) -> Result<()> {
        let replacement: BTreeMap<i64, (String, Vec<f32>)> = chunks
            .iter()
            .map(|c| (c.chunk_index, (c.text.clone(), c.embedding.clone())))
            .collect();
        // Single insert under one write lock: readers never see a gap.
        write(&self.chunks)?.insert(post_id, replacement);
        Ok(())
    }

    async fn upsert_title_embedding(&self, post_id: i64, vector: &[f32]) -> Result<()> {
        write(&self.titles)?.insert(post_id, vector.to_vec());
        Ok(())
    }

    async fn category_subtree(&self, user_id: &str, category_id: i64) -> Result<Vec<i64>> {
        let categories = read(&self.categories)?;
        match categories.get(&category_id) {
            Some(c) if c.user_id == user_id => {}
            _ => return Ok(Vec::new()),
        }

        let mut subtree = vec![category_id];
        let mut frontier = vec![category_id];
        while let Some(parent) = frontier.pop() {
            for (id, c) in categories.iter() {
                if c.parent_id == Some(parent) && c.user_id == user_id && !subtree.contains(id) {
                    subtree.push(*id);
                    frontier.push(*id);
                }
            }
        }
        subtree.sort_unstable();
        Ok(subtree)
    }

    async fn scoring_candidates(
        &self,
        user_id: &str,
        scope: &PostScope,
    ) -> Result<Vec<CandidateChunk>> {
        let posts = read(&self.posts)?;
        let chunks = read(&self.chunks)?;
        let titles = read(&self.titles)?;

        let mut candidates = Vec::new();
        for (post_id, post) in posts.iter() {
            if post.user_id != user_id {
                continue;
            }
            let in_scope = match scope {
                PostScope::All => true,
                PostScope::Categories(ids) => {
                    post.category_id.is_some_and(|c| ids.contains(&c))
                }
                PostScope::Post(id) => post_id == id,
            };
            if !in_scope {
                continue;
            }
            let Some(title_embedding) = titles.get(post_id) else {
                continue;
            };
            let Some(post_chunks) = chunks.get(post_id) else {
                continue;
            };
            for (chunk_index, (text, embedding)) in post_chunks {
                candidates.push(CandidateChunk {
                    post_id: *post_id,
                    post_title: post.title.clone(),
                    chunk_index: *chunk_index,
                    chunk_text: text.clone(),
                    chunk_embedding: embedding.clone(),
                    title_embedding: title_embedding.clone(),
                });
            }
        }
        Ok(candidates)
    }

    async fn find_persona(&self, persona_id: i64, user_id: &str) -> Result<Option<Persona>> {
        Ok(read(&self.personas)?
            .get(&persona_id)
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, p)| p.clone()))
    }

    async fn category_names(&self, user_id: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = read(&self.categories)?
            .values()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
