//! SQLite-backed [`Store`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs and decoded in Rust; the
//! ranker computes distances itself, so no vector extension is needed.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use blog_qa_core::embedding::{blob_to_vec, vec_to_blob};
use blog_qa_core::models::{CandidateChunk, ChunkRecord, Persona};
use blog_qa_core::store::{PostScope, Store};

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update a post row mirrored from the blog.
    pub async fn upsert_post(
        &self,
        post_id: i64,
        user_id: &str,
        category_id: Option<i64>,
        title: &str,
        content: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blog_post (id, user_id, category_id, title, content)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                category_id = excluded.category_id,
                title = excluded.title,
                content = excluded.content
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .bind(category_id)
        .bind(title)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a category and its closure rows.
    ///
    /// The parent must already exist, so categories are inserted
    /// top-down.
    pub async fn insert_category(
        &self,
        category_id: i64,
        user_id: &str,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(parent) = parent_id {
            let owned: Option<i64> =
                sqlx::query_scalar("SELECT id FROM category WHERE id = ? AND user_id = ?")
                    .bind(parent)
                    .bind(user_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if owned.is_none() {
                bail!("parent category {} not found for user {}", parent, user_id);
            }
        }

        sqlx::query("INSERT INTO category (id, user_id, name, parent_id) VALUES (?, ?, ?, ?)")
            .bind(category_id)
            .bind(user_id)
            .bind(name)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO category_closure (ancestor_id, descendant_id, depth) VALUES (?, ?, 0)",
        )
        .bind(category_id)
        .bind(category_id)
        .execute(&mut *tx)
        .await?;

        if let Some(parent) = parent_id {
            sqlx::query(
                r#"
                INSERT INTO category_closure (ancestor_id, descendant_id, depth)
                SELECT ancestor_id, ?, depth + 1
                FROM category_closure
                WHERE descendant_id = ?
                "#,
            )
            .bind(category_id)
            .bind(parent)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_persona(
        &self,
        persona_id: i64,
        user_id: &str,
        persona: &Persona,
    ) -> Result<()> {
        sqlx::query("INSERT INTO persona (id, user_id, name, description) VALUES (?, ?, ?, ?)")
            .bind(persona_id)
            .bind(user_id)
            .bind(&persona.name)
            .bind(&persona.description)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn chunk_count(&self, post_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_chunks WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn title_embedding(&self, post_id: i64) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT embedding FROM post_title_embeddings WHERE post_id = ?")
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob.map(|b| blob_to_vec(&b)))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn replace_chunks(&self, post_id: i64, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM post_chunks WHERE post_id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO post_chunks (post_id, chunk_index, content, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(post_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(vec_to_blob(&chunk.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_title_embedding(&self, post_id: i64, vector: &[f32]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO post_title_embeddings (post_id, embedding)
            VALUES (?, ?)
            ON CONFLICT(post_id) DO UPDATE SET embedding = excluded.embedding
            "#,
        )
        .bind(post_id)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn category_subtree(&self, user_id: &str, category_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT cc.descendant_id
            FROM category_closure cc
            JOIN category a ON a.id = cc.ancestor_id
            JOIN category d ON d.id = cc.descendant_id
            WHERE cc.ancestor_id = ? AND a.user_id = ? AND d.user_id = ?
            ORDER BY cc.descendant_id
            "#,
        )
        .bind(category_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn scoring_candidates(
        &self,
        user_id: &str,
        scope: &PostScope,
    ) -> Result<Vec<CandidateChunk>> {
        let scope_clause = match scope {
            PostScope::All => String::new(),
            PostScope::Categories(ids) if ids.is_empty() => return Ok(Vec::new()),
            PostScope::Categories(ids) => format!(
                " AND p.category_id IN ({})",
                vec!["?"; ids.len()].join(", ")
            ),
            PostScope::Post(_) => " AND p.id = ?".to_string(),
        };

        let sql = format!(
            r#"
            SELECT p.id AS post_id, p.title, c.chunk_index, c.content,
                   c.embedding AS chunk_embedding, t.embedding AS title_embedding
            FROM post_chunks c
            JOIN blog_post p ON p.id = c.post_id
            JOIN post_title_embeddings t ON t.post_id = p.id
            WHERE p.user_id = ?{}
            ORDER BY p.id, c.chunk_index
            "#,
            scope_clause
        );

        let mut query = sqlx::query(&sql).bind(user_id);
        match scope {
            PostScope::All => {}
            PostScope::Categories(ids) => {
                for id in ids {
                    query = query.bind(*id);
                }
            }
            PostScope::Post(id) => query = query.bind(*id),
        }

        let rows = query.fetch_all(&self.pool).await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let chunk_blob: Vec<u8> = row.get("chunk_embedding");
                let title_blob: Vec<u8> = row.get("title_embedding");
                CandidateChunk {
                    post_id: row.get("post_id"),
                    post_title: row.get("title"),
                    chunk_index: row.get("chunk_index"),
                    chunk_text: row.get("content"),
                    chunk_embedding: blob_to_vec(&chunk_blob),
                    title_embedding: blob_to_vec(&title_blob),
                }
            })
            .collect();

        Ok(candidates)
    }

    async fn find_persona(&self, persona_id: i64, user_id: &str) -> Result<Option<Persona>> {
        let row = sqlx::query("SELECT name, description FROM persona WHERE id = ? AND user_id = ?")
            .bind(persona_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Persona {
            name: r.get("name"),
            description: r.get("description"),
        }))
    }

    async fn category_names(&self, user_id: &str) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM category WHERE user_id = ? ORDER BY name")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }
}
