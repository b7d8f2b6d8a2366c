//! Ingestion of post titles and bodies.
//!
//! Titles become one embedding per post (upserted). Bodies are chunked,
//! embedded in batches, and written as a full replacement of the post's
//! previous chunk set in a single store transaction.

use anyhow::{bail, Result};
use serde::Serialize;

use blog_qa_core::chunk::{chunk_text, Tokenizer};
use blog_qa_core::embedding::{embed_batched, embed_query, EmbeddingProvider};
use blog_qa_core::models::ChunkRecord;
use blog_qa_core::store::Store;

use crate::config::ChunkingConfig;

/// Result of a content ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentIngestReport {
    pub post_id: i64,
    pub chunk_count: usize,
}

fn check_dims(provider: &dyn EmbeddingProvider, vector: &[f32]) -> Result<()> {
    let expected = provider.dims();
    if expected > 0 && vector.len() != expected {
        bail!(
            "embedding has {} dimensions, expected {} for model {}",
            vector.len(),
            expected,
            provider.model_name()
        );
    }
    Ok(())
}

/// Embed a post title and upsert it as the post's single title vector.
pub async fn ingest_title(
    store: &dyn Store,
    embedder: &dyn EmbeddingProvider,
    post_id: i64,
    title: &str,
) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        bail!("title must not be empty");
    }

    let vector = embed_query(embedder, title).await?;
    check_dims(embedder, &vector)?;
    store.upsert_title_embedding(post_id, &vector).await?;

    tracing::info!(post_id, dims = vector.len(), "title embedding stored");
    Ok(())
}

/// Chunk, embed and store a post body, replacing any previous chunks.
///
/// Chunk budgets are counted with `tokenizer`. Empty content clears the
/// post's chunks.
pub async fn ingest_content<T: Tokenizer + ?Sized>(
    store: &dyn Store,
    embedder: &dyn EmbeddingProvider,
    tokenizer: &T,
    chunking: &ChunkingConfig,
    batch_size: usize,
    post_id: i64,
    content: &str,
) -> Result<ContentIngestReport> {
    let texts = chunk_text(
        tokenizer,
        content,
        chunking.max_tokens,
        chunking.overlap_tokens,
    );

    let vectors = if texts.is_empty() {
        Vec::new()
    } else {
        embed_batched(embedder, &texts, batch_size).await?
    };
    for vector in &vectors {
        check_dims(embedder, vector)?;
    }

    let records: Vec<ChunkRecord> = texts
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(i, (text, embedding))| ChunkRecord {
            post_id,
            chunk_index: i as i64,
            text,
            embedding,
        })
        .collect();

    store.replace_chunks(post_id, &records).await?;

    tracing::info!(post_id, chunks = records.len(), "content chunks stored");
    Ok(ContentIngestReport {
        post_id,
        chunk_count: records.len(),
    })
}
