use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Idempotent.
///
/// `blog_post`, `category`, `category_closure` and `persona` mirror the
/// blog's own records; `post_chunks` and `post_title_embeddings` are
/// written by ingestion.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS category (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            parent_id INTEGER REFERENCES category(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (ancestor, descendant) pair, including (id, id, 0).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS category_closure (
            ancestor_id INTEGER NOT NULL REFERENCES category(id),
            descendant_id INTEGER NOT NULL REFERENCES category(id),
            depth INTEGER NOT NULL,
            PRIMARY KEY (ancestor_id, descendant_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blog_post (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL,
            category_id INTEGER REFERENCES category(id),
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS persona (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks are keyed by post id only; the post row may be synced later.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS post_chunks (
            post_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (post_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS post_title_embeddings (
            post_id INTEGER PRIMARY KEY,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_blog_post_user ON blog_post(user_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_category_closure_descendant ON category_closure(descendant_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_persona_user ON persona(user_id)")
        .execute(pool)
        .await?;

    tracing::info!("schema migrations applied");
    Ok(())
}
