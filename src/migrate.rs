//! Schema migrations.
//!
//! All statements are idempotent, so `bookrag init` can be re-run safely
//! and the server applies them at startup.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `sessions` | Conversation sessions with JSON history and a save version |
//! | `documents` | One row per ingested file, with its content hash |
//! | `chunks` | Chunk text, metadata and embedding vector |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect to the configured database and apply the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            user_id TEXT,
            history TEXT NOT NULL DEFAULT '[]',
            version INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            source_path TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            section_title TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            section_title TEXT NOT NULL,
            position INTEGER NOT NULL,
            token_count INTEGER NOT NULL,
            content TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_path ON chunks(source_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions(updated_at)")
        .execute(pool)
        .await?;

    Ok(())
}
