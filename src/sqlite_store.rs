//! SQLite-backed session repository and vector store.
//!
//! [`SqliteSessionRepository`] implements the core
//! [`SessionRepository`] trait over the `sessions` table, storing history
//! as a JSON array and guarding writes with the row's `version` column.
//!
//! [`SqliteVectorStore`] implements [`VectorStore`] over the `chunks`
//! table. Vectors are stored as little-endian `f32` BLOBs and searched by
//! brute-force cosine similarity, which is adequate for a single book's
//! worth of chunks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use book_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use book_rag_core::models::SessionHistoryItem;
use book_rag_core::session::ConversationSession;
use book_rag_core::store::SessionRepository;
use book_rag_core::vector_store::{
    ChunkPayload, CollectionInfo, ScoredPoint, VectorPoint, VectorStore,
};

/// Name reported by [`SqliteVectorStore::health`].
pub const COLLECTION_NAME: &str = "chunks";

// ============ Sessions ============

/// SQLite implementation of [`SessionRepository`].
#[derive(Clone)]
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid timestamp in sessions table: {}", value))?
        .with_timezone(&Utc))
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn insert(&self, session: &ConversationSession) -> Result<()> {
        let history = serde_json::to_string(session.history())?;
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, created_at, updated_at, is_active, user_id, history, version)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.is_active)
        .bind(&session.user_id)
        .bind(history)
        .bind(session.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<ConversationSession>> {
        let row = sqlx::query(
            "SELECT session_id, created_at, updated_at, is_active, user_id, history, version \
             FROM sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");
        let history_json: String = row.get("history");
        let history: Vec<SessionHistoryItem> = serde_json::from_str(&history_json)
            .with_context(|| format!("corrupt history for session {}", session_id))?;

        Ok(Some(ConversationSession::from_parts(
            row.get("session_id"),
            parse_ts(&created_at)?,
            parse_ts(&updated_at)?,
            row.get("is_active"),
            row.get("user_id"),
            history,
            row.get("version"),
        )))
    }

    async fn save(&self, session: &ConversationSession) -> Result<bool> {
        let history = serde_json::to_string(session.history())?;
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET updated_at = ?, history = ?, version = version + 1
            WHERE session_id = ? AND version = ?
            "#,
        )
        .bind(session.updated_at.to_rfc3339())
        .bind(history)
        .bind(&session.session_id)
        .bind(session.version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_inactive(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET is_active = 0 WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ============ Vectors ============

/// SQLite implementation of [`VectorStore`] with brute-force search.
#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
    /// Configured vector size, reported by `health` while the table is empty.
    dims: usize,
}

/// Per-document bookkeeping read by ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub source_path: String,
    pub content_hash: String,
    pub section_title: String,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    /// Load the stored record for a document, if it has been ingested.
    pub async fn document(&self, source_path: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT source_path, content_hash, section_title FROM documents WHERE source_path = ?",
        )
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DocumentRecord {
            source_path: row.get("source_path"),
            content_hash: row.get("content_hash"),
            section_title: row.get("section_title"),
        }))
    }

    /// Atomically replace all chunks of a document and record its hash.
    pub async fn replace_document(
        &self,
        record: &DocumentRecord,
        points: &[VectorPoint],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_path = ?")
            .bind(&record.source_path)
            .execute(&mut *tx)
            .await?;

        for point in points {
            insert_point(point).execute(&mut *tx).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO documents (source_path, content_hash, section_title, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(source_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                section_title = excluded.section_title,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.source_path)
        .bind(&record.content_hash)
        .bind(&record.section_title)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Number of ingested documents.
    pub async fn document_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn insert_point(
    point: &VectorPoint,
) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO chunks (id, source_path, section_title, position, token_count, content, hash, embedding)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            source_path = excluded.source_path,
            section_title = excluded.section_title,
            position = excluded.position,
            token_count = excluded.token_count,
            content = excluded.content,
            hash = excluded.hash,
            embedding = excluded.embedding
        "#,
    )
    .bind(&point.id)
    .bind(&point.payload.source_path)
    .bind(&point.payload.section_title)
    .bind(point.payload.position)
    .bind(point.payload.token_count)
    .bind(&point.payload.content)
    .bind(&point.payload.hash)
    .bind(vec_to_blob(&point.vector))
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        for point in points {
            insert_point(point).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f64,
    ) -> Result<Vec<ScoredPoint>> {
        let rows = sqlx::query(
            "SELECT id, source_path, section_title, position, token_count, content, hash, embedding \
             FROM chunks ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<ScoredPoint> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
                if score < score_threshold {
                    return None;
                }
                Some(ScoredPoint {
                    id: row.get("id"),
                    payload: ChunkPayload {
                        content: row.get("content"),
                        source_path: row.get("source_path"),
                        section_title: row.get("section_title"),
                        position: row.get("position"),
                        token_count: row.get("token_count"),
                        hash: row.get("hash"),
                    },
                    score,
                })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn health(&self) -> Result<Option<CollectionInfo>> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'chunks'",
        )
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            return Ok(None);
        }

        let points_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let sample: Option<Vec<u8>> = sqlx::query_scalar("SELECT embedding FROM chunks LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        let vector_size = sample
            .map(|blob| blob.len() / std::mem::size_of::<f32>())
            .unwrap_or(self.dims);

        Ok(Some(CollectionInfo {
            name: COLLECTION_NAME.to_string(),
            points_count: points_count.max(0) as u64,
            vector_size,
        }))
    }
}
