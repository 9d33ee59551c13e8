//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers the three operations the pipeline
//! needs from a similarity index: bulk upsert at ingestion time,
//! thresholded top-k search at query time, and a health probe. How the
//! index is organised internally is left to the implementation.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Chunk, RetrievedChunk};

/// Metadata stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub content: String,
    pub source_path: String,
    pub section_title: String,
    pub position: i64,
    pub token_count: i64,
    pub hash: String,
}

impl From<&Chunk> for ChunkPayload {
    fn from(chunk: &Chunk) -> Self {
        Self {
            content: chunk.content.clone(),
            source_path: chunk.source_path.clone(),
            section_title: chunk.section_title.clone(),
            position: chunk.position,
            token_count: chunk.token_count,
            hash: chunk.hash.clone(),
        }
    }
}

/// A vector to insert or replace, keyed by chunk id.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub payload: ChunkPayload,
    pub score: f64,
}

impl From<ScoredPoint> for RetrievedChunk {
    fn from(point: ScoredPoint) -> Self {
        RetrievedChunk {
            id: point.id,
            content: point.payload.content,
            source_path: point.payload.source_path,
            section_title: point.payload.section_title,
            position: point.payload.position,
            token_count: point.payload.token_count,
            similarity_score: point.score,
        }
    }
}

/// Collection metadata returned by [`VectorStore::health`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub points_count: u64,
    pub vector_size: usize,
}

/// Similarity index over chunk embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace points. Returns `true` when all were written.
    async fn upsert(&self, points: &[VectorPoint]) -> Result<bool>;

    /// Return up to `top_k` points with similarity `>= score_threshold`,
    /// ranked by descending similarity. Ties keep the store's stable
    /// internal order.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f64,
    ) -> Result<Vec<ScoredPoint>>;

    /// Collection metadata, or `None` when the collection is unavailable.
    async fn health(&self) -> Result<Option<CollectionInfo>>;
}
