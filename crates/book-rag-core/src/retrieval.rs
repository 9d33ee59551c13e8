//! Dual-query retrieval with selected-text prioritisation.
//!
//! A question may arrive with a passage the user highlighted. Retrieval
//! then runs two independent similarity searches:
//!
//! 1. **Primary**: the question, prefixed with the passage as context
//!    (`"Context: {selected}\nQuestion: {query}"`), at `score_threshold`.
//! 2. **Selected**: the passage alone, at
//!    `score_threshold × selected_text_threshold_factor`.
//!
//! Selected-text hits missing from the primary results are placed ahead
//! of all primary results, and the merged list is cut to `top_k`. The
//! two searches run concurrently.
//!
//! # Failure handling
//!
//! Retrieval never returns an error. A failed selected-text search
//! leaves the primary results as they are; a failed primary search
//! yields an empty result, which callers treat as "no relevant content".

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::models::RetrievedChunk;
use crate::vector_store::{ScoredPoint, VectorStore};

/// Retrieval tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    /// Maximum number of chunks returned.
    pub top_k: usize,
    /// Minimum similarity for the primary search.
    pub score_threshold: f64,
    /// Multiplier applied to `score_threshold` for the selected-text search.
    pub selected_text_threshold_factor: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.3,
            selected_text_threshold_factor: 0.8,
        }
    }
}

impl RetrievalParams {
    pub fn selected_text_threshold(&self) -> f64 {
        self.score_threshold * self.selected_text_threshold_factor
    }
}

/// Text embedded for the primary search.
pub fn build_search_text(query: &str, selected_text: Option<&str>) -> String {
    match selected_text {
        Some(selected) if !selected.trim().is_empty() => {
            format!("Context: {}\nQuestion: {}", selected, query)
        }
        _ => query.to_string(),
    }
}

/// Merge selected-text hits in front of primary hits.
///
/// Each selected hit not already in the list (by id) is pushed to the
/// front in turn and the list is cut back to `top_k`, so later selected
/// hits precede earlier ones. Duplicate ids never appear.
pub fn merge_results(
    primary: Vec<ScoredPoint>,
    selected: Vec<ScoredPoint>,
    top_k: usize,
) -> Vec<RetrievedChunk> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: VecDeque<ScoredPoint> = primary
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .take(top_k)
        .collect();

    for hit in selected {
        if merged.iter().any(|p| p.id == hit.id) {
            continue;
        }
        merged.push_front(hit);
        merged.truncate(top_k);
    }

    merged.into_iter().map(RetrievedChunk::from).collect()
}

/// Runs the embed-and-search steps against shared provider handles.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            embedder,
            store,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Retrieve up to `top_k` chunks for `query`, biased towards
    /// `selected_text` when it is non-blank.
    pub async fn retrieve(&self, query: &str, selected_text: Option<&str>) -> Vec<RetrievedChunk> {
        let selected_text = selected_text.filter(|s| !s.trim().is_empty());
        let primary_text = build_search_text(query, selected_text);
        let primary = self.search(&primary_text, self.params.score_threshold);

        let (primary, selected) = match selected_text {
            Some(selected) => {
                let secondary = self.search(selected, self.params.selected_text_threshold());
                let (p, s) = futures::join!(primary, secondary);
                let s = s.unwrap_or_else(|e| {
                    warn!(error = %e, "selected-text search failed; using query results only");
                    Vec::new()
                });
                (p, s)
            }
            None => (primary.await, Vec::new()),
        };

        let primary = match primary {
            Ok(points) => points,
            Err(e) => {
                warn!(error = %e, "retrieval failed; returning no results");
                return Vec::new();
            }
        };

        debug!(
            primary = primary.len(),
            selected = selected.len(),
            "retrieval candidates"
        );
        merge_results(primary, selected, self.params.top_k)
    }

    /// Probe the vector store. Failures read as unavailable.
    pub async fn is_available(&self) -> bool {
        match self.store.health().await {
            Ok(Some(info)) => {
                debug!(collection = %info.name, points = info.points_count, "vector store healthy");
                true
            }
            Ok(None) => {
                warn!("vector store collection unavailable");
                false
            }
            Err(e) => {
                warn!(error = %e, "vector store health check failed");
                false
            }
        }
    }

    async fn search(&self, text: &str, threshold: f64) -> Result<Vec<ScoredPoint>> {
        let vector = self.embedder.embed(text).await?;
        let mut points = self
            .store
            .search(&vector, self.params.top_k, threshold)
            .await?;
        points.truncate(self.params.top_k);
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{ChunkPayload, CollectionInfo, VectorPoint};
    use anyhow::bail;
    use async_trait::async_trait;
    use futures::executor::block_on;
    use std::sync::Mutex;

    const PRIMARY: f32 = 1.0;
    const SELECTED: f32 = 2.0;

    /// Embeds texts starting with "Context:" or equal to a plain query as
    /// the primary tag; anything else as the selected-text tag.
    struct TagEmbedder {
        fail_primary: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for TagEmbedder {
        fn model_name(&self) -> &str {
            "tag"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|t| {
                    let primary = t.starts_with("Context:") || t.starts_with("Q:");
                    if primary && self.fail_primary {
                        bail!("embedding service unavailable");
                    }
                    Ok(vec![if primary { PRIMARY } else { SELECTED }])
                })
                .collect()
        }
    }

    struct ScriptedStore {
        primary: Vec<ScoredPoint>,
        selected: Result<Vec<ScoredPoint>, String>,
        thresholds: Mutex<Vec<f64>>,
        healthy: bool,
    }

    impl ScriptedStore {
        fn new(primary: Vec<ScoredPoint>, selected: Vec<ScoredPoint>) -> Self {
            Self {
                primary,
                selected: Ok(selected),
                thresholds: Mutex::new(Vec::new()),
                healthy: true,
            }
        }
    }

    #[async_trait]
    impl VectorStore for ScriptedStore {
        async fn upsert(&self, _points: &[VectorPoint]) -> Result<bool> {
            Ok(true)
        }

        async fn search(
            &self,
            vector: &[f32],
            top_k: usize,
            threshold: f64,
        ) -> Result<Vec<ScoredPoint>> {
            self.thresholds.lock().unwrap().push(threshold);
            let mut hits = if vector[0] == PRIMARY {
                self.primary.clone()
            } else {
                match &self.selected {
                    Ok(hits) => hits.clone(),
                    Err(e) => bail!("{}", e),
                }
            };
            hits.retain(|h| h.score >= threshold);
            hits.truncate(top_k);
            Ok(hits)
        }

        async fn health(&self) -> Result<Option<CollectionInfo>> {
            if self.healthy {
                Ok(Some(CollectionInfo {
                    name: "chunks".to_string(),
                    points_count: 3,
                    vector_size: 1,
                }))
            } else {
                bail!("connection refused")
            }
        }
    }

    fn point(id: &str, score: f64) -> ScoredPoint {
        ScoredPoint {
            id: id.to_string(),
            payload: ChunkPayload {
                content: format!("content of {}", id),
                source_path: format!("docs/{}.md", id),
                section_title: id.to_uppercase(),
                position: 0,
                token_count: 10,
                hash: String::new(),
            },
            score,
        }
    }

    fn retriever(store: ScriptedStore, fail_primary: bool) -> (Retriever, Arc<ScriptedStore>) {
        let store = Arc::new(store);
        let r = Retriever::new(
            Arc::new(TagEmbedder { fail_primary }),
            store.clone(),
            RetrievalParams::default(),
        );
        (r, store)
    }

    fn ids(chunks: &[RetrievedChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_build_search_text() {
        assert_eq!(build_search_text("Q: why?", None), "Q: why?");
        assert_eq!(build_search_text("Q: why?", Some("  ")), "Q: why?");
        assert_eq!(
            build_search_text("why?", Some("joints")),
            "Context: joints\nQuestion: why?"
        );
    }

    #[test]
    fn test_selected_hit_placed_first() {
        let store = ScriptedStore::new(
            vec![point("q1", 0.35), point("q2", 0.35)],
            vec![point("s1", 0.5)],
        );
        let (r, store) = retriever(store, false);
        let result = block_on(r.retrieve("why?", Some("joint torque")));
        assert_eq!(ids(&result), vec!["s1", "q1", "q2"]);

        let thresholds = store.thresholds.lock().unwrap().clone();
        assert_eq!(thresholds.len(), 2);
        assert!(thresholds.iter().any(|t| (t - 0.3).abs() < 1e-9));
        assert!(thresholds.iter().any(|t| (t - 0.24).abs() < 1e-9));
    }

    #[test]
    fn test_no_selected_text_single_search() {
        let store = ScriptedStore::new(vec![point("q1", 0.9)], vec![point("s1", 0.9)]);
        let (r, store) = retriever(store, false);
        let result = block_on(r.retrieve("Q: why?", None));
        assert_eq!(ids(&result), vec!["q1"]);
        assert_eq!(store.thresholds.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_selected_hit_not_repeated() {
        let store = ScriptedStore::new(
            vec![point("a", 0.8), point("b", 0.6)],
            vec![point("b", 0.9), point("c", 0.7)],
        );
        let (r, _) = retriever(store, false);
        let result = block_on(r.retrieve("why?", Some("passage")));
        assert_eq!(ids(&result), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_merged_result_capped_at_top_k() {
        let primary: Vec<ScoredPoint> = (0..5).map(|i| point(&format!("q{}", i), 0.9)).collect();
        let selected: Vec<ScoredPoint> = (0..3).map(|i| point(&format!("s{}", i), 0.9)).collect();
        let store = ScriptedStore::new(primary, selected);
        let (r, _) = retriever(store, false);
        let result = block_on(r.retrieve("why?", Some("passage")));
        assert_eq!(ids(&result), vec!["s2", "s1", "s0", "q0", "q1"]);
    }

    #[test]
    fn test_selected_threshold_is_lower() {
        let store = ScriptedStore::new(vec![], vec![point("s1", 0.26)]);
        let (r, _) = retriever(store, false);
        let result = block_on(r.retrieve("why?", Some("passage")));
        assert_eq!(ids(&result), vec!["s1"]);
    }

    #[test]
    fn test_selected_search_failure_keeps_primary() {
        let mut store = ScriptedStore::new(vec![point("q1", 0.5)], vec![]);
        store.selected = Err("timeout".to_string());
        let (r, _) = retriever(store, false);
        let result = block_on(r.retrieve("why?", Some("passage")));
        assert_eq!(ids(&result), vec!["q1"]);
    }

    #[test]
    fn test_primary_failure_yields_empty() {
        let store = ScriptedStore::new(vec![point("q1", 0.5)], vec![point("s1", 0.5)]);
        let (r, _) = retriever(store, true);
        let result = block_on(r.retrieve("why?", Some("passage")));
        assert!(result.is_empty());
    }

    #[test]
    fn test_is_available() {
        let (r, _) = retriever(ScriptedStore::new(vec![], vec![]), false);
        assert!(block_on(r.is_available()));

        let mut down = ScriptedStore::new(vec![], vec![]);
        down.healthy = false;
        let (r, _) = retriever(down, false);
        assert!(!block_on(r.is_available()));
    }

    #[test]
    fn test_merge_preserves_primary_order_on_ties() {
        let merged = merge_results(
            vec![point("x", 0.4), point("y", 0.4), point("z", 0.4)],
            vec![],
            5,
        );
        assert_eq!(ids(&merged), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_selected_hits_pushed_to_front_in_turn() {
        let merged = merge_results(
            vec![point("q0", 0.9), point("q1", 0.8)],
            vec![point("s0", 0.7), point("q1", 0.6), point("s1", 0.5)],
            3,
        );
        assert_eq!(ids(&merged), vec!["s1", "s0", "q0"]);
    }
}
