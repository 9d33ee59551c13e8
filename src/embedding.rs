//! Embedding provider implementations.
//!
//! Implements the core [`EmbeddingProvider`] trait for:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: any OpenAI-compatible `POST {url}/embeddings`
//!   endpoint (OpenAI, OpenRouter).
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//!
//! [`TimeoutEmbedder`] bounds the total time of a call, retries included.
//!
//! # Retry Strategy
//!
//! HTTP calls go through [`post_json_with_retry`], shared with the
//! generation providers:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use book_rag_core::embedding::EmbeddingProvider;

use crate::config::{api_key, EmbeddingConfig};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// POST a JSON body, retrying transient failures with exponential backoff.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    service: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(service, attempt, delay_secs = delay.as_secs(), "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("{} returned invalid JSON", service));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error ({}): {}", service, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", service)))
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to create HTTP client")
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"`. Query-time retrieval
/// degrades to "no results"; ingestion refuses to run.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider for OpenAI-compatible APIs.
///
/// Requires `OPENAI_API_KEY` or `OPENROUTER_API_KEY` in the environment.
pub struct OpenAIProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key =
            api_key().ok_or_else(|| anyhow!("OPENAI_API_KEY or OPENROUTER_API_KEY not set"))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_batch(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

/// Parse `data[].embedding` arrays, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). Requires an embedding model to be pulled,
/// e.g. `ollama pull nomic-embed-text`.
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.endpoint,
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        check_batch(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn check_batch(expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "Embedding response has {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    Ok(())
}

// ============ Deadline ============

/// Bounds every call on the wrapped provider to `limit`. An elapsed
/// deadline is reported as an ordinary provider error.
pub struct TimeoutEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    limit: Duration,
}

impl TimeoutEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl EmbeddingProvider for TimeoutEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match tokio::time::timeout(self.limit, self.inner.embed_batch(texts)).await {
            Ok(result) => result,
            Err(_) => bail!("embedding timed out after {}s", self.limit.as_secs()),
        }
    }
}

/// Create the [`EmbeddingProvider`] selected by `[embedding].provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        let err = parse_openai_response(&serde_json::json!({"error": "bad"})).unwrap_err();
        assert!(err.to_string().contains("missing data"));
    }

    #[test]
    fn test_parse_ollama() {
        let json = serde_json::json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_check_batch_mismatch() {
        assert!(check_batch(2, &[vec![1.0]]).is_err());
        assert!(check_batch(1, &[vec![1.0]]).is_ok());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        let err = provider.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_timeout_reported_as_error() {
        let embedder = TimeoutEmbedder::new(Arc::new(SlowEmbedder), Duration::from_millis(20));
        let err = embedder.embed("q").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
