//! Chat-completion provider implementations.
//!
//! Implements the core [`GenerationProvider`] trait for:
//! - **[`DisabledGenerator`]**: always errors, so every grounded turn gets the apology reply.
//! - **[`OpenAIGenerator`]**: OpenAI-compatible `POST {url}/chat/completions`
//!   (OpenAI, OpenRouter, vLLM, LM Studio).
//! - **[`OllamaGenerator`]**: `POST {url}/api/chat` on a local Ollama.
//!
//! Requests are retried with the same backoff policy as the embedding
//! providers. [`TimeoutGenerator`] bounds a whole call.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use book_rag_core::generation::{Completion, GenerationProvider};
use book_rag_core::models::ChatMessage;

use crate::config::{api_key, GenerationConfig};
use crate::embedding::{http_client, post_json_with_retry, DEFAULT_OLLAMA_URL, DEFAULT_OPENAI_URL};

/// Resolve the chat completions endpoint from a configured base URL.
///
/// Bases ending in `/v1` get `/chat/completions` appended; a URL that
/// already names the endpoint is used as-is.
fn chat_completions_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _max_tokens: usize,
        _temperature: f64,
    ) -> Result<Completion> {
        bail!("Generation provider is disabled")
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAIGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_retries: u32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);

        // Local OpenAI-compatible servers usually run without a key.
        let api_key = api_key();
        if api_key.is_none() && config.url.is_none() {
            bail!("OPENAI_API_KEY or OPENROUTER_API_KEY not set");
        }

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: chat_completions_endpoint(base),
            api_key,
            model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        temperature: f64,
    ) -> Result<Completion> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_completion(&json)
    }
}

fn parse_openai_completion(json: &serde_json::Value) -> Result<Completion> {
    let choice = json
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| anyhow!("Invalid completion response: no choices"))?;
    let text = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid completion response: missing message content"))?;
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|r| r.as_str())
        .map(str::to_string);

    Ok(Completion {
        text: text.to_string(),
        finish_reason,
    })
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for Ollama provider"))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/api/chat", base.trim_end_matches('/')),
            model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        temperature: f64,
    ) -> Result<Completion> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
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
        parse_ollama_completion(&json)
    }
}

fn parse_ollama_completion(json: &serde_json::Value) -> Result<Completion> {
    let text = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message content"))?;
    let finish_reason = json
        .get("done_reason")
        .and_then(|r| r.as_str())
        .map(str::to_string);

    Ok(Completion {
        text: text.to_string(),
        finish_reason,
    })
}

// ============ Deadline ============

/// Bounds every completion on the wrapped provider to `limit`.
pub struct TimeoutGenerator {
    inner: Arc<dyn GenerationProvider>,
    limit: Duration,
}

impl TimeoutGenerator {
    pub fn new(inner: Arc<dyn GenerationProvider>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl GenerationProvider for TimeoutGenerator {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        temperature: f64,
    ) -> Result<Completion> {
        let call = self.inner.complete(messages, max_tokens, temperature);
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => bail!("generation timed out after {}s", self.limit.as_secs()),
        }
    }
}

/// Create the [`GenerationProvider`] selected by `[generation].provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(
            chat_completions_endpoint("https://openrouter.ai/api/v1"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_endpoint("http://localhost:8080/v1/"),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_endpoint("http://host/v1/chat/completions"),
            "http://host/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_openai_completion() {
        let json = serde_json::json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Chapter 2 covers ROS 2."},
                "finish_reason": "stop"
            }]
        });
        let completion = parse_openai_completion(&json).unwrap();
        assert_eq!(completion.text, "Chapter 2 covers ROS 2.");
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_openai_completion_no_choices() {
        let err = parse_openai_completion(&serde_json::json!({"choices": []})).unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    fn test_parse_ollama_completion() {
        let json = serde_json::json!({
            "message": {"role": "assistant", "content": "Gazebo simulates physics."},
            "done": true,
            "done_reason": "length"
        });
        let completion = parse_ollama_completion(&json).unwrap();
        assert_eq!(completion.text, "Gazebo simulates physics.");
        assert_eq!(completion.finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn test_messages_serialize_with_lowercase_roles() {
        let messages = [ChatMessage::system("s"), ChatMessage::user("u")];
        let body = serde_json::json!({ "messages": messages });
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "u");
    }

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert!(generator.complete(&[], 10, 0.0).await.is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = GenerationConfig {
            provider: "bard".to_string(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
