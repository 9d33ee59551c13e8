//! Configuration parsing and validation.
//!
//! Book RAG is configured via a TOML file (default: `config/bookrag.toml`).
//! Only `[db]` is required; every other section falls back to the values
//! shown below.
//!
//! # Example Configuration
//!
//! ```toml
//! [db]
//! path = "./data/bookrag.sqlite"
//!
//! [chunking]
//! min_tokens = 200
//! max_tokens = 250
//! overlap_tokens = 40
//!
//! [retrieval]
//! top_k = 5
//! score_threshold = 0.3
//! selected_text_threshold_factor = 0.8
//!
//! [limits]
//! max_query_tokens = 2000
//! max_selected_text_tokens = 5000
//! max_response_tokens = 500
//!
//! [session]
//! timeout_hours = 24
//! context_turns = 10
//!
//! [embedding]
//! provider = "openai"          # "disabled" | "openai" | "ollama"
//! model = "text-embedding-3-large"
//! dims = 3072
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! url = "https://openrouter.ai/api/v1"
//!
//! [ingest]
//! root = "./book/docs"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```
//!
//! # Validation
//!
//! [`load_config`] rejects out-of-range values up front (zero token
//! budgets, thresholds outside `[0, 1]`, unknown provider names, enabled
//! providers without a model) so that misconfiguration surfaces before
//! any work starts.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use book_rag_core::chat::ChatSettings;
use book_rag_core::chunk::ChunkParams;
use book_rag_core::generation::PromptSettings;
use book_rag_core::models::TokenLimits;
use book_rag_core::retrieval::RetrievalParams;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// SQLite file holding sessions, documents, chunks and vectors.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_min_tokens() -> usize {
    200
}
fn default_max_tokens() -> usize {
    250
}
fn default_overlap() -> usize {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_selected_factor")]
    pub selected_text_threshold_factor: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            selected_text_threshold_factor: default_selected_factor(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f64 {
    0.3
}
fn default_selected_factor() -> f64 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_query_tokens")]
    pub max_query_tokens: usize,
    #[serde(default = "default_max_selected_tokens")]
    pub max_selected_text_tokens: usize,
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_query_tokens: default_max_query_tokens(),
            max_selected_text_tokens: default_max_selected_tokens(),
            max_response_tokens: default_max_response_tokens(),
        }
    }
}

fn default_max_query_tokens() -> usize {
    2000
}
fn default_max_selected_tokens() -> usize {
    5000
}
fn default_max_response_tokens() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_timeout_hours")]
    pub timeout_hours: i64,
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
    #[serde(default = "default_max_save_retries")]
    pub max_save_retries: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_hours: default_timeout_hours(),
            context_turns: default_context_turns(),
            max_save_retries: default_max_save_retries(),
        }
    }
}

fn default_timeout_hours() -> i64 {
    24
}
fn default_context_turns() -> usize {
    10
}
fn default_max_save_retries() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL. Defaults to the OpenAI API for `openai` and
    /// `http://localhost:11434` for `ollama`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    /// How the corpus is named in the system prompt.
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            assistant_name: default_assistant_name(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f64 {
    0.3
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    2
}
fn default_assistant_name() -> String {
    "the textbook".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TokenizerConfig {
    /// Path to a HuggingFace `tokenizer.json`. Character-based
    /// approximation is used when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.mdx".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    pub fn chunk_params(&self) -> ChunkParams {
        ChunkParams {
            min_tokens: self.chunking.min_tokens,
            max_tokens: self.chunking.max_tokens,
            overlap_tokens: self.chunking.overlap_tokens,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.retrieval.top_k,
            score_threshold: self.retrieval.score_threshold,
            selected_text_threshold_factor: self.retrieval.selected_text_threshold_factor,
        }
    }

    pub fn token_limits(&self) -> TokenLimits {
        TokenLimits {
            max_query_tokens: self.limits.max_query_tokens,
            max_selected_text_tokens: self.limits.max_selected_text_tokens,
            max_response_tokens: self.limits.max_response_tokens,
        }
    }

    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session.timeout_hours)
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            limits: self.token_limits(),
            prompt: PromptSettings {
                assistant_name: self.generation.assistant_name.clone(),
                max_response_tokens: self.limits.max_response_tokens,
                temperature: self.generation.temperature,
            },
            context_turns: self.session.context_turns,
            max_save_retries: self.session.max_save_retries,
        }
    }
}

/// Read the API key for OpenAI-compatible providers.
///
/// `OPENAI_API_KEY` takes precedence over `OPENROUTER_API_KEY`.
pub fn api_key() -> Option<String> {
    ["OPENAI_API_KEY", "OPENROUTER_API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|key| !key.trim().is_empty())
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let chunking = &config.chunking;
    if chunking.min_tokens == 0 || chunking.min_tokens > chunking.max_tokens {
        bail!("chunking.min_tokens must be > 0 and <= chunking.max_tokens");
    }
    if chunking.overlap_tokens >= chunking.max_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    let retrieval = &config.retrieval;
    if retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&retrieval.score_threshold) {
        bail!("retrieval.score_threshold must be in [0.0, 1.0]");
    }
    if !(retrieval.selected_text_threshold_factor > 0.0
        && retrieval.selected_text_threshold_factor <= 1.0)
    {
        bail!("retrieval.selected_text_threshold_factor must be in (0.0, 1.0]");
    }

    let limits = &config.limits;
    if limits.max_query_tokens == 0
        || limits.max_selected_text_tokens == 0
        || limits.max_response_tokens == 0
    {
        bail!("limits must all be > 0");
    }

    let session = &config.session;
    if session.timeout_hours <= 0 {
        bail!("session.timeout_hours must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
