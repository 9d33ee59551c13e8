//! Core data models used throughout Book RAG.
//!
//! These types represent the chunks, retrieval results, citations, and
//! conversational records that flow through ingestion and query time.
//! Records carrying invariants (queries, responses) are built through
//! constructors that validate them; records read back from storage are
//! deserialized as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::tokenizer::Tokenizer;

/// Minimum response length in characters.
pub const MIN_RESPONSE_CHARS: usize = 10;
/// Maximum response length in characters.
pub const MAX_RESPONSE_CHARS: usize = 2000;

/// A bounded excerpt of a source document, sized for embedding.
///
/// Immutable once created. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    /// Document path relative to the ingestion root.
    pub source_path: String,
    pub section_title: String,
    /// Zero-based position of the chunk within its document.
    pub position: i64,
    pub token_count: i64,
    /// SHA-256 of `content`.
    pub hash: String,
}

/// A chunk returned by a similarity search, with its score.
///
/// Produced per query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub content: String,
    pub source_path: String,
    pub section_title: String,
    pub position: i64,
    pub token_count: i64,
    /// Cosine similarity in `[0, 1]`.
    pub similarity_score: f64,
}

/// Pointer from a response back to the chunk that grounded it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(rename = "file_path")]
    pub source_path: String,
    #[serde(rename = "section")]
    pub section_title: String,
    pub relevance_score: f64,
}

impl Citation {
    /// Build a citation, clamping the score into `[0, 1]`.
    pub fn new(source_path: &str, section_title: &str, relevance_score: f64) -> Self {
        let relevance_score = if relevance_score.is_nan() {
            0.0
        } else {
            relevance_score.clamp(0.0, 1.0)
        };
        Self {
            source_path: source_path.to_string(),
            section_title: section_title.to_string(),
            relevance_score,
        }
    }
}

impl From<&RetrievedChunk> for Citation {
    fn from(chunk: &RetrievedChunk) -> Self {
        Citation::new(&chunk.source_path, &chunk.section_title, chunk.similarity_score)
    }
}

/// Token limits applied to queries and responses.
#[derive(Debug, Clone, Copy)]
pub struct TokenLimits {
    pub max_query_tokens: usize,
    pub max_selected_text_tokens: usize,
    pub max_response_tokens: usize,
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self {
            max_query_tokens: 2000,
            max_selected_text_tokens: 5000,
            max_response_tokens: 500,
        }
    }
}

/// A user question, optionally accompanied by a passage they selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub selected_text: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Query {
    /// Validate and build a query.
    ///
    /// The query text is trimmed and must be non-empty and within
    /// `max_query_tokens`. Blank selected text is treated as absent;
    /// otherwise it must fit within `max_selected_text_tokens`.
    pub fn new(
        text: &str,
        selected_text: Option<&str>,
        session_id: Option<String>,
        limits: &TokenLimits,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Self, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let tokens = tokenizer.count(text);
        if tokens > limits.max_query_tokens {
            return Err(ValidationError::QueryTooLong {
                limit: limits.max_query_tokens,
                actual: tokens,
            });
        }

        let selected_text = match selected_text {
            Some(s) if !s.trim().is_empty() => {
                let tokens = tokenizer.count(s);
                if tokens > limits.max_selected_text_tokens {
                    return Err(ValidationError::SelectedTextTooLong {
                        limit: limits.max_selected_text_tokens,
                        actual: tokens,
                    });
                }
                Some(s.to_string())
            }
            _ => None,
        };

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            selected_text,
            session_id,
            timestamp: Utc::now(),
        })
    }
}

/// A generated (or fallback) answer to a [`Query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub query_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub token_count: usize,
    #[serde(default)]
    pub retrieved_chunk_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Response {
    /// Validate and build a response.
    ///
    /// Content must be 10–2000 characters and encode to at most
    /// `max_tokens` tokens.
    pub fn new(
        content: &str,
        citations: Vec<Citation>,
        query_id: &str,
        session_id: Option<String>,
        retrieved_chunk_ids: Vec<String>,
        max_tokens: usize,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Self, ValidationError> {
        let chars = content.chars().count();
        if !(MIN_RESPONSE_CHARS..=MAX_RESPONSE_CHARS).contains(&chars) {
            return Err(ValidationError::ResponseLength {
                min: MIN_RESPONSE_CHARS,
                max: MAX_RESPONSE_CHARS,
                actual: chars,
            });
        }
        let token_count = tokenizer.count(content);
        if token_count > max_tokens {
            return Err(ValidationError::ResponseTooLong {
                limit: max_tokens,
                actual: token_count,
            });
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            citations,
            query_id: query_id.to_string(),
            session_id,
            token_count,
            retrieved_chunk_ids,
            timestamp: Utc::now(),
        })
    }

    /// Build a citation-free response around fixed reply text (apology
    /// or fallback). The text is not length-checked.
    pub fn canned(
        content: &str,
        query_id: &str,
        session_id: Option<String>,
        tokenizer: &dyn Tokenizer,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            citations: Vec::new(),
            query_id: query_id.to_string(),
            session_id,
            token_count: tokenizer.count(content),
            retrieved_chunk_ids: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// One query/response exchange stored in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistoryItem {
    pub query: Query,
    pub response: Response,
    pub timestamp: DateTime<Utc>,
}

/// Speaker of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message sent to a generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
