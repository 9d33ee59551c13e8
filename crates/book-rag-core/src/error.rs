//! Validation errors.
//!
//! These are the only failures that reach the caller of a chat turn.
//! Everything else (embedding, search, generation, persistence) degrades
//! to a fallback result instead of surfacing an error.

use thiserror::Error;

/// Input or record that violates a data-model invariant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Query text cannot be empty")]
    EmptyQuery,

    #[error("Query text exceeds maximum token limit of {limit} tokens. Current: {actual} tokens")]
    QueryTooLong { limit: usize, actual: usize },

    #[error("Selected text exceeds maximum token limit of {limit} tokens. Current: {actual} tokens")]
    SelectedTextTooLong { limit: usize, actual: usize },

    #[error("Response content must be between {min} and {max} characters, got {actual}")]
    ResponseLength {
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Response exceeds maximum token limit of {limit} tokens. Current: {actual} tokens")]
    ResponseTooLong { limit: usize, actual: usize },

    #[error("History must not exceed {limit} items, got {actual}")]
    HistoryTooLong { limit: usize, actual: usize },

    #[error("Invalid identifier for {field}: {value}")]
    InvalidId { field: &'static str, value: String },
}
