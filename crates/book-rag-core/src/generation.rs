//! Answer generation.
//!
//! Defines the [`GenerationProvider`] trait implemented by chat-completion
//! backends, builds the message list for a turn, and holds the canned
//! replies used when no grounded answer can be produced.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

/// Reply used when the generation provider fails or returns unusable text.
pub const APOLOGY_MESSAGE: &str =
    "I'm sorry, but I encountered an error while processing your request. Please try again later.";

/// Query text reported in the fallback reply when the vector store is down.
pub const UNAVAILABLE_MESSAGE: &str =
    "The system is currently experiencing issues retrieving content from the textbook. Please try again later.";

/// Longest query excerpt quoted back in [`fallback_message`], in characters.
const FALLBACK_QUOTE_CHARS: usize = 200;

/// Text returned by a provider for one completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Provider-reported stop reason (`"stop"`, `"length"`, ...), if any.
    pub finish_reason: Option<String>,
}

/// A chat-completion backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        temperature: f64,
    ) -> Result<Completion>;
}

/// Settings for prompt construction.
#[derive(Debug, Clone)]
pub struct PromptSettings {
    /// How the corpus is named to the model, e.g. `"the textbook"`.
    pub assistant_name: String,
    pub max_response_tokens: usize,
    pub temperature: f64,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            assistant_name: "the textbook".to_string(),
            max_response_tokens: 500,
            temperature: 0.3,
        }
    }
}

/// System instructions restricting answers to the supplied context.
pub fn system_prompt(settings: &PromptSettings) -> String {
    format!(
        "You are an assistant for {name}. Answer questions using only the content \
         from {name} provided in the context, and cite the sections you rely on.\n\n\
         Guidelines:\n\
         - Only state information that appears in the provided context.\n\
         - If the context does not answer the question, say that the topic is not covered.\n\
         - Cite sources as [Source: file_path, Section: section_title].\n\
         - Keep the answer concise, under {limit} tokens.\n\
         - When selected text is provided, give it priority.",
        name = settings.assistant_name,
        limit = settings.max_response_tokens,
    )
}

/// Assemble the messages for one turn: system prompt, prior turns, then
/// the user's question with the selected passage and retrieved context.
pub fn build_messages(
    settings: &PromptSettings,
    history: Vec<ChatMessage>,
    query: &str,
    selected_text: Option<&str>,
    context: &str,
) -> Vec<ChatMessage> {
    let mut user = format!("Question: {}\n\n", query);
    if let Some(selected) = selected_text.filter(|s| !s.trim().is_empty()) {
        user.push_str(&format!("Selected text for reference: '{}'\n\n", selected));
    }
    if context.trim().is_empty() {
        user.push_str("No relevant content was found for this question.");
    } else {
        user.push_str("Relevant content:\n");
        user.push_str(context);
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt(settings)));
    messages.extend(history);
    messages.push(ChatMessage::user(user));
    messages
}

/// Reply used when retrieval finds nothing relevant.
///
/// Long queries are shortened so the reply stays within response limits.
pub fn fallback_message(query: &str) -> String {
    let quoted: String = if query.chars().count() > FALLBACK_QUOTE_CHARS {
        let head: String = query.chars().take(FALLBACK_QUOTE_CHARS).collect();
        format!("{}...", head.trim_end())
    } else {
        query.to_string()
    };
    format!(
        "I couldn't find relevant content in the textbook to answer your question: '{}'. \
         This topic may not be covered in the book, or the content may not be indexed yet. \
         Please try rephrasing your question or check other sections of the book.",
        quoted
    )
}
