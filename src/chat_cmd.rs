//! Chat service wiring and the `ask` / `session` commands.
//!
//! [`build_chat_service`] assembles a [`ChatService`] from configuration:
//! SQLite for sessions and vectors, the configured embedding and
//! generation providers (each call bounded by its `timeout_secs`), and the
//! configured tokenizer. The CLI and the HTTP server share it.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use book_rag_core::chat::{ChatError, ChatRequest, ChatService};
use book_rag_core::models::SessionHistoryItem;
use book_rag_core::retrieval::Retriever;
use book_rag_core::session_store::SessionStore;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, TimeoutEmbedder};
use crate::generation::{create_generator, TimeoutGenerator};
use crate::sqlite_store::{SqliteSessionRepository, SqliteVectorStore};
use crate::tokenizer::load_tokenizer;

/// Build a [`Retriever`] over the SQLite vector store.
pub fn build_retriever(config: &Config, pool: &SqlitePool) -> Result<Retriever> {
    let embedder = create_provider(&config.embedding)?;
    let dims = embedder.dims();
    let embedder = Arc::new(TimeoutEmbedder::new(
        embedder,
        Duration::from_secs(config.embedding.timeout_secs),
    ));
    let store = Arc::new(SqliteVectorStore::new(pool.clone(), dims));
    Ok(Retriever::new(embedder, store, config.retrieval_params()))
}

/// Build the full chat pipeline over an open pool.
pub fn build_chat_service(config: &Config, pool: &SqlitePool) -> Result<ChatService> {
    let tokenizer = load_tokenizer(&config.tokenizer)?;
    let retriever = build_retriever(config, pool)?;
    let generator = Arc::new(TimeoutGenerator::new(
        create_generator(&config.generation)?,
        Duration::from_secs(config.generation.timeout_secs),
    ));
    let sessions = SessionStore::with_timeout(
        Arc::new(SqliteSessionRepository::new(pool.clone())),
        config.session_timeout(),
    );

    Ok(ChatService::new(
        tokenizer,
        retriever,
        generator,
        sessions,
        config.chat_settings(),
    ))
}

/// Run one chat turn and print the response as JSON.
pub async fn run_ask(
    config: &Config,
    query: &str,
    selected: Option<String>,
    session: Option<String>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let service = build_chat_service(config, &pool)?;

    let request = ChatRequest {
        query: query.to_string(),
        selected_text: selected,
        session_id: session,
    };

    let result = service.handle_turn(request).await;
    pool.close().await;

    match result {
        Ok(turn) => {
            println!("{}", serde_json::to_string_pretty(&turn)?);
            Ok(())
        }
        Err(ChatError::Validation(e)) => bail!("Invalid request: {}", e),
    }
}

/// Print a session's metadata and history.
pub async fn run_session_show(config: &Config, session_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let sessions = SessionStore::with_timeout(
        Arc::new(SqliteSessionRepository::new(pool.clone())),
        config.session_timeout(),
    );

    let session = match sessions.peek(session_id).await? {
        Some(s) => s,
        None => {
            pool.close().await;
            bail!("Session not found: {}", session_id);
        }
    };

    let state = if !session.is_active {
        "ended"
    } else if session.is_expired_at(chrono::Utc::now(), sessions.timeout()) {
        "expired"
    } else {
        "active"
    };

    println!("--- Session ---");
    println!("id:         {}", session.session_id);
    println!("state:      {}", state);
    println!("created_at: {}", session.created_at.to_rfc3339());
    println!("updated_at: {}", session.updated_at.to_rfc3339());
    if let Some(ref user) = session.user_id {
        println!("user:       {}", user);
    }
    println!();
    println!("--- History ({}) ---", session.history().len());
    for (i, item) in session.history().iter().enumerate() {
        print_exchange(i + 1, item);
    }

    pool.close().await;
    Ok(())
}

fn print_exchange(n: usize, item: &SessionHistoryItem) {
    println!("[{}] {}", n, item.timestamp.format("%Y-%m-%d %H:%M:%S"));
    println!("Q: {}", item.query.text);
    println!("A: {}", item.response.content);
    for citation in &item.response.citations {
        println!(
            "   - {} / {} [{:.2}]",
            citation.source_path, citation.section_title, citation.relevance_score
        );
    }
    println!();
}

/// Deactivate a session.
pub async fn run_session_end(config: &Config, session_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let sessions = SessionStore::new(Arc::new(SqliteSessionRepository::new(pool.clone())));
    let ended = sessions.deactivate(session_id).await;
    pool.close().await;

    if !ended {
        bail!("Session not found: {}", session_id);
    }
    println!("ended {}", session_id);
    Ok(())
}
