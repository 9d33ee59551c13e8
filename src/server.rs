//! HTTP server.
//!
//! Exposes the chat pipeline as a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/chat` | Answer one question, resuming or creating a session |
//! | `GET`  | `/health` | Server version and vector store availability |
//!
//! # Error Contract
//!
//! Error responses share one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Query text cannot be empty" } }
//! ```
//!
//! The only error code is `bad_request` (400): malformed JSON or a query
//! that fails validation. Provider and storage failures never produce an
//! error response; the chat turn is answered with a fallback reply instead.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the book's web
//! frontend can call the API from another origin.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use book_rag_core::chat::{ChatError, ChatRequest, ChatService, ChatTurnResponse};

use crate::chat_cmd::build_chat_service;
use crate::config::Config;
use crate::db;
use crate::migrate;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    chat: ChatService,
}

/// Build the router around a ready [`ChatService`].
pub fn router(chat: ChatService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { chat })
}

/// Applies migrations, then serves on `[server].bind` until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let chat = build_chat_service(config, &pool)?;
    let app = router(chat);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("Book RAG server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    pool.close().await;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(e) => bad_request(e.to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"`, or `"degraded"` while the vector store is unreachable.
    status: String,
    vector_store: bool,
    version: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let available = state.chat.retriever().is_available().await;
    Json(HealthResponse {
        status: if available { "ok" } else { "degraded" }.to_string(),
        vector_store: available,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/v1/chat ============

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatTurnResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let turn = state.chat.handle_turn(request).await?;
    Ok(Json(turn))
}
