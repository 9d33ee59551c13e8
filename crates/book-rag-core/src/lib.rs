//! # Book RAG Core
//!
//! Shared, I/O-free logic for Book RAG: data models, token-bounded
//! chunking, dual-query retrieval merging, context assembly, and
//! conversation session state.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Every external system (tokenizer, embedding provider, vector store,
//! generation provider, session persistence) is reached through a trait
//! so the application crate and tests can plug in their own backends.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Chunk, Citation, Query, Response, history records |
//! | [`tokenizer`] | Token counting abstraction |
//! | [`chunk`] | Recursive token-bounded text chunker |
//! | [`embedding`] | Embedding provider trait and vector utilities |
//! | [`vector_store`] | Vector store trait |
//! | [`retrieval`] | Query + selected-text retrieval merging |
//! | [`context`] | Context string and citation assembly |
//! | [`session`] | Conversation session state machine |
//! | [`store`] | Session persistence trait and in-memory backend |
//! | [`session_store`] | Session façade with lazy expiry |
//! | [`generation`] | Generation provider trait and prompt building |
//! | [`chat`] | Chat turn orchestration |

pub mod chat;
pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod retrieval;
pub mod session;
pub mod session_store;
pub mod store;
pub mod tokenizer;
pub mod vector_store;
