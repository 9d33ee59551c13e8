//! # Book RAG
//!
//! Retrieval-augmented question answering over a book's Markdown sources.
//!
//! Book RAG chunks a book into token-bounded passages, embeds them into a
//! SQLite-backed vector store, and answers questions with grounded,
//! cited responses while keeping per-conversation history.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Markdown   │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │  book/docs  │   │   (ingest)   │   │ chunks+vec│
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │
//!                   ┌────────────────────────┤
//!                   ▼                        ▼
//!            ┌─────────────┐          ┌─────────────┐
//!            │ ChatService │◀─────────│  sessions   │
//!            │ (core)      │─────────▶│  (SQLite)   │
//!            └──────┬──────┘          └─────────────┘
//!                   │
//!          ┌────────┴────────┐
//!          ▼                 ▼
//!     ┌─────────┐       ┌─────────┐
//!     │   CLI   │       │  HTTP   │
//!     │(bookrag)│       │  (axum) │
//!     └─────────┘       └─────────┘
//! ```
//!
//! The chunking, retrieval merging, context assembly and session logic
//! live in the I/O-free `book-rag-core` crate. This crate supplies the
//! SQLite, HTTP-provider and filesystem implementations of its traits.
//!
//! ## Quick Start
//!
//! ```bash
//! bookrag init                          # create database
//! bookrag ingest                        # chunk + embed the book
//! bookrag retrieve "what is a ROS 2 node?"
//! bookrag ask "what is a ROS 2 node?"   # one chat turn, JSON output
//! bookrag serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite session repository and vector store |
//! | [`embedding`] | OpenAI / Ollama embedding providers |
//! | [`generation`] | OpenAI / Ollama chat-completion providers |
//! | [`tokenizer`] | Token counter selection |
//! | [`ingest`] | Book ingestion pipeline |
//! | [`retrieve_cmd`] | Retrieval inspection command |
//! | [`chat_cmd`] | Chat service wiring, `ask` and `session` commands |
//! | [`server`] | HTTP server |
//! | [`logging`] | Log subscriber setup |

pub mod chat_cmd;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod retrieve_cmd;
pub mod server;
pub mod sqlite_store;
pub mod tokenizer;
