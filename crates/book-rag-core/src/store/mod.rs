//! Session persistence abstraction.
//!
//! The [`SessionRepository`] trait is the narrow persistence interface the
//! session façade depends on, enabling pluggable backends (SQLite,
//! in-memory). It performs raw reads and writes only; expiry and
//! fail-soft policy live in [`SessionStore`](crate::session_store::SessionStore).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::session::ConversationSession;

/// Raw session persistence.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](SessionRepository::insert) | Store a newly created session |
/// | [`fetch`](SessionRepository::fetch) | Load a session by id, active or not |
/// | [`save`](SessionRepository::save) | Write history and `updated_at` if the version matches |
/// | [`set_inactive`](SessionRepository::set_inactive) | Mark a session inactive |
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store a new session.
    async fn insert(&self, session: &ConversationSession) -> Result<()>;

    /// Load a session by id, regardless of its active flag.
    async fn fetch(&self, session_id: &str) -> Result<Option<ConversationSession>>;

    /// Persist `updated_at` and the full history.
    ///
    /// Only writes when the stored version equals `session.version`, and
    /// bumps the stored version on success. Returns `false` when the
    /// version did not match or the session does not exist.
    async fn save(&self, session: &ConversationSession) -> Result<bool>;

    /// Clear the active flag. Returns `false` if the session does not exist.
    async fn set_inactive(&self, session_id: &str) -> Result<bool>;
}
