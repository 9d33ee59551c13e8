//! Session façade with lazy expiry and fail-soft persistence.
//!
//! Wraps a [`SessionRepository`] with the policy the chat flow relies on:
//!
//! - [`get`](SessionStore::get) treats missing, inactive, and idle-too-long
//!   sessions alike as "not found", marking idle sessions inactive as a
//!   side effect.
//! - [`update`](SessionStore::update) never fails the caller; persistence
//!   errors are logged and reported through [`UpdateOutcome`].

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::session::{default_timeout, ConversationSession};
use crate::store::SessionRepository;

/// Result of [`SessionStore::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Saved,
    /// Another writer saved the session since it was read.
    Conflict,
    /// The session was idle past the timeout and has been deactivated.
    Expired,
    /// The backend reported an error.
    Failed,
}

/// Create/read/update/deactivate sessions with expiry semantics.
#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    timeout: Duration,
}

impl SessionStore {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self::with_timeout(repo, default_timeout())
    }

    pub fn with_timeout(repo: Arc<dyn SessionRepository>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate a new active session with an empty history.
    ///
    /// A failed insert is logged; the session is still returned so the
    /// current turn can complete.
    pub async fn create(&self, user_id: Option<String>) -> ConversationSession {
        let session = ConversationSession::new(user_id);
        match self.repo.insert(&session).await {
            Ok(()) => debug!(session_id = %session.session_id, "session created"),
            Err(e) => warn!(session_id = %session.session_id, error = %e, "failed to persist new session"),
        }
        session
    }

    /// Load an active session, expiring it first if it has been idle
    /// longer than the timeout.
    pub async fn get(&self, session_id: &str) -> Option<ConversationSession> {
        let session = match self.repo.fetch(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                warn!(session_id, error = %e, "failed to load session");
                return None;
            }
        };

        if !session.is_active {
            return None;
        }

        if session.is_expired_at(Utc::now(), self.timeout) {
            info!(session_id, "session expired");
            self.deactivate(session_id).await;
            return None;
        }

        Some(session)
    }

    /// Persist the session's `updated_at` and history.
    pub async fn update(&self, session: &ConversationSession) -> UpdateOutcome {
        if session.is_expired_at(Utc::now(), self.timeout) {
            self.deactivate(&session.session_id).await;
            return UpdateOutcome::Expired;
        }

        match self.repo.save(session).await {
            Ok(true) => UpdateOutcome::Saved,
            Ok(false) => {
                debug!(session_id = %session.session_id, version = session.version, "session version conflict");
                UpdateOutcome::Conflict
            }
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "failed to save session");
                UpdateOutcome::Failed
            }
        }
    }

    /// Mark a session inactive. Returns `false` if it does not exist or
    /// the backend failed.
    pub async fn deactivate(&self, session_id: &str) -> bool {
        match self.repo.set_inactive(session_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(session_id, error = %e, "failed to deactivate session");
                false
            }
        }
    }

    /// Load a session without applying expiry, for inspection.
    pub async fn peek(&self, session_id: &str) -> anyhow::Result<Option<ConversationSession>> {
        self.repo.fetch(session_id).await
    }
}
