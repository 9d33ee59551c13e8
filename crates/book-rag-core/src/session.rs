//! Conversation session state.
//!
//! A session is **Active** from creation until it sits idle longer than
//! the configured timeout, at which point it becomes **Expired**. Expiry
//! is terminal and is evaluated lazily when the session is read (see
//! [`SessionStore::get`](crate::session_store::SessionStore::get)); there
//! is no background sweep.
//!
//! History is a FIFO window of at most [`MAX_HISTORY`] exchanges. Adding
//! an exchange to a full history evicts the oldest one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, Query, Response, SessionHistoryItem};

/// Maximum number of exchanges retained per session.
pub const MAX_HISTORY: usize = 50;

/// Default number of recent exchanges sent as conversational context.
pub const DEFAULT_CONTEXT_TURNS: usize = 10;

/// Default inactivity timeout.
pub fn default_timeout() -> Duration {
    Duration::hours(24)
}

/// Lifecycle state derived from `is_active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
}

/// Bounded, expiring conversational history keyed by `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    history: Vec<SessionHistoryItem>,
    /// Optimistic-concurrency version, bumped on every successful save.
    #[serde(default)]
    pub version: i64,
}

impl ConversationSession {
    /// Start a new, empty, active session.
    pub fn new(user_id: Option<String>) -> Self {
        Self::new_at(user_id, Utc::now())
    }

    pub fn new_at(user_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            is_active: true,
            user_id,
            history: Vec::new(),
            version: 0,
        }
    }

    /// Rebuild a session from persisted fields. History beyond
    /// [`MAX_HISTORY`] is trimmed from the front.
    pub fn from_parts(
        session_id: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        is_active: bool,
        user_id: Option<String>,
        mut history: Vec<SessionHistoryItem>,
        version: i64,
    ) -> Self {
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
        Self {
            session_id,
            created_at,
            updated_at,
            is_active,
            user_id,
            history,
            version,
        }
    }

    pub fn history(&self) -> &[SessionHistoryItem] {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        if self.is_active {
            SessionState::Active
        } else {
            SessionState::Expired
        }
    }

    /// Append an exchange, evicting the oldest when the window is full,
    /// and refresh `updated_at`.
    pub fn add_interaction(&mut self, query: Query, response: Response) {
        self.add_interaction_at(query, response, Utc::now());
    }

    pub fn add_interaction_at(&mut self, query: Query, response: Response, now: DateTime<Utc>) {
        while self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(SessionHistoryItem {
            query,
            response,
            timestamp: now,
        });
        self.updated_at = now;
    }

    /// True when the session has been idle for longer than `timeout`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.updated_at > timeout
    }

    /// Move to the terminal Expired state.
    pub fn expire(&mut self) {
        self.is_active = false;
    }

    /// The most recent `max_turns` exchanges as alternating user and
    /// assistant messages, oldest first.
    pub fn format_for_generation(&self, max_turns: usize) -> Vec<ChatMessage> {
        let start = self.history.len().saturating_sub(max_turns);
        self.history[start..]
            .iter()
            .flat_map(|item| {
                [
                    ChatMessage::user(item.query.text.clone()),
                    ChatMessage::assistant(item.response.content.clone()),
                ]
            })
            .collect()
    }
}
