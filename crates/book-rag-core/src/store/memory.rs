//! In-memory [`SessionRepository`] implementation for tests and
//! single-process use.
//!
//! State is owned by the repository value itself; callers share it
//! through an `Arc`, never through a process-wide global.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::SessionRepository;
use crate::session::ConversationSession;

/// Session repository backed by a `HashMap` behind a `RwLock`.
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, ConversationSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, active or not.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("session repository lock poisoned")
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: &ConversationSession) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<ConversationSession>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn save(&self, session: &ConversationSession) -> Result<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        match sessions.get_mut(&session.session_id) {
            Some(stored) if stored.version == session.version => {
                let mut updated = session.clone();
                updated.is_active = stored.is_active;
                updated.version = stored.version + 1;
                *stored = updated;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_inactive(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        match sessions.get_mut(session_id) {
            Some(stored) => {
                stored.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
