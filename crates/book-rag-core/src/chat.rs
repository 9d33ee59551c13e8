//! Chat turn orchestration.
//!
//! [`ChatService::handle_turn`] runs one question through the whole
//! pipeline:
//!
//! ```text
//! validate ─▶ resolve session ─▶ health probe ─▶ retrieve ─▶ assemble
//!                                     │                          │
//!                                     ▼                          ▼
//!                               fallback reply        fallback or generate
//!                                     │                          │
//!                                     └────────▶ record ◀────────┘
//! ```
//!
//! Only input validation can fail a turn. Retrieval, generation and
//! persistence problems are logged and answered with a canned reply, and
//! the resolved `session_id` is always echoed back so the caller can
//! continue the conversation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::{assemble, AssembledContext};
use crate::error::ValidationError;
use crate::generation::{
    build_messages, fallback_message, GenerationProvider, PromptSettings, APOLOGY_MESSAGE,
    UNAVAILABLE_MESSAGE,
};
use crate::models::{Citation, Query, Response, TokenLimits};
use crate::retrieval::Retriever;
use crate::session::{ConversationSession, DEFAULT_CONTEXT_TURNS};
use crate::session_store::{SessionStore, UpdateOutcome};
use crate::tokenizer::Tokenizer;

/// Error returned by [`ChatService::handle_turn`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// One incoming chat turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub selected_text: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// The answer to one chat turn, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurnResponse {
    pub response: String,
    pub session_id: String,
    pub citations: Vec<Citation>,
    pub query_id: String,
    pub response_id: String,
    pub token_count: usize,
    /// Number of chunks retrieved for this turn.
    pub retrieved_chunks: usize,
}

/// Tunables for [`ChatService`].
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub limits: TokenLimits,
    pub prompt: PromptSettings,
    /// Prior exchanges included as conversational context.
    pub context_turns: usize,
    /// Re-read-and-append attempts after a session version conflict.
    pub max_save_retries: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            limits: TokenLimits::default(),
            prompt: PromptSettings::default(),
            context_turns: DEFAULT_CONTEXT_TURNS,
            max_save_retries: 3,
        }
    }
}

/// Request-independent chat pipeline. Cheap to clone; all collaborators
/// are shared handles.
#[derive(Clone)]
pub struct ChatService {
    tokenizer: Arc<dyn Tokenizer>,
    retriever: Retriever,
    generator: Arc<dyn GenerationProvider>,
    sessions: SessionStore,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        retriever: Retriever,
        generator: Arc<dyn GenerationProvider>,
        sessions: SessionStore,
        settings: ChatSettings,
    ) -> Self {
        Self {
            tokenizer,
            retriever,
            generator,
            sessions,
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Answer one question, resuming or creating a session.
    pub async fn handle_turn(&self, request: ChatRequest) -> Result<ChatTurnResponse, ChatError> {
        let mut query = Query::new(
            &request.query,
            request.selected_text.as_deref(),
            None,
            &self.settings.limits,
            self.tokenizer.as_ref(),
        )?;

        let session = self.resolve_session(request.session_id.as_deref()).await;
        let session_id = session.session_id.clone();
        query.session_id = Some(session_id.clone());

        let (response, retrieved_chunks) = if self.retriever.is_available().await {
            self.answer(&query, &session).await
        } else {
            warn!(session_id = %session_id, "vector store unavailable; returning fallback");
            let content = fallback_message(UNAVAILABLE_MESSAGE);
            (self.canned(&content, &query), 0)
        };

        let turn = ChatTurnResponse {
            response: response.content.clone(),
            session_id: session_id.clone(),
            citations: response.citations.clone(),
            query_id: query.id.clone(),
            response_id: response.id.clone(),
            token_count: response.token_count,
            retrieved_chunks,
        };

        self.record(session, query, response).await;
        info!(
            session_id = %session_id,
            tokens = turn.token_count,
            chunks = turn.retrieved_chunks,
            "chat turn complete"
        );
        Ok(turn)
    }

    async fn resolve_session(&self, requested: Option<&str>) -> ConversationSession {
        if let Some(id) = requested.map(str::trim).filter(|id| !id.is_empty()) {
            if let Some(session) = self.sessions.get(id).await {
                return session;
            }
            info!(session_id = id, "session not found or expired; starting a new one");
        }
        self.sessions.create(None).await
    }

    /// Retrieve, then either generate or fall back. Returns the response
    /// and the number of retrieved chunks.
    async fn answer(&self, query: &Query, session: &ConversationSession) -> (Response, usize) {
        let selected = query.selected_text.as_deref();
        let retrieved = self.retriever.retrieve(&query.text, selected).await;
        let assembled = assemble(&retrieved);
        let chunk_ids: Vec<String> = retrieved.iter().map(|c| c.id.clone()).collect();
        let count = retrieved.len();

        if assembled.is_empty() {
            debug!(query_id = %query.id, "no relevant content; returning fallback");
            let content = fallback_message(&query.text);
            return (self.canned(&content, query), count);
        }

        let response = self.generate(query, session, assembled, chunk_ids).await;
        (response, count)
    }

    async fn generate(
        &self,
        query: &Query,
        session: &ConversationSession,
        assembled: AssembledContext,
        chunk_ids: Vec<String>,
    ) -> Response {
        let prompt = &self.settings.prompt;
        let messages = build_messages(
            prompt,
            session.format_for_generation(self.settings.context_turns),
            &query.text,
            query.selected_text.as_deref(),
            &assembled.context,
        );

        let completion = match self
            .generator
            .complete(&messages, prompt.max_response_tokens, prompt.temperature)
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                warn!(query_id = %query.id, error = %e, "generation failed; returning apology");
                return self.apology(query, chunk_ids);
            }
        };

        match Response::new(
            completion.text.trim(),
            assembled.citations,
            &query.id,
            query.session_id.clone(),
            chunk_ids.clone(),
            self.settings.limits.max_response_tokens,
            self.tokenizer.as_ref(),
        ) {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    query_id = %query.id,
                    finish_reason = completion.finish_reason.as_deref().unwrap_or("unknown"),
                    error = %e,
                    "generated text rejected; returning apology"
                );
                self.apology(query, chunk_ids)
            }
        }
    }

    fn canned(&self, content: &str, query: &Query) -> Response {
        Response::canned(content, &query.id, query.session_id.clone(), self.tokenizer.as_ref())
    }

    fn apology(&self, query: &Query, chunk_ids: Vec<String>) -> Response {
        let mut response = self.canned(APOLOGY_MESSAGE, query);
        response.retrieved_chunk_ids = chunk_ids;
        response
    }

    /// Append the exchange and persist it, re-reading and re-appending
    /// on version conflicts. Never fails the turn.
    async fn record(&self, mut session: ConversationSession, query: Query, response: Response) {
        session.add_interaction(query.clone(), response.clone());
        let session_id = session.session_id.clone();

        let mut attempt = 0;
        loop {
            match self.sessions.update(&session).await {
                UpdateOutcome::Saved => return,
                UpdateOutcome::Conflict if attempt < self.settings.max_save_retries => {
                    attempt += 1;
                    match self.sessions.get(&session_id).await {
                        Some(mut fresh) => {
                            fresh.add_interaction(query.clone(), response.clone());
                            session = fresh;
                        }
                        None => {
                            warn!(
                                session_id = %session_id,
                                "session vanished during save; interaction not recorded"
                            );
                            return;
                        }
                    }
                }
                outcome => {
                    warn!(session_id = %session_id, ?outcome, "interaction not recorded");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::generation::Completion;
    use crate::models::{ChatMessage, Role};
    use crate::retrieval::RetrievalParams;
    use crate::store::memory::InMemorySessionRepository;
    use crate::store::SessionRepository;
    use crate::tokenizer::ApproxTokenizer;
    use crate::vector_store::{ChunkPayload, CollectionInfo, ScoredPoint, VectorPoint, VectorStore};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use futures::executor::block_on;
    use std::sync::Mutex;

    struct ConstEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ConstEmbedder {
        fn model_name(&self) -> &str {
            "const"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct FixedStore {
        hits: Vec<ScoredPoint>,
        healthy: bool,
    }

    #[async_trait]
    impl VectorStore for FixedStore {
        async fn upsert(&self, _points: &[VectorPoint]) -> Result<bool> {
            Ok(true)
        }
        async fn search(&self, _v: &[f32], top_k: usize, threshold: f64) -> Result<Vec<ScoredPoint>> {
            Ok(self
                .hits
                .iter()
                .filter(|h| h.score >= threshold)
                .take(top_k)
                .cloned()
                .collect())
        }
        async fn health(&self) -> Result<Option<CollectionInfo>> {
            if !self.healthy {
                return Ok(None);
            }
            Ok(Some(CollectionInfo {
                name: "chunks".to_string(),
                points_count: self.hits.len() as u64,
                vector_size: 2,
            }))
        }
    }

    enum Reply {
        Text(&'static str),
        Fail,
    }

    struct ScriptedGenerator {
        reply: Reply,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedGenerator {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[ChatMessage], _max: usize, _t: f64) -> Result<Completion> {
            self.calls.lock().unwrap().push(messages.to_vec());
            match self.reply {
                Reply::Text(text) => Ok(Completion {
                    text: text.to_string(),
                    finish_reason: Some("stop".to_string()),
                }),
                Reply::Fail => bail!("503 Service Unavailable"),
            }
        }
    }

    fn hit(id: &str, score: f64) -> ScoredPoint {
        ScoredPoint {
            id: id.to_string(),
            payload: ChunkPayload {
                content: format!("Content of {}.", id),
                source_path: format!("docs/{}.md", id),
                section_title: format!("Section {}", id),
                position: 0,
                token_count: 4,
                hash: String::new(),
            },
            score,
        }
    }

    struct Fixture {
        service: ChatService,
        generator: Arc<ScriptedGenerator>,
        repo: Arc<InMemorySessionRepository>,
    }

    fn fixture(hits: Vec<ScoredPoint>, healthy: bool, reply: Reply) -> Fixture {
        let generator = ScriptedGenerator::new(reply);
        let repo = Arc::new(InMemorySessionRepository::new());
        let retriever = Retriever::new(
            Arc::new(ConstEmbedder),
            Arc::new(FixedStore { hits, healthy }),
            RetrievalParams::default(),
        );
        let service = ChatService::new(
            Arc::new(ApproxTokenizer),
            retriever,
            generator.clone(),
            SessionStore::new(repo.clone()),
            ChatSettings::default(),
        );
        Fixture {
            service,
            generator,
            repo,
        }
    }

    fn ask(query: &str, session_id: Option<&str>) -> ChatRequest {
        ChatRequest {
            query: query.to_string(),
            selected_text: None,
            session_id: session_id.map(str::to_string),
        }
    }

    const ANSWER: &str = "A servo is a closed-loop actuator. [Source: docs/a.md, Section: Section a]";

    #[test]
    fn test_grounded_answer_with_citations() {
        let f = fixture(vec![hit("a", 0.8), hit("b", 0.5)], true, Reply::Text(ANSWER));
        let turn = block_on(f.service.handle_turn(ask("What is a servo?", None))).unwrap();

        assert_eq!(turn.response, ANSWER);
        assert_eq!(turn.retrieved_chunks, 2);
        assert_eq!(turn.citations.len(), 2);
        assert_eq!(turn.citations[0].source_path, "docs/a.md");
        assert_eq!(turn.token_count, ApproxTokenizer.count(ANSWER));
        assert_eq!(f.generator.call_count(), 1);

        let stored = block_on(f.repo.fetch(&turn.session_id)).unwrap().unwrap();
        assert_eq!(stored.history().len(), 1);
        assert_eq!(stored.history()[0].response.id, turn.response_id);
        assert_eq!(stored.history()[0].query.id, turn.query_id);
    }

    #[test]
    fn test_validation_error_before_any_call() {
        let f = fixture(vec![hit("a", 0.8)], true, Reply::Text(ANSWER));
        let err = block_on(f.service.handle_turn(ask("   ", None))).unwrap_err();
        assert_eq!(err, ChatError::Validation(ValidationError::EmptyQuery));
        assert!(f.repo.is_empty());
        assert_eq!(f.generator.call_count(), 0);
    }

    #[test]
    fn test_empty_retrieval_uses_fallback_without_generation() {
        let f = fixture(vec![hit("a", 0.1)], true, Reply::Text(ANSWER));
        let turn = block_on(f.service.handle_turn(ask("What is ZMP?", None))).unwrap();
        assert!(turn.response.contains("'What is ZMP?'"));
        assert!(turn.citations.is_empty());
        assert_eq!(turn.retrieved_chunks, 0);
        assert_eq!(f.generator.call_count(), 0);
    }

    #[test]
    fn test_unhealthy_store_returns_unavailable_fallback() {
        let f = fixture(vec![hit("a", 0.8)], false, Reply::Text(ANSWER));
        let turn = block_on(f.service.handle_turn(ask("What is a servo?", None))).unwrap();
        assert!(turn.response.contains(UNAVAILABLE_MESSAGE));
        assert!(turn.citations.is_empty());
        assert_eq!(f.generator.call_count(), 0);
        // The exchange is still recorded.
        let stored = block_on(f.repo.fetch(&turn.session_id)).unwrap().unwrap();
        assert_eq!(stored.history().len(), 1);
    }

    #[test]
    fn test_generation_failure_returns_apology() {
        let f = fixture(vec![hit("a", 0.8)], true, Reply::Fail);
        let turn = block_on(f.service.handle_turn(ask("What is a servo?", None))).unwrap();
        assert_eq!(turn.response, APOLOGY_MESSAGE);
        assert!(turn.citations.is_empty());
        assert_eq!(turn.retrieved_chunks, 1);
    }

    #[test]
    fn test_unusable_generation_returns_apology() {
        let f = fixture(vec![hit("a", 0.8)], true, Reply::Text("   ok  "));
        let turn = block_on(f.service.handle_turn(ask("What is a servo?", None))).unwrap();
        assert_eq!(turn.response, APOLOGY_MESSAGE);
        assert!(turn.citations.is_empty());
    }

    #[test]
    fn test_session_resumed_and_history_sent() {
        let f = fixture(vec![hit("a", 0.8)], true, Reply::Text(ANSWER));
        let first = block_on(f.service.handle_turn(ask("What is a servo?", None))).unwrap();
        let second =
            block_on(f.service.handle_turn(ask("And a stepper?", Some(&first.session_id)))).unwrap();

        assert_eq!(second.session_id, first.session_id);
        let calls = f.generator.calls.lock().unwrap();
        let messages = &calls[1];
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "What is a servo?");
        assert_eq!(messages[2].content, ANSWER);
        drop(calls);

        let stored = block_on(f.repo.fetch(&first.session_id)).unwrap().unwrap();
        assert_eq!(stored.history().len(), 2);
    }

    #[test]
    fn test_unknown_session_replaced() {
        let f = fixture(vec![hit("a", 0.8)], true, Reply::Text(ANSWER));
        let turn = block_on(f.service.handle_turn(ask("What is a servo?", Some("nope")))).unwrap();
        assert_ne!(turn.session_id, "nope");
        assert!(block_on(f.repo.fetch(&turn.session_id)).unwrap().is_some());
    }

    #[test]
    fn test_expired_session_replaced_and_deactivated() {
        let f = fixture(vec![hit("a", 0.8)], true, Reply::Text(ANSWER));
        let stale = ConversationSession::new_at(None, Utc::now() - Duration::hours(48));
        block_on(f.repo.insert(&stale)).unwrap();

        let turn =
            block_on(f.service.handle_turn(ask("What is a servo?", Some(&stale.session_id)))).unwrap();
        assert_ne!(turn.session_id, stale.session_id);
        let old = block_on(f.repo.fetch(&stale.session_id)).unwrap().unwrap();
        assert!(!old.is_active);
        assert!(old.history().is_empty());
    }

    #[test]
    fn test_conflicting_writer_does_not_drop_interaction() {
        let f = fixture(vec![hit("a", 0.8)], true, Reply::Text(ANSWER));
        let first = block_on(f.service.handle_turn(ask("What is a servo?", None))).unwrap();

        // A concurrent writer saves between our read and our write.
        let mut other = block_on(f.repo.fetch(&first.session_id)).unwrap().unwrap();
        let service = f.service.clone();
        let session = block_on(service.sessions().get(&first.session_id)).unwrap();
        let (q, r) = {
            let h = &other.history()[0];
            (h.query.clone(), h.response.clone())
        };
        other.add_interaction(q, r);
        assert!(block_on(f.repo.save(&other)).unwrap());

        let query = Query::new(
            "Second?",
            None,
            Some(first.session_id.clone()),
            &TokenLimits::default(),
            &ApproxTokenizer,
        )
        .unwrap();
        let response = Response::canned(APOLOGY_MESSAGE, &query.id, None, &ApproxTokenizer);
        block_on(service.record(session, query.clone(), response));

        let stored = block_on(f.repo.fetch(&first.session_id)).unwrap().unwrap();
        assert_eq!(stored.history().len(), 3);
        assert_eq!(stored.history()[2].query.id, query.id);
    }
}
