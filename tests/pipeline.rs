//! End-to-end pipeline tests over SQLite with scripted providers:
//! ingest a small book, then answer questions against it.

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use book_rag::config::IngestConfig;
use book_rag::ingest::{ingest_documents, scan_documents};
use book_rag::sqlite_store::{SqliteSessionRepository, SqliteVectorStore};
use book_rag::{db, migrate};
use book_rag_core::chat::{ChatRequest, ChatService, ChatSettings};
use book_rag_core::chunk::ChunkParams;
use book_rag_core::embedding::EmbeddingProvider;
use book_rag_core::generation::{Completion, GenerationProvider};
use book_rag_core::models::{ChatMessage, Role};
use book_rag_core::retrieval::{RetrievalParams, Retriever};
use book_rag_core::session_store::SessionStore;
use book_rag_core::tokenizer::ApproxTokenizer;

const TOPICS: [&str; 3] = ["node", "gazebo", "urdf"];

/// Embeds text as keyword presence over [`TOPICS`]. Text mentioning none
/// of them embeds to the zero vector, which matches nothing.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        TOPICS.len()
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                TOPICS
                    .iter()
                    .map(|t| if lower.contains(t) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect())
    }
}

#[derive(Default)]
struct RecordingGenerator {
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl GenerationProvider for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _max_tokens: usize,
        _temperature: f64,
    ) -> Result<Completion> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(messages.to_vec());
        Ok(Completion {
            text: format!("Grounded answer number {}.", calls.len()),
            finish_reason: Some("stop".to_string()),
        })
    }
}

fn write_book(root: &Path) {
    let docs = root.join("docs");
    fs::create_dir_all(docs.join("module-1")).unwrap();
    fs::create_dir_all(docs.join("module-2")).unwrap();
    fs::write(
        docs.join("module-1/nodes.md"),
        "# ROS 2 Nodes\n\nA node is a process that performs computation in ROS 2.",
    )
    .unwrap();
    fs::write(
        docs.join("module-2/gazebo.md"),
        "# Simulation\n\nGazebo simulates physics, sensors and worlds.",
    )
    .unwrap();
    fs::write(
        docs.join("module-2/urdf.md"),
        "# Robot Description\n\nURDF describes links and joints of a robot.",
    )
    .unwrap();
}

struct Harness {
    _tmp: TempDir,
    service: ChatService,
    generator: Arc<RecordingGenerator>,
    store: SqliteVectorStore,
}

async fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    write_book(tmp.path());

    let pool = db::connect_path(&tmp.path().join("data/book.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();

    let store = SqliteVectorStore::new(pool.clone(), TOPICS.len());
    let ingest = IngestConfig {
        root: tmp.path().join("docs"),
        include_globs: vec!["**/*.md".to_string()],
        exclude_globs: Vec::new(),
        follow_symlinks: false,
    };
    let documents = scan_documents(&ingest).unwrap();
    let params = ChunkParams {
        min_tokens: 1,
        max_tokens: 250,
        overlap_tokens: 40,
    };
    let summary = ingest_documents(
        &store,
        &KeywordEmbedder,
        &ApproxTokenizer,
        &documents,
        &params,
        16,
        false,
    )
    .await
    .unwrap();
    assert_eq!(summary.files, 3);
    assert_eq!(summary.failed, 0);

    let generator = Arc::new(RecordingGenerator::default());
    let retriever = Retriever::new(
        Arc::new(KeywordEmbedder),
        Arc::new(store.clone()),
        RetrievalParams::default(),
    );
    let service = ChatService::new(
        Arc::new(ApproxTokenizer),
        retriever,
        generator.clone(),
        SessionStore::new(Arc::new(SqliteSessionRepository::new(pool))),
        ChatSettings::default(),
    );

    Harness {
        _tmp: tmp,
        service,
        generator,
        store,
    }
}

fn request(query: &str) -> ChatRequest {
    ChatRequest {
        query: query.to_string(),
        ..ChatRequest::default()
    }
}

#[tokio::test]
async fn test_answer_cites_matching_section() {
    let h = harness().await;

    let turn = h
        .service
        .handle_turn(request("What is a ROS 2 node?"))
        .await
        .unwrap();

    assert_eq!(turn.response, "Grounded answer number 1.");
    assert_eq!(turn.retrieved_chunks, 1);
    assert_eq!(turn.citations.len(), 1);
    assert_eq!(turn.citations[0].source_path, "module-1/nodes.md");
    assert_eq!(turn.citations[0].section_title, "ROS 2 Nodes");

    let calls = h.generator.calls.lock().unwrap();
    let user = calls[0].last().unwrap();
    assert_eq!(user.role, Role::User);
    assert!(user.content.contains("Source: module-1/nodes.md - ROS 2 Nodes"));
    assert!(!user.content.contains("Gazebo"));
}

#[tokio::test]
async fn test_selected_text_pulls_in_its_section() {
    let h = harness().await;

    let turn = h
        .service
        .handle_turn(ChatRequest {
            query: "How does this relate to a node?".to_string(),
            selected_text: Some("Gazebo".to_string()),
            session_id: None,
        })
        .await
        .unwrap();

    let paths: Vec<&str> = turn
        .citations
        .iter()
        .map(|c| c.source_path.as_str())
        .collect();
    assert!(paths.contains(&"module-2/gazebo.md"), "paths: {:?}", paths);
    assert!(!paths.contains(&"module-2/urdf.md"));
}

#[tokio::test]
async fn test_unrelated_question_falls_back_without_generation() {
    let h = harness().await;

    let turn = h
        .service
        .handle_turn(request("Tell me about cooking pasta"))
        .await
        .unwrap();

    assert!(turn.response.contains("couldn't find relevant content"));
    assert!(turn.citations.is_empty());
    assert_eq!(turn.retrieved_chunks, 0);
    assert!(h.generator.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_follow_up_sends_history_and_persists() {
    let h = harness().await;

    let first = h
        .service
        .handle_turn(request("What is a ROS 2 node?"))
        .await
        .unwrap();
    let second = h
        .service
        .handle_turn(ChatRequest {
            query: "And what does URDF describe?".to_string(),
            selected_text: None,
            session_id: Some(first.session_id.clone()),
        })
        .await
        .unwrap();

    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.citations[0].source_path, "module-2/urdf.md");

    {
        let calls = h.generator.calls.lock().unwrap();
        let messages = &calls[1];
        // system, prior user, prior assistant, current user
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "What is a ROS 2 node?");
        assert_eq!(messages[2].content, "Grounded answer number 1.");
    }

    let session = h
        .service
        .sessions()
        .get(&first.session_id)
        .await
        .expect("session persisted");
    assert_eq!(session.history().len(), 2);
    assert_eq!(session.history()[1].query.text, "And what does URDF describe?");
}

#[tokio::test]
async fn test_store_health_after_ingest() {
    let h = harness().await;

    assert!(h.service.retriever().is_available().await);
    assert_eq!(h.store.document_count().await.unwrap(), 3);
}
