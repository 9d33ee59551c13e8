//! Ingestion pipeline.
//!
//! Walks `[ingest].root`, chunks every matching Markdown file, embeds the
//! chunks in batches and replaces each document's chunks in the vector
//! store:
//!
//! ```text
//! scan ─▶ extract title ─▶ chunk ─▶ hash check ─▶ embed (batched) ─▶ replace
//! ```
//!
//! Documents whose SHA-256 content hash matches the stored one are skipped
//! unless `--full` is given. A failure on one file is logged and counted,
//! and the run moves on to the next file.

use anyhow::{anyhow, bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use book_rag_core::chunk::{build_chunks, content_hash, extract_title, ChunkParams};
use book_rag_core::embedding::EmbeddingProvider;
use book_rag_core::tokenizer::Tokenizer;
use book_rag_core::vector_store::VectorPoint;

use crate::config::{Config, IngestConfig};
use crate::db;
use crate::embedding::create_provider;
use crate::sqlite_store::{DocumentRecord, SqliteVectorStore};
use crate::tokenizer::load_tokenizer;

/// A source file read from the ingestion root.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Path relative to the root, with `/` separators.
    pub source_path: String,
    pub section_title: String,
    pub body: String,
    pub content_hash: String,
}

/// Counters printed at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: usize,
    pub chunks: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Scan the configured root for files matching the include globs.
///
/// Results are sorted by path for deterministic ordering.
pub fn scan_documents(ingest: &IngestConfig) -> Result<Vec<SourceDocument>> {
    let root = &ingest.root;
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&ingest.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(ingest.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    for entry in WalkDir::new(root).follow_links(ingest.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_document(path, rel_str) {
            Ok(doc) => documents.push(doc),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    documents.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(documents)
}

fn read_document(path: &Path, source_path: String) -> Result<SourceDocument> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(SourceDocument {
        section_title: extract_title(&body, &stem),
        content_hash: content_hash(&body),
        source_path,
        body,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Chunk, embed and store `documents`.
///
/// Returns the run's counters. Only a broken store handle is fatal;
/// embedding failures count against the file and move on.
pub async fn ingest_documents(
    store: &SqliteVectorStore,
    embedder: &dyn EmbeddingProvider,
    tokenizer: &dyn Tokenizer,
    documents: &[SourceDocument],
    params: &ChunkParams,
    batch_size: usize,
    full: bool,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary {
        files: documents.len(),
        ..IngestSummary::default()
    };

    for doc in documents {
        if !full {
            let stored = store.document(&doc.source_path).await?;
            if stored.is_some_and(|r| r.content_hash == doc.content_hash) {
                summary.skipped += 1;
                continue;
            }
        }

        match ingest_one(store, embedder, tokenizer, doc, params, batch_size).await {
            Ok(count) => {
                info!(path = %doc.source_path, chunks = count, "ingested");
                summary.chunks += count;
            }
            Err(e) => {
                warn!(path = %doc.source_path, error = %e, "ingest failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

async fn ingest_one(
    store: &SqliteVectorStore,
    embedder: &dyn EmbeddingProvider,
    tokenizer: &dyn Tokenizer,
    doc: &SourceDocument,
    params: &ChunkParams,
    batch_size: usize,
) -> Result<usize> {
    let chunks = build_chunks(
        &doc.source_path,
        &doc.section_title,
        &doc.body,
        params,
        tokenizer,
    );

    let mut points = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedding returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
        }

        for (chunk, vector) in batch.iter().zip(vectors) {
            if vector.len() != embedder.dims() {
                bail!(
                    "embedding has {} dimensions, expected {}",
                    vector.len(),
                    embedder.dims()
                );
            }
            points.push(VectorPoint {
                id: chunk.id.clone(),
                vector,
                payload: chunk.into(),
            });
        }
    }

    let record = DocumentRecord {
        source_path: doc.source_path.clone(),
        content_hash: doc.content_hash.clone(),
        section_title: doc.section_title.clone(),
    };
    store.replace_document(&record, &points).await?;
    Ok(points.len())
}

/// Run `bookrag ingest`.
pub async fn run_ingest(config: &Config, full: bool, dry_run: bool) -> Result<()> {
    let ingest = config
        .ingest
        .as_ref()
        .ok_or_else(|| anyhow!("No [ingest] section configured"))?;
    let tokenizer = load_tokenizer(&config.tokenizer)?;
    let params = config.chunk_params();
    let documents = scan_documents(ingest)?;

    if dry_run {
        let chunks: usize = documents
            .iter()
            .map(|doc| {
                build_chunks(
                    &doc.source_path,
                    &doc.section_title,
                    &doc.body,
                    &params,
                    tokenizer.as_ref(),
                )
                .len()
            })
            .sum();
        println!("ingest (dry-run)");
        println!("  files found: {}", documents.len());
        println!("  estimated chunks: {}", chunks);
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider to ingest.");
    }

    let embedder = create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = SqliteVectorStore::new(pool.clone(), embedder.dims());

    let summary = ingest_documents(
        &store,
        embedder.as_ref(),
        tokenizer.as_ref(),
        &documents,
        &params,
        config.embedding.batch_size,
        full,
    )
    .await?;

    println!("ingest {}", ingest.root.display());
    println!("  files: {}", summary.files);
    println!("  chunks written: {}", summary.chunks);
    println!("  unchanged: {}", summary.skipped);
    println!("  failed: {}", summary.failed);
    println!("ok");

    pool.close().await;
    Ok(())
}
