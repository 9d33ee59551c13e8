//! Recursive token-bounded text chunker.
//!
//! Splits document text into [`Chunk`]s whose token counts lie within
//! `[min_tokens, max_tokens]`, carrying `overlap_tokens` of trailing
//! context from one chunk into the next so meaning that spans a boundary
//! survives in at least one chunk.
//!
//! # Algorithm
//!
//! 1. Pick the coarsest separator present in the text from the hierarchy
//!    paragraph break (`\n\n`), line break (`\n`), space, single character.
//! 2. Split on it, keeping each separator attached to the start of the
//!    piece that follows it.
//! 3. Pieces under `max_tokens` are merged greedily into windows of at
//!    most `max_tokens`, counted on the joined window text; when a window is flushed, pieces are dropped from
//!    its front until at most `overlap_tokens` remain, and those carry
//!    into the next window.
//! 4. Pieces at or over `max_tokens` are split recursively with the next
//!    finer separator.
//! 5. Windows outside `[min_tokens, max_tokens]` are filtered out.
//! 6. If nothing survives the filter, a fallback pass joins consecutive
//!    windows with spaces until they reach `min_tokens`. A trailing
//!    remainder below `min_tokens` is dropped.
//!
//! Token counts come from a [`Tokenizer`], so the chunker is deterministic
//! for a given tokenizer and holds no state between calls.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::models::Chunk;
use crate::tokenizer::Tokenizer;

/// Separator hierarchy, coarsest first. The empty separator splits into
/// individual characters.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Chunk sizing parameters, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            min_tokens: 200,
            max_tokens: 250,
            overlap_tokens: 40,
        }
    }
}

/// Recursive separator-hierarchy splitter with overlapping windows.
pub struct RecursiveSplitter<'a> {
    tokenizer: &'a dyn Tokenizer,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &'a [&'a str],
}

impl<'a> RecursiveSplitter<'a> {
    pub fn new(tokenizer: &'a dyn Tokenizer, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            tokenizer,
            chunk_size,
            chunk_overlap,
            separators: &DEFAULT_SEPARATORS,
        }
    }

    /// Override the separator hierarchy.
    pub fn with_separators(mut self, separators: &'a [&'a str]) -> Self {
        self.separators = separators;
        self
    }

    /// Split `text` into trimmed, non-empty windows.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep) {
                separator = *sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut final_chunks = Vec::new();
        let mut good: Vec<String> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if self.tokenizer.count(&piece) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                final_chunks.extend(self.merge_splits(&good));
                good.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    final_chunks.push(trimmed.to_string());
                }
            } else {
                final_chunks.extend(self.split_recursive(&piece, finer));
            }
        }

        if !good.is_empty() {
            final_chunks.extend(self.merge_splits(&good));
        }

        final_chunks
    }

    /// Merge small pieces into windows of at most `chunk_size` tokens,
    /// keeping up to `chunk_overlap` tokens of each window's tail as the
    /// head of the next.
    ///
    /// Sizes are counted on the joined window text, so tokenizers that
    /// round per string are not over-counted piece by piece.
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();

        for piece in splits {
            let piece = piece.as_str();
            if !current.is_empty() && self.window_tokens(&current, Some(piece)) > self.chunk_size {
                if let Some(doc) = join_pieces(&current) {
                    docs.push(doc);
                }
                while !current.is_empty()
                    && (self.window_tokens(&current, None) > self.chunk_overlap
                        || self.window_tokens(&current, Some(piece)) > self.chunk_size)
                {
                    current.pop_front();
                }
            }
            current.push_back(piece);
        }

        if let Some(doc) = join_pieces(&current) {
            docs.push(doc);
        }
        docs
    }

    /// Token count of the trimmed window, optionally extended by `next`.
    fn window_tokens(&self, window: &VecDeque<&str>, next: Option<&str>) -> usize {
        let joined: String = window.iter().copied().chain(next).collect();
        self.tokenizer.count(joined.trim())
    }
}

/// Split on `separator`, attaching each separator to the start of the
/// following piece. Empty pieces are dropped.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }

    let mut parts = text.split(separator);
    let mut pieces = Vec::new();
    if let Some(first) = parts.next() {
        pieces.push(first.to_string());
    }
    for part in parts {
        pieces.push(format!("{}{}", separator, part));
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn join_pieces(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split text into chunk strings whose token counts lie in
/// `[min_tokens, max_tokens]`.
///
/// Returns an empty vector for text too short to reach `min_tokens`
/// even after the fallback merge.
pub fn chunk_text(text: &str, params: &ChunkParams, tokenizer: &dyn Tokenizer) -> Vec<String> {
    let splitter = RecursiveSplitter::new(tokenizer, params.max_tokens, params.overlap_tokens);
    let pieces = splitter.split_text(text);

    let in_range = |s: &str| {
        let n = tokenizer.count(s);
        n >= params.min_tokens && n <= params.max_tokens
    };

    let filtered: Vec<String> = pieces.iter().filter(|p| in_range(p.as_str())).cloned().collect();
    if filtered.is_empty() && !pieces.is_empty() {
        return merge_fallback(&pieces, params, tokenizer);
    }
    filtered
}

/// Greedily space-join consecutive pieces until each group reaches
/// `min_tokens`. Groups over `max_tokens` are never emitted, and a
/// trailing remainder under `min_tokens` is dropped.
fn merge_fallback(
    pieces: &[String],
    params: &ChunkParams,
    tokenizer: &dyn Tokenizer,
) -> Vec<String> {
    let in_range = |s: &str| {
        let n = tokenizer.count(s);
        n >= params.min_tokens && n <= params.max_tokens
    };

    let mut merged = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        let piece = piece.trim();
        let candidate = if current.is_empty() {
            piece.to_string()
        } else {
            format!("{} {}", current, piece)
        };

        let n = tokenizer.count(&candidate);
        if n <= params.max_tokens {
            current = candidate;
            if n >= params.min_tokens {
                merged.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() && in_range(current.as_str()) {
                merged.push(std::mem::take(&mut current));
            }
            current = piece.to_string();
        }
    }

    if !current.is_empty() && in_range(current.as_str()) {
        merged.push(current);
    }
    merged
}

/// Chunk a document and wrap each piece in a [`Chunk`] record.
///
/// Positions are contiguous from 0. Each chunk gets a fresh UUID and a
/// SHA-256 hash of its content.
pub fn build_chunks(
    source_path: &str,
    section_title: &str,
    text: &str,
    params: &ChunkParams,
    tokenizer: &dyn Tokenizer,
) -> Vec<Chunk> {
    chunk_text(text, params, tokenizer)
        .into_iter()
        .enumerate()
        .map(|(i, content)| {
            let token_count = tokenizer.count(&content) as i64;
            Chunk {
                id: Uuid::new_v4().to_string(),
                hash: content_hash(&content),
                content,
                source_path: source_path.to_string(),
                section_title: section_title.to_string(),
                position: i as i64,
                token_count,
            }
        })
        .collect()
}

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Section title for a markdown document: the first `# ` heading in its
/// first ten lines, else `fallback` if non-empty, else `"Untitled"`.
pub fn extract_title(content: &str, fallback: &str) -> String {
    content
        .lines()
        .take(10)
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            if fallback.trim().is_empty() {
                "Untitled".to_string()
            } else {
                fallback.to_string()
            }
        })
}
