//! Context assembly.
//!
//! Turns ranked retrieval results into the grounding text handed to the
//! generation provider, plus a citation list in the same order.

use serde::Serialize;

use crate::models::{Citation, RetrievedChunk};

/// Prompt-ready context and its citations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledContext {
    pub context: String,
    pub citations: Vec<Citation>,
}

impl AssembledContext {
    /// True when no content was retrieved; callers answer with the
    /// fallback response instead of calling the generation provider.
    pub fn is_empty(&self) -> bool {
        self.context.trim().is_empty()
    }
}

/// Format each chunk as a labelled block, joined by blank lines.
///
/// ```rust
/// use book_rag_core::context::assemble;
///
/// let assembled = assemble(&[]);
/// assert_eq!(assembled.context, "");
/// assert!(assembled.citations.is_empty());
/// ```
pub fn assemble(chunks: &[RetrievedChunk]) -> AssembledContext {
    let context = chunks
        .iter()
        .map(|c| {
            format!(
                "Source: {} - {}\nContent: {}",
                c.source_path, c.section_title, c.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let citations = chunks.iter().map(Citation::from).collect();

    AssembledContext { context, citations }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, path: &str, section: &str, content: &str, score: f64) -> RetrievedChunk {
        RetrievedChunk {
            id: id.to_string(),
            content: content.to_string(),
            source_path: path.to_string(),
            section_title: section.to_string(),
            position: 0,
            token_count: 5,
            similarity_score: score,
        }
    }

    #[test]
    fn test_empty_input() {
        let assembled = assemble(&[]);
        assert_eq!(assembled, AssembledContext::default());
        assert!(assembled.is_empty());
    }

    #[test]
    fn test_blocks_and_citations_in_order() {
        let chunks = vec![
            chunk("1", "ch1/intro.md", "Introduction", "Robots sense.", 0.82),
            chunk("2", "ch2/motion.md", "Motion", "Robots move.", 0.41),
        ];
        let assembled = assemble(&chunks);
        assert_eq!(
            assembled.context,
            "Source: ch1/intro.md - Introduction\nContent: Robots sense.\n\n\
             Source: ch2/motion.md - Motion\nContent: Robots move."
        );
        assert_eq!(assembled.citations.len(), 2);
        assert_eq!(assembled.citations[0].source_path, "ch1/intro.md");
        assert_eq!(assembled.citations[1].section_title, "Motion");
        assert!((assembled.citations[1].relevance_score - 0.41).abs() < 1e-9);
        assert!(!assembled.is_empty());
    }

    #[test]
    fn test_citation_scores_within_unit_interval() {
        let chunks = vec![chunk("1", "a.md", "A", "x", 1.0000001), chunk("2", "b.md", "B", "y", 0.0)];
        for c in assemble(&chunks).citations {
            assert!((0.0..=1.0).contains(&c.relevance_score));
        }
    }
}
