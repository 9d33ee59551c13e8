//! `bookrag retrieve`: run retrieval and context assembly without
//! generating an answer.

use anyhow::Result;

use book_rag_core::context::assemble;

use crate::chat_cmd::build_retriever;
use crate::config::Config;
use crate::db;

pub async fn run_retrieve(config: &Config, query: &str, selected: Option<&str>) -> Result<()> {
    let pool = db::connect(config).await?;
    let retriever = build_retriever(config, &pool)?;

    if !retriever.is_available().await {
        println!("Vector store unavailable. Run `bookrag init` and `bookrag ingest` first.");
        pool.close().await;
        return Ok(());
    }

    let chunks = retriever.retrieve(query, selected).await;
    pool.close().await;

    if chunks.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let assembled = assemble(&chunks);
    for (i, (chunk, citation)) in chunks.iter().zip(&assembled.citations).enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            citation.relevance_score,
            chunk.source_path,
            chunk.section_title
        );
        println!(
            "    excerpt: \"{}\"",
            excerpt(&chunk.content, 160).replace('\n', " ").trim()
        );
        println!("    id: {}", chunk.id);
        println!();
    }
    println!("context: {} chars", assembled.context.chars().count());

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}
