//! Token counter selection.
//!
//! With `[tokenizer].path` set (and the `hf-tokenizer` feature enabled),
//! token counts come from a HuggingFace `tokenizer.json`. Otherwise the
//! core [`ApproxTokenizer`] is used.

use anyhow::Result;
use std::sync::Arc;

use book_rag_core::tokenizer::{ApproxTokenizer, Tokenizer};

use crate::config::TokenizerConfig;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use anyhow::{anyhow, Result};
    use std::path::Path;
    use tracing::warn;

    use book_rag_core::tokenizer::Tokenizer;

    /// Counts subword tokens with a HuggingFace tokenizer.
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
    }

    impl HfTokenizer {
        pub fn from_file(path: &Path) -> Result<Self> {
            let inner = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;
            Ok(Self { inner })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn count(&self, text: &str) -> usize {
            match self.inner.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(e) => {
                    warn!(error = %e, "tokenizer failed; approximating");
                    book_rag_core::tokenizer::ApproxTokenizer.count(text)
                }
            }
        }
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenizer;

/// Build the configured tokenizer.
pub fn load_tokenizer(config: &TokenizerConfig) -> Result<Arc<dyn Tokenizer>> {
    match &config.path {
        #[cfg(feature = "hf-tokenizer")]
        Some(path) => Ok(Arc::new(HfTokenizer::from_file(path)?)),
        #[cfg(not(feature = "hf-tokenizer"))]
        Some(path) => anyhow::bail!(
            "tokenizer.path = {} requires the hf-tokenizer feature",
            path.display()
        ),
        None => Ok(Arc::new(ApproxTokenizer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_is_approximate() {
        let tokenizer = load_tokenizer(&TokenizerConfig::default()).unwrap();
        assert_eq!(tokenizer.count("abcdefgh"), 2);
    }

    #[test]
    fn test_missing_tokenizer_file_errors() {
        let config = TokenizerConfig {
            path: Some(PathBuf::from("/nonexistent/tokenizer.json")),
        };
        assert!(load_tokenizer(&config).is_err());
    }
}
