//! Token counting.
//!
//! Chunk sizes, query limits, and response limits are all measured in
//! tokens. The concrete vocabulary is supplied by the application (a
//! HuggingFace `tokenizer.json`); the core only needs a deterministic
//! count.

/// Deterministic token counter for a fixed encoding.
pub trait Tokenizer: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> usize;
}

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Heuristic tokenizer: 4 characters ≈ 1 token, rounded up.
///
/// Used when no subword vocabulary is configured. Counts Unicode scalar
/// values rather than bytes so multibyte text is not over-counted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(CHARS_PER_TOKEN)
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn count(&self, text: &str) -> usize {
        (**self).count(text)
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for Box<T> {
    fn count(&self, text: &str) -> usize {
        (**self).count(text)
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for std::sync::Arc<T> {
    fn count(&self, text: &str) -> usize {
        (**self).count(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_empty() {
        assert_eq!(ApproxTokenizer.count(""), 0);
    }

    #[test]
    fn test_approx_rounds_up() {
        assert_eq!(ApproxTokenizer.count("abc"), 1);
        assert_eq!(ApproxTokenizer.count("abcd"), 1);
        assert_eq!(ApproxTokenizer.count("abcde"), 2);
    }

    #[test]
    fn test_approx_counts_chars_not_bytes() {
        assert_eq!(ApproxTokenizer.count("┌──┐"), 1);
    }

    #[test]
    fn test_boxed_tokenizer_delegates() {
        let boxed: Box<dyn Tokenizer> = Box::new(ApproxTokenizer);
        assert_eq!(boxed.count("abcdefgh"), 2);
    }
}
