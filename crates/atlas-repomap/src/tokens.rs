use std::sync::LazyLock;

use atlas_core::AtlasError;
use tiktoken_rs::CoreBPE;

/// The `cl100k_base` encoding, loaded on first use.
static BPE: LazyLock<Option<CoreBPE>> = LazyLock::new(|| {
    tiktoken_rs::cl100k_base()
        .map_err(|e| tracing::error!(error = %e, "failed to load cl100k_base tokenizer"))
        .ok()
});

/// Counts tokens in rendered text.
///
/// Counts must be deterministic and must not decrease when text is appended.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Exact counts using the `cl100k_base` BPE encoding.
#[derive(Clone, Copy)]
pub struct TiktokenCounter {
    bpe: &'static CoreBPE,
}

impl TiktokenCounter {
    /// Load the shared encoding.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Tokenizer`] if the encoding could not be built.
    pub fn new() -> Result<Self, AtlasError> {
        BPE.as_ref()
            .map(|bpe| Self { bpe })
            .ok_or_else(|| AtlasError::Tokenizer("cl100k_base encoding unavailable".into()))
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Cheap estimate of roughly four characters per token.
///
/// # Examples
///
/// ```
/// use atlas_repomap::tokens::{CharEstimateCounter, TokenCounter};
///
/// assert_eq!(CharEstimateCounter.count(""), 0);
/// assert_eq!(CharEstimateCounter.count("abcd"), 1);
/// assert_eq!(CharEstimateCounter.count("abcde"), 2);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimateCounter;

impl TokenCounter for CharEstimateCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// Prefer exact counts, degrading to the estimate when the encoding is missing.
pub fn default_counter() -> Box<dyn TokenCounter> {
    match TiktokenCounter::new() {
        Ok(counter) => Box::new(counter),
        Err(e) => {
            tracing::warn!(error = %e, "falling back to character-based token estimate");
            Box::new(CharEstimateCounter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiktoken_counts_are_positive_and_monotonic() {
        let counter = TiktokenCounter::new().unwrap();
        let short = counter.count("def connect():");
        let long = counter.count("def connect():\n    return open_socket(host, port)\n");
        assert!(short > 0);
        assert!(long >= short);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(CharEstimateCounter.count("a"), 1);
        assert_eq!(CharEstimateCounter.count("abcdefgh"), 2);
        assert_eq!(CharEstimateCounter.count("│⋮"), 1);
    }

    #[test]
    fn default_counter_is_usable() {
        let counter = default_counter();
        assert!(counter.count("hello world") > 0);
    }
}
