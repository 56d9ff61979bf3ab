//! Token counting and budget-respecting truncation.
//!
//! Every model is paired with a [`Tokenizer`]: [`BasicTokenizer`] for a
//! vocabulary-free estimate, [`OpenAiTokenizer`] for the tiktoken
//! encodings, and `HuggingFaceTokenizer` (feature `hf-tokenizers`) for any
//! `tokenizer.json`.
//!
//! Truncation always returns a prefix that ends on an extended grapheme
//! cluster boundary, so a cut landing inside a multi-codepoint emoji drops
//! the whole cluster instead of emitting a fragment.

mod basic;
#[cfg(feature = "hf-tokenizers")]
mod hugging_face;
#[cfg(feature = "tiktoken")]
mod openai;

use unicode_segmentation::UnicodeSegmentation;

pub use basic::BasicTokenizer;
#[cfg(feature = "hf-tokenizers")]
pub use hugging_face::HuggingFaceTokenizer;
#[cfg(feature = "tiktoken")]
pub use openai::{OpenAiEncoding, OpenAiTokenizer};

/// Counts and truncates text under one model's tokenization scheme.
///
/// Implementations must be deterministic: the same text always has the
/// same size, and `size(&truncate(text, n)) <= n` for every `n`.
pub trait Tokenizer: Send + Sync {
    /// A short identifier, shown in `Debug` output and logs.
    fn name(&self) -> &str;

    /// The number of tokens in `text`.
    fn size(&self, text: &str) -> usize;

    /// The longest grapheme-aligned prefix of `text` with at most
    /// `max_tokens` tokens.
    fn truncate(&self, text: &str, max_tokens: usize) -> String;

    /// Whether `existing` followed by `addition` still fits in `budget`.
    fn can_expand_tokens(&self, existing: &str, addition: &str, budget: usize) -> bool {
        let mut joined = String::with_capacity(existing.len() + addition.len());
        joined.push_str(existing);
        joined.push_str(addition);
        self.size(&joined) <= budget
    }
}

/// The largest grapheme boundary in `text` that is `<= byte_len`.
pub(crate) fn grapheme_floor(text: &str, byte_len: usize) -> usize {
    if byte_len >= text.len() {
        return text.len();
    }
    let mut end = 0;
    for (idx, grapheme) in text.grapheme_indices(true) {
        let next = idx + grapheme.len();
        if next > byte_len {
            break;
        }
        end = next;
    }
    end
}

/// Snaps a candidate byte cut to a grapheme boundary, then drops whole
/// graphemes until the prefix re-tokenizes within `max_tokens`.
pub(crate) fn fit_prefix<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    text: &str,
    byte_len: usize,
    max_tokens: usize,
) -> String {
    let mut end = grapheme_floor(text, byte_len);
    while end > 0 && tokenizer.size(&text[..end]) > max_tokens {
        end = grapheme_floor(text, end - 1);
    }
    text[..end].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAMILY: &str = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}";

    #[test]
    fn test_grapheme_floor_inside_cluster() {
        let text = format!("ab{FAMILY}cd");
        // 2 ASCII bytes, then cut 5 bytes into the family cluster
        assert_eq!(grapheme_floor(&text, 7), 2);
        assert_eq!(grapheme_floor(&text, 2 + FAMILY.len()), 2 + FAMILY.len());
    }

    #[test]
    fn test_grapheme_floor_past_end() {
        assert_eq!(grapheme_floor("abc", 99), 3);
        assert_eq!(grapheme_floor("", 0), 0);
    }

    #[test]
    fn test_can_expand_tokens() {
        let tok = BasicTokenizer;
        assert!(tok.can_expand_tokens("one two", " three", 3));
        assert!(!tok.can_expand_tokens("one two", " three four", 3));
    }

    #[test]
    fn test_fit_prefix_shrinks_until_within_budget() {
        let tok = BasicTokenizer;
        let out = fit_prefix(&tok, "one two three", 13, 2);
        assert_eq!(out, "one two ");
    }
}
