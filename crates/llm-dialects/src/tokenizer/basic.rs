use unicode_segmentation::UnicodeSegmentation;

use super::Tokenizer;

/// A vocabulary-free counter in the style of a BERT basic pre-tokenizer.
///
/// Whitespace separates words. Every grapheme that does not start with an
/// alphanumeric character (punctuation, symbols, emoji) is a token on its
/// own. Good enough for budget estimates when the real tokenizer is not
/// available, and fully deterministic for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicTokenizer;

impl BasicTokenizer {
    /// Byte spans `(start, end)` of each token, in order.
    fn spans(text: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut word: Option<(usize, usize)> = None;
        for (idx, grapheme) in text.grapheme_indices(true) {
            let end = idx + grapheme.len();
            let first = grapheme.chars().next().unwrap_or(' ');
            if first.is_whitespace() {
                spans.extend(word.take());
            } else if first.is_alphanumeric() {
                word = Some(word.map_or((idx, end), |(start, _)| (start, end)));
            } else {
                spans.extend(word.take());
                spans.push((idx, end));
            }
        }
        spans.extend(word);
        spans
    }
}

impl Tokenizer for BasicTokenizer {
    fn name(&self) -> &str {
        "basic"
    }

    fn size(&self, text: &str) -> usize {
        Self::spans(text).len()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let spans = Self::spans(text);
        if spans.len() <= max_tokens {
            return text.to_owned();
        }
        match max_tokens.checked_sub(1).and_then(|i| spans.get(i)) {
            Some(&(_, end)) => text[..end].to_owned(),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_counts_words_and_punctuation() {
        let tok = BasicTokenizer;
        assert_eq!(tok.size("Hello, world!"), 4);
        assert_eq!(tok.size("   "), 0);
        assert_eq!(tok.size(""), 0);
    }

    #[test]
    fn test_size_emoji_cluster_is_one_token() {
        let tok = BasicTokenizer;
        assert_eq!(tok.size("hi \u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467} there"), 3);
    }

    #[test]
    fn test_size_combining_marks_stay_in_word() {
        // "cafe" + combining acute accent
        assert_eq!(BasicTokenizer.size("cafe\u{301} noir"), 2);
    }

    #[test]
    fn test_truncate_keeps_whole_tokens() {
        let tok = BasicTokenizer;
        assert_eq!(tok.truncate("one two three four", 2), "one two");
        assert_eq!(tok.truncate("one two", 5), "one two");
        assert_eq!(tok.truncate("one two", 0), "");
    }

    #[test]
    fn test_truncate_never_splits_emoji_cluster() {
        let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}";
        let text = format!("hello {family}{family} world");
        let out = BasicTokenizer.truncate(&text, 2);
        assert_eq!(out, format!("hello {family}"));
        assert!(BasicTokenizer.size(&out) <= 2);
    }
}
