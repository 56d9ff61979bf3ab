use std::fmt;
use std::path::Path;

use super::{Tokenizer, fit_prefix};
use crate::error::LlmError;

/// Counts tokens with any Hugging Face `tokenizer.json` (BERT, Llama 2,
/// Mixtral, Claude).
pub struct HuggingFaceTokenizer {
    name: String,
    inner: tokenizers::Tokenizer,
}

impl HuggingFaceTokenizer {
    /// Loads a serialized tokenizer from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LlmError> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            LlmError::configuration(format!("failed to load tokenizer {}: {e}", path.display()))
        })?;
        let name = path
            .file_stem()
            .map_or_else(|| "hugging_face".to_owned(), |s| s.to_string_lossy().into_owned());
        Ok(Self { name, inner })
    }

    fn encode(&self, text: &str) -> Option<tokenizers::Encoding> {
        match self.inner.encode(text, false) {
            Ok(encoding) => Some(encoding),
            Err(e) => {
                tracing::warn!(tokenizer = %self.name, error = %e, "encode failed");
                None
            }
        }
    }
}

impl fmt::Debug for HuggingFaceTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HuggingFaceTokenizer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Tokenizer for HuggingFaceTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    /// Falls back to the byte length, an upper bound, when encoding fails.
    fn size(&self, text: &str) -> usize {
        self.encode(text)
            .map_or(text.len(), |encoding| encoding.get_ids().len())
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let Some(encoding) = self.encode(text) else {
            return fit_prefix(self, text, max_tokens, max_tokens);
        };
        let offsets = encoding.get_offsets();
        if offsets.len() <= max_tokens {
            return text.to_owned();
        }
        let byte_len = max_tokens
            .checked_sub(1)
            .and_then(|i| offsets.get(i))
            .map_or(0, |&(_, end)| end);
        fit_prefix(self, text, byte_len, max_tokens)
    }
}
