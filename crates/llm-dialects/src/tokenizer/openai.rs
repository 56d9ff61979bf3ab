use std::fmt;

use tiktoken_rs::CoreBPE;

use super::{Tokenizer, fit_prefix};
use crate::error::LlmError;

/// Which tiktoken encoding to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenAiEncoding {
    /// `cl100k_base`: GPT-3.5 and GPT-4.
    Cl100kBase,
    /// `o200k_base`: GPT-4o and later.
    O200kBase,
}

/// Exact token counts for OpenAI models via [`tiktoken_rs`].
pub struct OpenAiTokenizer {
    encoding: OpenAiEncoding,
    bpe: CoreBPE,
}

impl OpenAiTokenizer {
    /// Loads the BPE ranks for `encoding`.
    pub fn new(encoding: OpenAiEncoding) -> Result<Self, LlmError> {
        let bpe = match encoding {
            OpenAiEncoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            OpenAiEncoding::O200kBase => tiktoken_rs::o200k_base(),
        }
        .map_err(|e| LlmError::configuration(format!("failed to load tiktoken ranks: {e}")))?;
        Ok(Self { encoding, bpe })
    }
}

impl fmt::Debug for OpenAiTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiTokenizer")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl Tokenizer for OpenAiTokenizer {
    fn name(&self) -> &str {
        match self.encoding {
            OpenAiEncoding::Cl100kBase => "cl100k_base",
            OpenAiEncoding::O200kBase => "o200k_base",
        }
    }

    fn size(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let ids = self.bpe.encode_with_special_tokens(text);
        if ids.len() <= max_tokens {
            return text.to_owned();
        }
        // A token prefix can end inside a multi-byte character, in which
        // case it does not decode.
        let mut take = max_tokens;
        let byte_len = loop {
            if take == 0 {
                break 0;
            }
            match self.bpe.decode(ids[..take].to_vec()) {
                Ok(prefix) => break prefix.len(),
                Err(_) => take -= 1,
            }
        };
        fit_prefix(self, text, byte_len, max_tokens)
    }
}
