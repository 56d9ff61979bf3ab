//! Model configuration.
//!
//! A [`ModelConfig`] names the provider, the model, where to reach it, how
//! many prompt tokens it accepts, and which [`Tokenizer`] counts them. Use
//! struct update syntax with [`Default`], or the `with_*` helpers:
//!
//! ```rust
//! use llm_dialects::{ModelConfig, Provider};
//!
//! let config = ModelConfig::new(Provider::Anthropic, "claude-3-opus")
//!     .with_api_key("sk-ant-...")
//!     .with_max_prompt_tokens(200_000);
//! assert_eq!(config.url, "https://api.anthropic.com/v1/messages");
//! ```
//!
//! Deployment code usually deserializes a [`ModelSpec`] and builds it
//! against a [`TokenizerCatalog`], which loads each tokenizer once per
//! process and hands out shared instances.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialect::DialectKind;
use crate::error::LlmError;
use crate::tokenizer::{BasicTokenizer, Tokenizer};

/// Default share of the prompt budget the system message may use.
pub const DEFAULT_SYSTEM_PROMPT_TOKEN_SHARE: f64 = 0.6;

/// The service hosting a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// `OpenAI` or Azure `OpenAI` chat completions.
    OpenAi,
    /// Anthropic text completions or Messages.
    Anthropic,
    /// Google Gemini.
    Gemini,
    /// Hugging Face text-generation-inference.
    HuggingFace,
    /// A vLLM server's `OpenAI`-compatible API.
    Vllm,
    /// An Ollama server.
    Ollama,
}

impl Provider {
    /// The public endpoint used when a config leaves `url` unset.
    ///
    /// `OpenAI`, vLLM, and Anthropic URLs are complete endpoint URLs. The
    /// Gemini URL is the models collection (the model name and method are
    /// appended). Hugging Face and Ollama URLs are server roots.
    pub fn default_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/models",
            Self::HuggingFace => "http://localhost:8080",
            Self::Vllm => "http://localhost:8000/v1/chat/completions",
            Self::Ollama => "http://localhost:11434",
        }
    }

    /// Lowercase identifier for logs and audit records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "open_ai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::HuggingFace => "hugging_face",
            Self::Vllm => "vllm",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the dialect layer and the client need to know about a model.
#[derive(Clone)]
pub struct ModelConfig {
    /// Hosting service.
    pub provider: Provider,
    /// Model identifier sent to the provider (e.g. `"gpt-4o"`).
    pub name: String,
    /// Endpoint URL. See [`Provider::default_url`] for its shape.
    pub url: String,
    /// API key. Never logged.
    pub api_key: String,
    /// Upper bound on the rendered prompt's token count.
    pub max_prompt_tokens: usize,
    /// Counts tokens for this model.
    pub tokenizer: Arc<dyn Tokenizer>,
    /// Fraction of `max_prompt_tokens` the system message may take.
    pub system_prompt_token_share: f64,
    /// Overrides the dialect resolved from provider and model name.
    pub dialect: Option<DialectKind>,
    /// Fold the system text into the first user message instead of
    /// sending a system role.
    pub disable_system_prompt: bool,
    /// Describe tools in the prompt text instead of the native tools field.
    pub disable_native_tools: bool,
    /// Deadline for a blocking call or a stream's connect phase.
    pub request_timeout: Duration,
    /// Longest allowed gap between two stream chunks.
    pub stream_idle_timeout: Duration,
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("max_prompt_tokens", &self.max_prompt_tokens)
            .field("tokenizer", &self.tokenizer.name())
            .field("system_prompt_token_share", &self.system_prompt_token_share)
            .field("dialect", &self.dialect)
            .field("disable_system_prompt", &self.disable_system_prompt)
            .field("disable_native_tools", &self.disable_native_tools)
            .field("request_timeout", &self.request_timeout)
            .field("stream_idle_timeout", &self.stream_idle_timeout)
            .finish()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            name: "gpt-4o".into(),
            url: Provider::OpenAi.default_url().into(),
            api_key: String::new(),
            max_prompt_tokens: 8_000,
            tokenizer: Arc::new(BasicTokenizer),
            system_prompt_token_share: DEFAULT_SYSTEM_PROMPT_TOKEN_SHARE,
            dialect: None,
            disable_system_prompt: false,
            disable_native_tools: false,
            request_timeout: Duration::from_secs(60),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl ModelConfig {
    /// A config for `name` on `provider`, pointing at the provider's
    /// default URL.
    pub fn new(provider: Provider, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
            url: provider.default_url().into(),
            ..Default::default()
        }
    }

    /// Sets the endpoint URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Sets the prompt token budget.
    #[must_use]
    pub fn with_max_prompt_tokens(mut self, max: usize) -> Self {
        self.max_prompt_tokens = max;
        self
    }

    /// Sets the tokenizer.
    #[must_use]
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Forces a dialect.
    #[must_use]
    pub fn with_dialect(mut self, dialect: DialectKind) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// The dialect used to render prompts for this model.
    pub fn dialect_kind(&self) -> DialectKind {
        self.dialect
            .unwrap_or_else(|| DialectKind::default_for(self.provider, &self.name))
    }

    /// Most tokens the system message may use:
    /// `floor(max_prompt_tokens * system_prompt_token_share)`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn system_token_budget(&self) -> usize {
        (self.max_prompt_tokens as f64 * self.system_prompt_token_share).floor() as usize
    }

    /// Checks numeric settings.
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.max_prompt_tokens == 0 {
            return Err(LlmError::configuration("max_prompt_tokens must be positive"));
        }
        if !(self.system_prompt_token_share > 0.0 && self.system_prompt_token_share <= 1.0) {
            return Err(LlmError::configuration(format!(
                "system_prompt_token_share must be in (0, 1], got {}",
                self.system_prompt_token_share
            )));
        }
        if self.name.is_empty() {
            return Err(LlmError::configuration("model name must not be empty"));
        }
        Ok(())
    }
}

/// Which tokenizer a [`ModelSpec`] uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenizerKind {
    /// `cl100k_base`.
    OpenAi,
    /// `o200k_base`.
    OpenAiO200k,
    /// [`BasicTokenizer`].
    Basic,
    /// A Hugging Face `tokenizer.json` on disk.
    HuggingFace {
        /// Path to the serialized tokenizer.
        path: PathBuf,
    },
}

/// Loads tokenizers on first use and shares them afterwards.
///
/// One catalog per process (or per test) replaces module-level caches, so
/// tests can swap tokenizers without touching shared state.
#[derive(Default)]
pub struct TokenizerCatalog {
    cache: Mutex<HashMap<TokenizerKind, Arc<dyn Tokenizer>>>,
}

impl fmt::Debug for TokenizerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TokenizerCatalog")
            .field("loaded", &cache.len())
            .finish()
    }
}

impl TokenizerCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tokenizer instance for `kind`, replacing any cached one.
    pub fn insert(&self, kind: TokenizerKind, tokenizer: Arc<dyn Tokenizer>) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, tokenizer);
    }

    /// The tokenizer for `kind`, loading it if needed.
    pub fn get(&self, kind: &TokenizerKind) -> Result<Arc<dyn Tokenizer>, LlmError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tokenizer) = cache.get(kind) {
            return Ok(Arc::clone(tokenizer));
        }
        let tokenizer = load(kind)?;
        tracing::debug!(tokenizer = tokenizer.name(), "tokenizer loaded");
        cache.insert(kind.clone(), Arc::clone(&tokenizer));
        Ok(tokenizer)
    }
}

fn load(kind: &TokenizerKind) -> Result<Arc<dyn Tokenizer>, LlmError> {
    match kind {
        TokenizerKind::Basic => Ok(Arc::new(BasicTokenizer)),
        #[cfg(feature = "tiktoken")]
        TokenizerKind::OpenAi => {
            use crate::tokenizer::{OpenAiEncoding, OpenAiTokenizer};
            Ok(Arc::new(OpenAiTokenizer::new(OpenAiEncoding::Cl100kBase)?))
        }
        #[cfg(feature = "tiktoken")]
        TokenizerKind::OpenAiO200k => {
            use crate::tokenizer::{OpenAiEncoding, OpenAiTokenizer};
            Ok(Arc::new(OpenAiTokenizer::new(OpenAiEncoding::O200kBase)?))
        }
        #[cfg(not(feature = "tiktoken"))]
        TokenizerKind::OpenAi | TokenizerKind::OpenAiO200k => Err(LlmError::configuration(
            "OpenAI tokenizers require the `tiktoken` feature",
        )),
        #[cfg(feature = "hf-tokenizers")]
        TokenizerKind::HuggingFace { path } => Ok(Arc::new(
            crate::tokenizer::HuggingFaceTokenizer::from_file(path)?,
        )),
        #[cfg(not(feature = "hf-tokenizers"))]
        TokenizerKind::HuggingFace { .. } => Err(LlmError::configuration(
            "tokenizer.json files require the `hf-tokenizers` feature",
        )),
    }
}

fn default_share() -> f64 {
    DEFAULT_SYSTEM_PROMPT_TOKEN_SHARE
}

/// A serializable model description, as stored in deployment settings.
///
/// ```rust
/// use llm_dialects::{ModelSpec, TokenizerCatalog};
///
/// let spec: ModelSpec = serde_json::from_value(serde_json::json!({
///     "provider": "ollama",
///     "name": "llama3",
///     "max_prompt_tokens": 4096,
///     "tokenizer": {"kind": "basic"}
/// }))
/// .unwrap();
/// let config = spec.build(&TokenizerCatalog::new()).unwrap();
/// assert_eq!(config.url, "http://localhost:11434");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Hosting service.
    pub provider: Provider,
    /// Model identifier.
    pub name: String,
    /// Endpoint URL; the provider default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// API key.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Prompt token budget.
    pub max_prompt_tokens: usize,
    /// Tokenizer to load.
    pub tokenizer: TokenizerKind,
    /// Fraction of the budget the system message may take.
    #[serde(default = "default_share")]
    pub system_prompt_token_share: f64,
    /// Dialect override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<DialectKind>,
    /// See [`ModelConfig::disable_system_prompt`].
    #[serde(default)]
    pub disable_system_prompt: bool,
    /// See [`ModelConfig::disable_native_tools`].
    #[serde(default)]
    pub disable_native_tools: bool,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// Stream idle timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_idle_timeout_secs: Option<u64>,
}

impl ModelSpec {
    /// Resolves the tokenizer through `catalog` and validates the result.
    pub fn build(&self, catalog: &TokenizerCatalog) -> Result<ModelConfig, LlmError> {
        let defaults = ModelConfig::default();
        let config = ModelConfig {
            provider: self.provider,
            name: self.name.clone(),
            url: self
                .url
                .clone()
                .unwrap_or_else(|| self.provider.default_url().into()),
            api_key: self.api_key.clone(),
            max_prompt_tokens: self.max_prompt_tokens,
            tokenizer: catalog.get(&self.tokenizer)?,
            system_prompt_token_share: self.system_prompt_token_share,
            dialect: self.dialect,
            disable_system_prompt: self.disable_system_prompt,
            disable_native_tools: self.disable_native_tools,
            request_timeout: self
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            stream_idle_timeout: self
                .stream_idle_timeout_secs
                .map_or(defaults.stream_idle_timeout, Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }
}
