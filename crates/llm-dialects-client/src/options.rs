//! Per-call and per-client options.

use std::sync::Arc;
use std::time::Duration;

use llm_dialects::audit::AuditLog;
use llm_dialects::tool::JsonSchema;

use crate::retry::RetryPolicy;

/// Sampling and output options for one completion call.
///
/// Use struct update syntax with [`Default`]:
///
/// ```rust
/// use llm_dialects_client::GenerateOptions;
///
/// let options = GenerateOptions {
///     temperature: Some(0.2),
///     max_tokens: Some(500),
///     ..Default::default()
/// };
/// assert!(options.stop_sequences.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    /// Output token limit.
    pub max_tokens: Option<u32>,
    /// Extra stop sequences, sent along with the dialect's own.
    pub stop_sequences: Vec<String>,
    /// End-user identifier forwarded to providers that accept one.
    pub user: Option<String>,
    /// Constrains the output to JSON matching this schema where the
    /// provider supports it.
    pub response_schema: Option<JsonSchema>,
    /// Overrides [`ModelConfig::request_timeout`](llm_dialects::ModelConfig::request_timeout).
    pub timeout: Option<Duration>,
}

/// Options for building a [`CompletionClient`](crate::CompletionClient).
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Pre-configured HTTP client for connection pooling. When `None`, a
    /// new client is created.
    pub http: Option<reqwest::Client>,
    /// Where completed calls are recorded.
    pub audit: Option<Arc<dyn AuditLog>>,
    /// Retry policy for [`CompletionClient::retry`](crate::CompletionClient::retry).
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("http", &self.http.as_ref().map(|_| "..."))
            .field("audit", &self.audit.as_ref().map(|_| "..."))
            .field("retry", &self.retry)
            .finish()
    }
}
