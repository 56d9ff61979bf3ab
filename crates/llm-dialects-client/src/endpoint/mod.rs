//! Provider endpoints: URL, auth, request body, and response decoding.
//!
//! An [`Endpoint`] is the HTTP half of a provider family. It takes the
//! payload a [`Dialect`](llm_dialects::Dialect) rendered, wraps it in the
//! provider's request envelope, and decodes responses into
//! [`StreamEvent`]s. A blocking response body decodes to the same events a
//! stream would produce, so both modes share the tool-call parsers and the
//! accumulator.
//!
//! | Endpoint | Providers | Payload | Stream framing |
//! |----------|-----------|---------|----------------|
//! | [`OpenAiEndpoint`] | `OpenAI`, Azure, vLLM | chat | SSE |
//! | [`AnthropicMessagesEndpoint`] | Anthropic Messages | chat | SSE |
//! | [`AnthropicEndpoint`] | Anthropic text completions | text | SSE |
//! | [`GeminiEndpoint`] | Gemini | chat | SSE |
//! | [`HuggingFaceEndpoint`] | text-generation-inference | text | SSE |
//! | [`OllamaEndpoint`] | Ollama | chat | JSON lines |

mod anthropic;
mod anthropic_messages;
mod gemini;
mod hugging_face;
mod ollama;
mod open_ai;

pub use anthropic::AnthropicEndpoint;
pub use anthropic_messages::AnthropicMessagesEndpoint;
pub use gemini::GeminiEndpoint;
pub use hugging_face::HuggingFaceEndpoint;
pub use ollama::OllamaEndpoint;
pub use open_ai::OpenAiEndpoint;

use std::time::Duration;

use llm_dialects::dialect::{ChatPayload, TextPayload};
use llm_dialects::{DialectKind, LlmError, ModelConfig, Provider, RenderedPrompt, StreamEvent};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::framing::{Frame, Framing};
use crate::options::GenerateOptions;

/// Everything an endpoint needs to build a request body.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    /// The dialect's output.
    pub rendered: &'a RenderedPrompt,
    /// The target model.
    pub model: &'a ModelConfig,
    /// Per-call options.
    pub options: &'a GenerateOptions,
    /// Whether a streamed response is requested.
    pub stream: bool,
}

impl<'a> RequestParts<'a> {
    /// The chat payload, or a configuration error for a text payload.
    pub fn chat(&self) -> Result<&'a ChatPayload, LlmError> {
        match self.rendered {
            RenderedPrompt::Chat(chat) => Ok(chat),
            RenderedPrompt::Text(_) => Err(LlmError::configuration(
                "endpoint expects a message payload, got a text prompt",
            )),
        }
    }

    /// The text payload, or a configuration error for a chat payload.
    pub fn text(&self) -> Result<&'a TextPayload, LlmError> {
        match self.rendered {
            RenderedPrompt::Text(text) => Ok(text),
            RenderedPrompt::Chat(_) => Err(LlmError::configuration(
                "endpoint expects a text prompt, got a message payload",
            )),
        }
    }

    /// The dialect's stop sequences followed by the caller's, deduplicated.
    pub fn stop_sequences(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for stop in self
            .rendered
            .stop_sequences()
            .iter()
            .chain(&self.options.stop_sequences)
        {
            if !out.contains(stop) {
                out.push(stop.clone());
            }
        }
        out
    }
}

/// Per-stream decoding state shared across frames.
#[derive(Debug, Default)]
pub struct DecodeState {
    next_tool: u32,
}

impl DecodeState {
    /// Allocates the next tool-call index, for providers that deliver whole
    /// calls without an index of their own.
    pub fn next_tool_index(&mut self) -> u32 {
        let index = self.next_tool;
        self.next_tool += 1;
        index
    }
}

/// The HTTP half of a provider family.
pub trait Endpoint: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether the endpoint takes a single prompt string rather than a
    /// message list.
    fn accepts_text(&self) -> bool;

    /// The request URL.
    fn url(&self, model: &ModelConfig, stream: bool) -> String;

    /// Auth and content headers.
    fn headers(&self, model: &ModelConfig) -> Result<HeaderMap, LlmError>;

    /// The JSON request body.
    fn body(&self, parts: &RequestParts<'_>) -> Result<Value, LlmError>;

    /// How streamed responses are framed.
    fn framing(&self) -> Framing {
        Framing::Sse
    }

    /// Decodes a blocking response body.
    fn decode_response(&self, body: &str) -> Result<Vec<StreamEvent>, LlmError>;

    /// Decodes one stream frame.
    fn decode_frame(
        &self,
        frame: &Frame,
        state: &mut DecodeState,
    ) -> Result<Vec<StreamEvent>, LlmError>;

    /// Maps a non-2xx response.
    fn convert_error(&self, status: http::StatusCode, body: &str) -> LlmError {
        provider_error(status, body)
    }
}

static OPEN_AI: OpenAiEndpoint = OpenAiEndpoint;
static ANTHROPIC: AnthropicEndpoint = AnthropicEndpoint;
static ANTHROPIC_MESSAGES: AnthropicMessagesEndpoint = AnthropicMessagesEndpoint;
static GEMINI: GeminiEndpoint = GeminiEndpoint;
static HUGGING_FACE: HuggingFaceEndpoint = HuggingFaceEndpoint;
static OLLAMA: OllamaEndpoint = OllamaEndpoint;

/// The endpoint serving `model`.
///
/// Anthropic and Hugging Face expose both a text and a message API; the
/// model's dialect decides which one is used.
pub fn endpoint_for(model: &ModelConfig) -> &'static dyn Endpoint {
    let kind = model.dialect_kind();
    match model.provider {
        Provider::OpenAi | Provider::Vllm => &OPEN_AI,
        Provider::Anthropic if kind == DialectKind::Claude => &ANTHROPIC,
        Provider::Anthropic => &ANTHROPIC_MESSAGES,
        Provider::Gemini => &GEMINI,
        Provider::HuggingFace if kind.is_text() => &HUGGING_FACE,
        Provider::HuggingFace => &OPEN_AI,
        Provider::Ollama => &OLLAMA,
    }
}

/// Rejects a dialect whose payload shape the endpoint cannot send.
pub fn check_compatible(endpoint: &dyn Endpoint, dialect: DialectKind) -> Result<(), LlmError> {
    if endpoint.accepts_text() == dialect.is_text() {
        return Ok(());
    }
    let (renders, expects) = if dialect.is_text() {
        ("a text prompt", "messages")
    } else {
        ("messages", "a text prompt")
    };
    Err(LlmError::configuration(format!(
        "dialect {dialect:?} renders {renders} but the {} endpoint expects {expects}",
        endpoint.name()
    )))
}

/// A non-2xx response as a [`LlmError::Provider`], with the message pulled
/// out of the common error-body shapes when possible.
pub fn provider_error(status: http::StatusCode, body: &str) -> LlmError {
    LlmError::Provider {
        status: Some(status),
        message: error_message(body).unwrap_or_else(|| body.to_owned()),
        body: body.to_owned(),
        retryable: llm_dialects::error::is_retryable_status(status),
    }
}

/// Handles `{"error": {"message": ..}}`, `{"error": ".."}`,
/// `{"message": ..}`, and a one-element array of any of those.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let value = match value {
        Value::Array(items) => items.into_iter().next()?,
        other => other,
    };
    let error = value.get("error").unwrap_or(&value);
    match error {
        Value::String(message) => Some(message.clone()),
        _ => error.get("message").and_then(Value::as_str).map(str::to_owned),
    }
}

/// A transport failure as a [`LlmError`].
pub(crate) fn transport_error(err: &reqwest::Error, timeout: Duration) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout {
            elapsed_ms: millis(timeout),
            phase: llm_dialects::error::TimeoutPhase::Request,
        }
    } else {
        LlmError::Provider {
            status: err.status().map(|s| {
                http::StatusCode::from_u16(s.as_u16())
                    .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
            }),
            message: format!("transport error: {err}"),
            body: String::new(),
            retryable: true,
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, LlmError> {
    HeaderValue::from_str(value)
        .map_err(|_| LlmError::configuration("API key contains invalid header characters"))
}

pub(crate) fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers
}

/// Inserts `authorization: Bearer <key>` unless the key is empty.
pub(crate) fn bearer(headers: &mut HeaderMap, api_key: &str) -> Result<(), LlmError> {
    if !api_key.is_empty() {
        headers.insert("authorization", header_value(&format!("Bearer {api_key}"))?);
    }
    Ok(())
}

/// Parses a blocking response body.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &str, provider: &str) -> Result<T, LlmError> {
    serde_json::from_str(body).map_err(|e| LlmError::ResponseFormat {
        message: format!("failed to parse {provider} response: {e}"),
        raw: body.to_owned(),
    })
}

/// Parses a stream frame, logging and skipping one that does not parse.
pub(crate) fn parse_frame<T: DeserializeOwned>(frame: &Frame, provider: &str) -> Option<T> {
    match serde_json::from_str(&frame.data) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            tracing::warn!(provider, error = %e, "skipping unparseable stream frame");
            None
        }
    }
}

/// Inserts `key: value` when `value` is `Some`.
pub(crate) fn insert_opt<T: serde::Serialize>(body: &mut Value, key: &str, value: Option<T>) {
    if let (Some(value), Some(map)) = (value, body.as_object_mut()) {
        map.insert(key.to_owned(), serde_json::json!(value));
    }
}

/// A tool call delivered whole: a start event plus one argument delta.
pub(crate) fn whole_call(
    index: u32,
    id: String,
    name: String,
    arguments: &Value,
) -> [StreamEvent; 2] {
    let json_chunk = if arguments.is_null() {
        "{}".to_owned()
    } else {
        arguments.to_string()
    };
    [
        StreamEvent::ToolCallStart { index, id, name },
        StreamEvent::ToolCallDelta { index, json_chunk },
    ]
}
