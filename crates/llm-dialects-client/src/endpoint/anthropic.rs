//! Anthropic text completions (`/v1/complete`).

use llm_dialects::stream::StopReason;
use llm_dialects::{LlmError, ModelConfig, StreamEvent};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    DecodeState, Endpoint, RequestParts, header_value, insert_opt, json_headers, parse_body,
    parse_frame,
};
use crate::framing::Frame;

/// `max_tokens` sent when the caller sets none; both Anthropic APIs
/// require it.
pub(super) const DEFAULT_MAX_TOKENS: u32 = 4096;

const API_VERSION: &str = "2023-06-01";

pub(super) fn anthropic_headers(model: &ModelConfig) -> Result<HeaderMap, LlmError> {
    let mut headers = json_headers();
    headers.insert("x-api-key", header_value(&model.api_key)?);
    headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
    Ok(headers)
}

/// An in-stream `error` event. `overloaded_error` and `api_error` are
/// transient.
pub(super) fn stream_error(error: &Value, raw: &str) -> LlmError {
    let kind = error.get("type").and_then(Value::as_str).unwrap_or_default();
    LlmError::Provider {
        status: None,
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(kind)
            .to_owned(),
        body: raw.to_owned(),
        retryable: matches!(kind, "overloaded_error" | "api_error"),
    }
}

/// The legacy `/v1/complete` wire format used by Claude 2 and Claude
/// Instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicEndpoint;

impl Endpoint for AnthropicEndpoint {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn accepts_text(&self) -> bool {
        true
    }

    fn url(&self, model: &ModelConfig, _stream: bool) -> String {
        match model.url.strip_suffix("/v1/messages") {
            Some(base) => format!("{base}/v1/complete"),
            None => model.url.clone(),
        }
    }

    fn headers(&self, model: &ModelConfig) -> Result<HeaderMap, LlmError> {
        anthropic_headers(model)
    }

    fn body(&self, parts: &RequestParts<'_>) -> Result<Value, LlmError> {
        let text = parts.text()?;
        let mut body = json!({
            "model": parts.model.name,
            "prompt": text.prompt,
            "max_tokens_to_sample": parts.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        let stop = parts.stop_sequences();
        if !stop.is_empty() {
            body["stop_sequences"] = json!(stop);
        }
        insert_opt(&mut body, "temperature", parts.options.temperature);
        insert_opt(&mut body, "top_p", parts.options.top_p);
        if let Some(user) = &parts.options.user {
            body["metadata"] = json!({"user_id": user});
        }
        if parts.stream {
            body["stream"] = json!(true);
        }
        Ok(body)
    }

    fn decode_response(&self, body: &str) -> Result<Vec<StreamEvent>, LlmError> {
        let response: Completion = parse_body(body, "Anthropic")?;
        let mut events = Vec::new();
        if !response.completion.is_empty() {
            events.push(StreamEvent::TextDelta(response.completion));
        }
        events.push(StreamEvent::Done {
            stop_reason: StopReason::from_provider(response.stop_reason.as_deref().unwrap_or("end_turn")),
        });
        Ok(events)
    }

    fn decode_frame(
        &self,
        frame: &Frame,
        _state: &mut DecodeState,
    ) -> Result<Vec<StreamEvent>, LlmError> {
        match frame.event.as_deref() {
            Some("ping") => return Ok(Vec::new()),
            Some("error") => {
                let error = serde_json::from_str::<Value>(&frame.data)
                    .ok()
                    .and_then(|v| v.get("error").cloned())
                    .unwrap_or(Value::Null);
                return Err(stream_error(&error, &frame.data));
            }
            _ => {}
        }
        let Some(chunk) = parse_frame::<Completion>(frame, "Anthropic") else {
            return Ok(Vec::new());
        };
        let mut events = Vec::new();
        if !chunk.completion.is_empty() {
            events.push(StreamEvent::TextDelta(chunk.completion));
        }
        if let Some(reason) = chunk.stop_reason {
            events.push(StreamEvent::Done {
                stop_reason: StopReason::from_provider(&reason),
            });
        }
        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    completion: String,
    stop_reason: Option<String>,
}
