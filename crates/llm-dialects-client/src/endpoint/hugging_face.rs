//! Hugging Face text-generation-inference `/generate`.

use llm_dialects::stream::StopReason;
use llm_dialects::{LlmError, ModelConfig, StreamEvent, Usage};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{DecodeState, Endpoint, RequestParts, bearer, json_headers, parse_body, parse_frame};
use crate::framing::Frame;

/// Default `max_new_tokens`; TGI's own default is tiny.
const DEFAULT_MAX_NEW_TOKENS: u32 = 2000;

/// The TGI `/generate` and `/generate_stream` wire format for instruction
/// templates (Llama 2, Mixtral, Orca).
#[derive(Debug, Clone, Copy, Default)]
pub struct HuggingFaceEndpoint;

impl Endpoint for HuggingFaceEndpoint {
    fn name(&self) -> &'static str {
        "hugging_face"
    }

    fn accepts_text(&self) -> bool {
        true
    }

    fn url(&self, model: &ModelConfig, stream: bool) -> String {
        let base = model.url.trim_end_matches('/');
        if stream {
            format!("{base}/generate_stream")
        } else {
            format!("{base}/generate")
        }
    }

    fn headers(&self, model: &ModelConfig) -> Result<HeaderMap, LlmError> {
        let mut headers = json_headers();
        bearer(&mut headers, &model.api_key)?;
        Ok(headers)
    }

    fn body(&self, parts: &RequestParts<'_>) -> Result<Value, LlmError> {
        let text = parts.text()?;
        let options = parts.options;
        let mut parameters = Map::new();
        parameters.insert(
            "max_new_tokens".into(),
            json!(options.max_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS)),
        );
        parameters.insert("return_full_text".into(), json!(false));
        parameters.insert("details".into(), json!(true));
        if let Some(temperature) = options.temperature {
            parameters.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = options.top_p {
            parameters.insert("top_p".into(), json!(top_p));
        }
        let stop = parts.stop_sequences();
        if !stop.is_empty() {
            parameters.insert("stop".into(), json!(stop));
        }
        let mut body = json!({
            "inputs": text.prompt,
            "parameters": parameters,
        });
        if parts.stream {
            body["stream"] = json!(true);
        }
        Ok(body)
    }

    fn decode_response(&self, body: &str) -> Result<Vec<StreamEvent>, LlmError> {
        let response: Generated = parse_body(body, "Hugging Face")?;
        let mut events = Vec::new();
        if !response.generated_text.is_empty() {
            events.push(StreamEvent::TextDelta(response.generated_text));
        }
        events.extend(details_events(response.details));
        Ok(events)
    }

    fn decode_frame(
        &self,
        frame: &Frame,
        _state: &mut DecodeState,
    ) -> Result<Vec<StreamEvent>, LlmError> {
        let Some(chunk) = parse_frame::<StreamToken>(frame, "Hugging Face") else {
            return Ok(Vec::new());
        };
        let mut events = Vec::new();
        if let Some(token) = chunk.token.filter(|t| !t.special && !t.text.is_empty()) {
            events.push(StreamEvent::TextDelta(token.text));
        }
        events.extend(details_events(chunk.details));
        Ok(events)
    }
}

/// TGI reports generated tokens but not prompt tokens; the client fills
/// the prompt count from the tokenizer.
fn details_events(details: Option<Details>) -> Vec<StreamEvent> {
    let Some(details) = details else {
        return Vec::new();
    };
    let mut events = Vec::new();
    if let Some(generated) = details.generated_tokens {
        events.push(StreamEvent::Usage(Usage::new(0, generated)));
    }
    let reason = details.finish_reason.unwrap_or_default();
    events.push(StreamEvent::Done {
        stop_reason: StopReason::from_provider(&reason),
    });
    events
}

#[derive(Debug, Deserialize)]
struct Generated {
    #[serde(default)]
    generated_text: String,
    details: Option<Details>,
}

#[derive(Debug, Deserialize)]
struct Details {
    finish_reason: Option<String>,
    generated_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamToken {
    token: Option<Token>,
    details: Option<Details>,
}

#[derive(Debug, Deserialize)]
struct Token {
    #[serde(default)]
    text: String,
    #[serde(default)]
    special: bool,
}
