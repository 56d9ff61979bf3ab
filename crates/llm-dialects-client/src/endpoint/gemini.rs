//! Google Gemini `generateContent`.

use llm_dialects::stream::StopReason;
use llm_dialects::{LlmError, ModelConfig, StreamEvent, Usage};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    DecodeState, Endpoint, RequestParts, header_value, json_headers, parse_body, parse_frame,
    whole_call,
};
use crate::framing::Frame;

/// The `models/{model}:generateContent` wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiEndpoint;

impl Endpoint for GeminiEndpoint {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn accepts_text(&self) -> bool {
        false
    }

    fn url(&self, model: &ModelConfig, stream: bool) -> String {
        let base = model.url.trim_end_matches('/');
        if stream {
            format!("{base}/{}:streamGenerateContent?alt=sse", model.name)
        } else {
            format!("{base}/{}:generateContent", model.name)
        }
    }

    fn headers(&self, model: &ModelConfig) -> Result<HeaderMap, LlmError> {
        let mut headers = json_headers();
        headers.insert("x-goog-api-key", header_value(&model.api_key)?);
        Ok(headers)
    }

    fn body(&self, parts: &RequestParts<'_>) -> Result<Value, LlmError> {
        let chat = parts.chat()?;
        let mut body = json!({ "contents": chat.messages });
        if let Some(system) = chat.system.as_deref().filter(|s| !s.is_empty()) {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !chat.tools.is_empty() {
            body["tools"] = Value::Array(chat.tools.clone());
        }
        if let Some(choice) = &chat.tool_choice {
            body["toolConfig"] = choice.clone();
        }

        let mut generation = Map::new();
        let options = parts.options;
        if let Some(temperature) = options.temperature {
            generation.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = options.top_p {
            generation.insert("topP".into(), json!(top_p));
        }
        if let Some(max_tokens) = options.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        let stop = parts.stop_sequences();
        if !stop.is_empty() {
            generation.insert("stopSequences".into(), json!(stop));
        }
        if let Some(schema) = &options.response_schema {
            generation.insert("responseMimeType".into(), json!("application/json"));
            generation.insert("responseSchema".into(), schema.as_value().clone());
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        Ok(body)
    }

    fn decode_response(&self, body: &str) -> Result<Vec<StreamEvent>, LlmError> {
        let response: Response = parse_body(body, "Gemini")?;
        Ok(decode(response, &mut DecodeState::default()))
    }

    fn decode_frame(
        &self,
        frame: &Frame,
        state: &mut DecodeState,
    ) -> Result<Vec<StreamEvent>, LlmError> {
        Ok(parse_frame::<Response>(frame, "Gemini")
            .map(|chunk| decode(chunk, state))
            .unwrap_or_default())
    }
}

/// Blocking bodies and stream chunks share one shape. Function calls
/// arrive whole and carry no id.
fn decode(response: Response, state: &mut DecodeState) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let mut finish = None;
    if let Some(candidate) = response.candidates.into_iter().next() {
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta(text));
            }
            if let Some(call) = part.function_call {
                let index = state.next_tool_index();
                events.extend(whole_call(index, String::new(), call.name, &call.args));
            }
        }
        finish = candidate.finish_reason;
    }
    if let Some(usage) = response.usage_metadata {
        events.push(StreamEvent::Usage(Usage::new(
            usage.prompt_token_count,
            usage.candidates_token_count,
        )));
    }
    if let Some(reason) = finish {
        events.push(StreamEvent::Done {
            stop_reason: StopReason::from_provider(&reason),
        });
    }
    events
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[cfg(test)]
mod tests {
    use llm_dialects::dialect::ChatPayload;
    use llm_dialects::tool::JsonSchema;
    use llm_dialects::{Provider, RenderedPrompt};

    use super::*;
    use crate::options::GenerateOptions;

    #[test]
    fn test_urls() {
        let model = ModelConfig::new(Provider::Gemini, "gemini-1.5-pro");
        assert_eq!(
            GeminiEndpoint.url(&model, false),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent"
        );
        assert!(GeminiEndpoint.url(&model, true).ends_with(":streamGenerateContent?alt=sse"));
    }

    #[test]
    fn test_body_generation_config() {
        let rendered = RenderedPrompt::Chat(ChatPayload {
            system: Some("be brief".into()),
            messages: vec![json!({"role": "user", "parts": [{"text": "hi"}]})],
            ..Default::default()
        });
        let model = ModelConfig::new(Provider::Gemini, "gemini-pro");
        let options = GenerateOptions {
            max_tokens: Some(64),
            response_schema: Some(JsonSchema::new(json!({"type": "object"}))),
            ..Default::default()
        };
        let body = GeminiEndpoint
            .body(&RequestParts {
                rendered: &rendered,
                model: &model,
                options: &options,
                stream: false,
            })
            .unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_decode_function_call() {
        let body = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"functionCall": {"name": "search", "args": {"query": "rust"}}}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 4}
        })
        .to_string();
        let events = GeminiEndpoint.decode_response(&body).unwrap();
        assert!(matches!(
            &events[0],
            StreamEvent::ToolCallStart { index: 0, id, name } if id.is_empty() && name == "search"
        ));
        assert_eq!(events[2], StreamEvent::Usage(Usage::new(10, 4)));
        assert!(matches!(events[3], StreamEvent::Done { .. }));
    }

    #[test]
    fn test_stream_indices_continue_across_frames() {
        let mut state = DecodeState::default();
        let frame = Frame {
            event: None,
            data: json!({"candidates": [{"content": {"parts": [{"functionCall": {"name": "a", "args": {}}}]}}]}).to_string(),
        };
        GeminiEndpoint.decode_frame(&frame, &mut state).unwrap();
        let second = GeminiEndpoint.decode_frame(&frame, &mut state).unwrap();
        assert!(matches!(&second[0], StreamEvent::ToolCallStart { index: 1, .. }));
    }
}
