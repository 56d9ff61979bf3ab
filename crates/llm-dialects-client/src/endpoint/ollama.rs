//! Ollama `/api/chat`.

use llm_dialects::stream::StopReason;
use llm_dialects::{LlmError, ModelConfig, StreamEvent, Usage};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    DecodeState, Endpoint, RequestParts, bearer, json_headers, parse_body, parse_frame, whole_call,
};
use crate::framing::{Frame, Framing};

/// The Ollama chat wire format. Messages use the `OpenAI` shape except that
/// tool-call arguments are JSON objects rather than strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaEndpoint;

/// Rewrites `tool_calls[].function.arguments` from a JSON string into the
/// object Ollama expects.
fn ollama_message(message: &Value) -> Value {
    let mut message = message.clone();
    if let Some(calls) = message.get_mut("tool_calls").and_then(Value::as_array_mut) {
        for call in calls {
            if let Some(arguments) = call.pointer_mut("/function/arguments") {
                if let Some(parsed) = arguments
                    .as_str()
                    .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                {
                    *arguments = parsed;
                }
            }
        }
    }
    message
}

impl Endpoint for OllamaEndpoint {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn accepts_text(&self) -> bool {
        false
    }

    fn url(&self, model: &ModelConfig, _stream: bool) -> String {
        let base = model.url.trim_end_matches('/');
        if base.ends_with("/api/chat") {
            base.to_owned()
        } else {
            format!("{base}/api/chat")
        }
    }

    fn headers(&self, model: &ModelConfig) -> Result<HeaderMap, LlmError> {
        let mut headers = json_headers();
        bearer(&mut headers, &model.api_key)?;
        Ok(headers)
    }

    fn body(&self, parts: &RequestParts<'_>) -> Result<Value, LlmError> {
        let chat = parts.chat()?;
        let mut messages = Vec::with_capacity(chat.messages.len() + 1);
        if let Some(system) = chat.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(chat.messages.iter().map(ollama_message));

        // Ollama streams unless told otherwise.
        let mut body = json!({
            "model": parts.model.name,
            "messages": messages,
            "stream": parts.stream,
        });
        if !chat.tools.is_empty() {
            body["tools"] = Value::Array(chat.tools.clone());
        }

        let options = parts.options;
        let mut model_options = Map::new();
        if let Some(temperature) = options.temperature {
            model_options.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = options.top_p {
            model_options.insert("top_p".into(), json!(top_p));
        }
        if let Some(max_tokens) = options.max_tokens {
            model_options.insert("num_predict".into(), json!(max_tokens));
        }
        let stop = parts.stop_sequences();
        if !stop.is_empty() {
            model_options.insert("stop".into(), json!(stop));
        }
        if !model_options.is_empty() {
            body["options"] = Value::Object(model_options);
        }
        if let Some(schema) = &options.response_schema {
            body["format"] = schema.as_value().clone();
        }
        Ok(body)
    }

    fn framing(&self) -> Framing {
        Framing::JsonLines
    }

    fn decode_response(&self, body: &str) -> Result<Vec<StreamEvent>, LlmError> {
        let chunk: Chunk = parse_body(body, "Ollama")?;
        Ok(decode(chunk, &mut DecodeState::default()))
    }

    fn decode_frame(
        &self,
        frame: &Frame,
        state: &mut DecodeState,
    ) -> Result<Vec<StreamEvent>, LlmError> {
        Ok(parse_frame::<Chunk>(frame, "Ollama")
            .map(|chunk| decode(chunk, state))
            .unwrap_or_default())
    }
}

fn decode(chunk: Chunk, state: &mut DecodeState) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(message) = chunk.message {
        if let Some(text) = message.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::TextDelta(text));
        }
        for call in message.tool_calls.unwrap_or_default() {
            let index = state.next_tool_index();
            events.extend(whole_call(
                index,
                String::new(),
                call.function.name,
                &call.function.arguments,
            ));
        }
    }
    if chunk.done {
        if chunk.prompt_eval_count.is_some() || chunk.eval_count.is_some() {
            events.push(StreamEvent::Usage(Usage::new(
                chunk.prompt_eval_count.unwrap_or_default(),
                chunk.eval_count.unwrap_or_default(),
            )));
        }
        events.push(StreamEvent::Done {
            stop_reason: StopReason::from_provider(chunk.done_reason.as_deref().unwrap_or("stop")),
        });
    }
    events
}

#[derive(Debug, Deserialize)]
struct Chunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    function: ChunkFunction,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[cfg(test)]
mod tests {
    use llm_dialects::dialect::ChatPayload;
    use llm_dialects::{Provider, RenderedPrompt};

    use super::*;
    use crate::options::GenerateOptions;

    #[test]
    fn test_body_converts_tool_arguments() {
        let rendered = RenderedPrompt::Chat(ChatPayload {
            messages: vec![json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "search", "arguments": "{\"query\":\"rust\"}"}}]
            })],
            ..Default::default()
        });
        let model = ModelConfig::new(Provider::Ollama, "llama3");
        let options = GenerateOptions::default();
        let body = OllamaEndpoint
            .body(&RequestParts {
                rendered: &rendered,
                model: &model,
                options: &options,
                stream: false,
            })
            .unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(
            body["messages"][0]["tool_calls"][0]["function"]["arguments"],
            json!({"query": "rust"})
        );
    }

    #[test]
    fn test_url() {
        let model = ModelConfig::new(Provider::Ollama, "llama3");
        assert_eq!(OllamaEndpoint.url(&model, true), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_decode_final_line() {
        let body = json!({
            "message": {"role": "assistant", "content": ""},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 26,
            "eval_count": 12
        })
        .to_string();
        let events = OllamaEndpoint.decode_response(&body).unwrap();
        assert_eq!(events, vec![
            StreamEvent::Usage(Usage::new(26, 12)),
            StreamEvent::Done {
                stop_reason: StopReason::EndTurn
            },
        ]);
    }
}
