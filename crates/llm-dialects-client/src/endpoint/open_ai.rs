//! `OpenAI` chat completions, also served by Azure `OpenAI`, vLLM, and
//! text-generation-inference's messages API.

use llm_dialects::stream::StopReason;
use llm_dialects::{LlmError, ModelConfig, StreamEvent, Usage};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    DecodeState, Endpoint, RequestParts, bearer, header_value, insert_opt, json_headers, parse_body,
    parse_frame,
};
use crate::framing::Frame;

/// The `/v1/chat/completions` wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiEndpoint;

fn is_azure(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.ends_with("azure.com")))
        .unwrap_or(false)
}

impl Endpoint for OpenAiEndpoint {
    fn name(&self) -> &'static str {
        "open_ai"
    }

    fn accepts_text(&self) -> bool {
        false
    }

    fn url(&self, model: &ModelConfig, _stream: bool) -> String {
        model.url.clone()
    }

    fn headers(&self, model: &ModelConfig) -> Result<HeaderMap, LlmError> {
        let mut headers = json_headers();
        if is_azure(&model.url) {
            headers.insert("api-key", header_value(&model.api_key)?);
        } else {
            bearer(&mut headers, &model.api_key)?;
        }
        Ok(headers)
    }

    fn body(&self, parts: &RequestParts<'_>) -> Result<Value, LlmError> {
        let chat = parts.chat()?;
        let mut messages = Vec::with_capacity(chat.messages.len() + 1);
        if let Some(system) = chat.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(chat.messages.iter().cloned());

        let mut body = json!({
            "model": parts.model.name,
            "messages": messages,
        });
        if !chat.tools.is_empty() {
            body["tools"] = Value::Array(chat.tools.clone());
        }
        insert_opt(&mut body, "tool_choice", chat.tool_choice.as_ref());
        let stop = parts.stop_sequences();
        if !stop.is_empty() {
            body["stop"] = json!(stop);
        }
        insert_opt(&mut body, "temperature", parts.options.temperature);
        insert_opt(&mut body, "top_p", parts.options.top_p);
        insert_opt(&mut body, "max_tokens", parts.options.max_tokens);
        insert_opt(&mut body, "user", parts.options.user.as_ref());
        if let Some(schema) = &parts.options.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema.as_value(),
                    // derived schemas allow optional and extra keys, which strict mode rejects
                    "strict": false,
                },
            });
        }
        if parts.stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        Ok(body)
    }

    fn decode_response(&self, body: &str) -> Result<Vec<StreamEvent>, LlmError> {
        let response: Response = parse_body(body, "OpenAI")?;
        let mut events = Vec::new();
        let mut finish = None;
        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta(text));
            }
            let calls = choice.message.tool_calls.unwrap_or_default();
            for (index, call) in calls.into_iter().enumerate() {
                let index = u32::try_from(index).unwrap_or(u32::MAX);
                events.push(StreamEvent::ToolCallStart {
                    index,
                    id: call.id,
                    name: call.function.name,
                });
                events.push(StreamEvent::ToolCallDelta {
                    index,
                    json_chunk: call.function.arguments,
                });
            }
            finish = choice.finish_reason;
        }
        if let Some(usage) = response.usage {
            events.push(StreamEvent::Usage(usage.into()));
        }
        if let Some(reason) = finish {
            events.push(StreamEvent::Done {
                stop_reason: StopReason::from_provider(&reason),
            });
        }
        Ok(events)
    }

    fn decode_frame(
        &self,
        frame: &Frame,
        _state: &mut DecodeState,
    ) -> Result<Vec<StreamEvent>, LlmError> {
        if frame.data == "[DONE]" {
            return Ok(Vec::new());
        }
        let Some(chunk) = parse_frame::<StreamChunk>(frame, "OpenAI") else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta(text));
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                if let Some(id) = call.id {
                    events.push(StreamEvent::ToolCallStart {
                        index: call.index,
                        id,
                        name: function.name.unwrap_or_default(),
                    });
                }
                if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                    events.push(StreamEvent::ToolCallDelta {
                        index: call.index,
                        json_chunk: arguments,
                    });
                }
            }
            if let Some(reason) = choice.finish_reason {
                events.push(StreamEvent::Done {
                    stop_reason: StopReason::from_provider(&reason),
                });
            }
        }
        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::Usage(usage.into()));
        }
        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<u64>,
}

impl From<ResponseUsage> for Usage {
    fn from(usage: ResponseUsage) -> Self {
        Self {
            cache_read_tokens: usage.prompt_tokens_details.and_then(|d| d.cached_tokens),
            ..Usage::new(usage.prompt_tokens, usage.completion_tokens)
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use llm_dialects::dialect::ChatPayload;
    use llm_dialects::tool::JsonSchema;
    use llm_dialects::{Provider, RenderedPrompt};

    use super::*;
    use crate::options::GenerateOptions;

    fn chat() -> RenderedPrompt {
        RenderedPrompt::Chat(ChatPayload {
            messages: vec![
                json!({"role": "system", "content": "be brief"}),
                json!({"role": "user", "content": "hi"}),
            ],
            ..Default::default()
        })
    }

    #[test]
    fn test_body_minimal() {
        let rendered = chat();
        let model = ModelConfig::default();
        let options = GenerateOptions::default();
        let body = OpenAiEndpoint
            .body(&RequestParts {
                rendered: &rendered,
                model: &model,
                options: &options,
                stream: false,
            })
            .unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert!(body.get("stream").is_none());
        assert!(body.get("tools").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_body_streaming_with_options() {
        let rendered = chat();
        let model = ModelConfig::default();
        let options = GenerateOptions {
            temperature: Some(0.5),
            max_tokens: Some(100),
            response_schema: Some(JsonSchema::new(json!({"type": "object"}))),
            ..Default::default()
        };
        let body = OpenAiEndpoint
            .body(&RequestParts {
                rendered: &rendered,
                model: &model,
                options: &options,
                stream: true,
            })
            .unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["response_format"]["type"], "json_schema");
    }

    #[cfg(feature = "schema")]
    #[test]
    fn test_derived_schema_sent_without_strict_mode() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct Verdict {
            sentiment: String,
            score: u32,
        }
        let schema = JsonSchema::from_type::<Verdict>().unwrap();
        let rendered = chat();
        let model = ModelConfig::default();
        let options = GenerateOptions {
            response_schema: Some(schema.clone()),
            ..Default::default()
        };
        let body = OpenAiEndpoint
            .body(&RequestParts {
                rendered: &rendered,
                model: &model,
                options: &options,
                stream: false,
            })
            .unwrap();
        let format = &body["response_format"]["json_schema"];
        assert_eq!(format["strict"], false);
        assert_eq!(&format["schema"], schema.as_value());
    }

    #[test]
    fn test_text_payload_rejected() {
        let rendered = RenderedPrompt::Text(llm_dialects::dialect::TextPayload::default());
        let model = ModelConfig::default();
        let options = GenerateOptions::default();
        let err = OpenAiEndpoint
            .body(&RequestParts {
                rendered: &rendered,
                model: &model,
                options: &options,
                stream: false,
            })
            .unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));
    }

    #[test]
    fn test_azure_uses_api_key_header() {
        let model = ModelConfig::new(Provider::OpenAi, "gpt-4o")
            .with_url("https://acme.openai.azure.com/openai/deployments/gpt4/chat/completions")
            .with_api_key("secret");
        let headers = OpenAiEndpoint.headers(&model).unwrap();
        assert_eq!(headers.get("api-key").unwrap(), "secret");
        assert!(headers.get("authorization").is_none());

        let model = ModelConfig::default().with_api_key("sk-test");
        let headers = OpenAiEndpoint.headers(&model).unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-test");
    }

    #[test]
    fn test_invalid_key_is_configuration_error() {
        let model = ModelConfig::default().with_api_key("bad\nkey");
        assert!(matches!(
            OpenAiEndpoint.headers(&model),
            Err(LlmError::Configuration(_))
        ));
    }

    #[test]
    fn test_decode_blocking_tool_call() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"query\":\"rust\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        })
        .to_string();
        let events = OpenAiEndpoint.decode_response(&body).unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StreamEvent::ToolCallStart { id, .. } if id == "call_1"));
        assert_eq!(events[2], StreamEvent::Usage(Usage::new(12, 7)));
        assert_eq!(
            events[3],
            StreamEvent::Done {
                stop_reason: StopReason::ToolUse
            }
        );
    }

    #[test]
    fn test_decode_unparseable_body() {
        let err = OpenAiEndpoint.decode_response("not json").unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat { raw, .. } if raw == "not json"));
    }

    #[test]
    fn test_decode_stream_tool_deltas() {
        let mut state = DecodeState::default();
        let frame = |data: &str| Frame {
            event: None,
            data: data.into(),
        };
        let first = OpenAiEndpoint
            .decode_frame(
                &frame(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"search","arguments":""}}]}}]}"#),
                &mut state,
            )
            .unwrap();
        assert!(matches!(&first[..], [StreamEvent::ToolCallStart { name, .. }] if name == "search"));
        let second = OpenAiEndpoint
            .decode_frame(
                &frame(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":1}"}}]}}]}"#),
                &mut state,
            )
            .unwrap();
        assert!(matches!(&second[..], [StreamEvent::ToolCallDelta { index: 0, .. }]));
        assert!(OpenAiEndpoint.decode_frame(&frame("[DONE]"), &mut state).unwrap().is_empty());
        assert!(OpenAiEndpoint.decode_frame(&frame("{oops"), &mut state).unwrap().is_empty());
    }
}
