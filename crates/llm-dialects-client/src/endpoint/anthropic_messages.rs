//! Anthropic Messages API.

use llm_dialects::stream::StopReason;
use llm_dialects::{LlmError, ModelConfig, StreamEvent, Usage};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use super::anthropic::{DEFAULT_MAX_TOKENS, anthropic_headers, stream_error};
use super::{DecodeState, Endpoint, RequestParts, insert_opt, parse_body, parse_frame, whole_call};
use crate::framing::Frame;

/// The `/v1/messages` wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicMessagesEndpoint;

impl Endpoint for AnthropicMessagesEndpoint {
    fn name(&self) -> &'static str {
        "anthropic_messages"
    }

    fn accepts_text(&self) -> bool {
        false
    }

    fn url(&self, model: &ModelConfig, _stream: bool) -> String {
        model.url.clone()
    }

    fn headers(&self, model: &ModelConfig) -> Result<HeaderMap, LlmError> {
        anthropic_headers(model)
    }

    fn body(&self, parts: &RequestParts<'_>) -> Result<Value, LlmError> {
        let chat = parts.chat()?;
        let mut body = json!({
            "model": parts.model.name,
            "max_tokens": parts.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": chat.messages,
        });
        insert_opt(&mut body, "system", chat.system.as_ref().filter(|s| !s.is_empty()));
        if !chat.tools.is_empty() {
            body["tools"] = Value::Array(chat.tools.clone());
        }
        insert_opt(&mut body, "tool_choice", chat.tool_choice.as_ref());
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
        let response: Response = parse_body(body, "Anthropic")?;
        let mut events = Vec::new();
        let mut tool_index = 0;
        for block in response.content {
            match block {
                ContentBlock::Text { text } if !text.is_empty() => {
                    events.push(StreamEvent::TextDelta(text));
                }
                ContentBlock::ToolUse { id, name, input } => {
                    events.extend(whole_call(tool_index, id, name, &input));
                    tool_index += 1;
                }
                _ => {}
            }
        }
        if let Some(usage) = response.usage {
            events.push(StreamEvent::Usage(usage.into()));
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
        let Some(event) = parse_frame::<StreamPayload>(frame, "Anthropic") else {
            return Ok(Vec::new());
        };
        let events = match event {
            StreamPayload::MessageStart { message } => message
                .usage
                .map(|u| vec![StreamEvent::Usage(u.into())])
                .unwrap_or_default(),
            StreamPayload::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse { id, name, .. },
            } => vec![StreamEvent::ToolCallStart { index, id, name }],
            StreamPayload::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } if !text.is_empty() => {
                    vec![StreamEvent::TextDelta(text)]
                }
                BlockDelta::InputJsonDelta { partial_json } if !partial_json.is_empty() => {
                    vec![StreamEvent::ToolCallDelta {
                        index,
                        json_chunk: partial_json,
                    }]
                }
                _ => Vec::new(),
            },
            StreamPayload::MessageDelta { delta, usage } => {
                let mut events = Vec::new();
                if let Some(usage) = usage {
                    events.push(StreamEvent::Usage(usage.into()));
                }
                if let Some(reason) = delta.stop_reason {
                    events.push(StreamEvent::Done {
                        stop_reason: StopReason::from_provider(&reason),
                    });
                }
                events
            }
            StreamPayload::Error { error } => return Err(stream_error(&error, &frame.data)),
            _ => Vec::new(),
        };
        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    cache_read_input_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
}

impl From<ResponseUsage> for Usage {
    fn from(usage: ResponseUsage) -> Self {
        Self {
            cache_read_tokens: usage.cache_read_input_tokens,
            cache_write_tokens: usage.cache_creation_input_tokens,
            ..Usage::new(usage.input_tokens, usage.output_tokens)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<ResponseUsage>,
    },
    Error {
        error: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use llm_dialects::dialect::ChatPayload;
    use llm_dialects::{Provider, RenderedPrompt};

    use super::*;
    use crate::options::GenerateOptions;

    fn frame(event: &str, data: Value) -> Frame {
        Frame {
            event: Some(event.into()),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_body_system_top_level() {
        let rendered = RenderedPrompt::Chat(ChatPayload {
            system: Some("be brief".into()),
            messages: vec![json!({"role": "user", "content": "hi"})],
            ..Default::default()
        });
        let model = ModelConfig::new(Provider::Anthropic, "claude-3-opus");
        let options = GenerateOptions::default();
        let body = AnthropicMessagesEndpoint
            .body(&RequestParts {
                rendered: &rendered,
                model: &model,
                options: &options,
                stream: true,
            })
            .unwrap();
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_decode_blocking_mixed_content() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Searching."},
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"query": "rust"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 9}
        })
        .to_string();
        let events = AnthropicMessagesEndpoint.decode_response(&body).unwrap();
        assert_eq!(events[0], StreamEvent::TextDelta("Searching.".into()));
        assert!(matches!(
            &events[2],
            StreamEvent::ToolCallDelta { json_chunk, .. } if json_chunk.contains("rust")
        ));
        assert_eq!(events[3], StreamEvent::Usage(Usage::new(20, 9)));
    }

    #[test]
    fn test_decode_stream_events() {
        let mut state = DecodeState::default();
        let endpoint = AnthropicMessagesEndpoint;
        let start = endpoint
            .decode_frame(
                &frame("message_start", json!({"type": "message_start", "message": {"usage": {"input_tokens": 25, "output_tokens": 1}}})),
                &mut state,
            )
            .unwrap();
        assert_eq!(start, vec![StreamEvent::Usage(Usage::new(25, 1))]);

        let tool = endpoint
            .decode_frame(
                &frame("content_block_start", json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "t1", "name": "search", "input": {}}})),
                &mut state,
            )
            .unwrap();
        assert!(matches!(&tool[..], [StreamEvent::ToolCallStart { index: 1, .. }]));

        let delta = endpoint
            .decode_frame(
                &frame("content_block_delta", json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"q\""}})),
                &mut state,
            )
            .unwrap();
        assert!(matches!(&delta[..], [StreamEvent::ToolCallDelta { index: 1, .. }]));

        let end = endpoint
            .decode_frame(
                &frame("message_delta", json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 15}})),
                &mut state,
            )
            .unwrap();
        assert_eq!(end[1], StreamEvent::Done {
            stop_reason: StopReason::ToolUse
        });

        let ping = endpoint
            .decode_frame(&frame("ping", json!({"type": "ping"})), &mut state)
            .unwrap();
        assert!(ping.is_empty());
    }

    #[test]
    fn test_stream_error_event() {
        let mut state = DecodeState::default();
        let err = AnthropicMessagesEndpoint
            .decode_frame(
                &frame("error", json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})),
                &mut state,
            )
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, LlmError::Provider { message, .. } if message == "Overloaded"));
    }
}
