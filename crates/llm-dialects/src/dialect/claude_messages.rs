use serde_json::{Value, json};

use super::json_tools::parameters_schema;
use super::{ChatPayload, Dialect, DialectKind, RenderedPrompt, decode_call, prepare, schema_tokens};
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::prompt::{Message, Prompt};
use crate::tool::ToolDefinition;

/// Anthropic Messages API (Claude 3 and later).
///
/// The system text is a top-level field. Tool calls are `tool_use` blocks
/// on the assistant side and tool results are `tool_result` blocks on the
/// user side. The API requires alternating roles, so adjacent turns of the
/// same role are merged into one message with several content blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeMessages;

impl Dialect for ClaudeMessages {
    fn kind(&self) -> DialectKind {
        DialectKind::ClaudeMessages
    }

    fn supports_structured_tools(&self, _model: &ModelConfig) -> bool {
        true
    }

    fn tools(
        &self,
        tools: &[ToolDefinition],
        _model: &ModelConfig,
    ) -> Result<Vec<Value>, LlmError> {
        Ok(tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": parameters_schema(tool),
                })
            })
            .collect())
    }

    fn translate(&self, prompt: &Prompt, model: &ModelConfig) -> Result<RenderedPrompt, LlmError> {
        let tools = self.tools(prompt.tools(), model)?;
        let trimmed = prepare(
            self,
            &prompt.full_system_text(),
            prompt,
            model,
            schema_tokens(&tools, model),
        )?;

        let mut messages: Vec<Value> = Vec::with_capacity(trimmed.messages.len());
        for message in &trimmed.messages {
            let (role, block) = match message {
                Message::User { content, name } => {
                    let text = match name {
                        Some(name) => format!("{name}: {content}"),
                        None => content.clone(),
                    };
                    ("user", json!({"type": "text", "text": text}))
                }
                Message::Model { content } => ("assistant", json!({"type": "text", "text": content})),
                Message::ToolCall { .. } => {
                    let Some(call) = decode_call(message)? else {
                        continue;
                    };
                    (
                        "assistant",
                        json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": Value::Object(call.arguments),
                        }),
                    )
                }
                Message::Tool { id, content, .. } => (
                    "user",
                    json!({"type": "tool_result", "tool_use_id": id, "content": content}),
                ),
            };
            push_block(&mut messages, role, block);
        }

        let system = Some(trimmed.system).filter(|s| !s.is_empty());
        let tool_choice = prompt
            .tool_choice()
            .map(|name| json!({"type": "tool", "name": name}));
        Ok(RenderedPrompt::Chat(ChatPayload {
            system,
            messages: messages.into_iter().map(simplify).collect(),
            tools,
            tool_choice,
            stop_sequences: Vec::new(),
        }))
    }
}

fn push_block(messages: &mut Vec<Value>, role: &str, block: Value) {
    if let Some(blocks) = messages
        .last_mut()
        .filter(|m| m["role"] == role)
        .and_then(|m| m.get_mut("content"))
        .and_then(Value::as_array_mut)
    {
        blocks.push(block);
        return;
    }
    messages.push(json!({"role": role, "content": [block]}));
}

/// A message holding a single text block is sent with plain string content.
fn simplify(mut message: Value) -> Value {
    let single_text = match message["content"].as_array().map(Vec::as_slice) {
        Some([block]) if block["type"] == "text" => Some(block["text"].clone()),
        _ => None,
    };
    if let Some(text) = single_text {
        message["content"] = text;
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::tool::{ParamType, Parameter, ToolCall};

    fn model() -> ModelConfig {
        ModelConfig::new(Provider::Anthropic, "claude-3-opus")
    }

    fn render(prompt: &Prompt) -> ChatPayload {
        match ClaudeMessages.translate(prompt, &model()).unwrap() {
            RenderedPrompt::Chat(chat) => chat,
            RenderedPrompt::Text(_) => panic!("expected chat payload"),
        }
    }

    #[test]
    fn test_system_is_top_level() {
        let prompt = Prompt::new("You are a bot").with_messages([Message::user("hi")]).unwrap();
        let chat = render(&prompt);
        assert_eq!(chat.system.as_deref(), Some("You are a bot"));
        assert_eq!(chat.messages, vec![json!({"role": "user", "content": "hi"})]);
    }

    #[test]
    fn test_tool_use_and_result_blocks() {
        let tool = ToolDefinition::new("search", "Search")
            .with_parameter(Parameter::new("q", ParamType::String, "query").required());
        let args = json!({"q": "rust"}).as_object().cloned().unwrap();
        let prompt = Prompt::new("sys")
            .with_tools(vec![tool])
            .unwrap()
            .with_tool_choice("search")
            .unwrap()
            .with_messages([
                Message::user("look"),
                Message::tool_call(&ToolCall::new("toolu_1", "search", args)),
                Message::tool_result("toolu_1", None, "3 hits"),
            ])
            .unwrap();
        let chat = render(&prompt);
        assert_eq!(
            chat.messages[1],
            json!({"role": "assistant", "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "rust"}}
            ]})
        );
        assert_eq!(
            chat.messages[2],
            json!({"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "3 hits"}
            ]})
        );
        assert_eq!(chat.tools[0]["input_schema"]["required"], json!(["q"]));
        assert_eq!(chat.tool_choice, Some(json!({"type": "tool", "name": "search"})));
    }

    #[test]
    fn test_adjacent_user_turns_merge() {
        let prompt = Prompt::new("sys")
            .with_messages([Message::named_user("ann", "hi"), Message::named_user("bob", "yo")])
            .unwrap();
        let chat = render(&prompt);
        assert_eq!(
            chat.messages,
            vec![json!({"role": "user", "content": [
                {"type": "text", "text": "ann: hi"},
                {"type": "text", "text": "bob: yo"}
            ]})]
        );
    }

    #[test]
    fn test_empty_system_omitted() {
        let prompt = Prompt::new("").with_messages([Message::user("hi")]).unwrap();
        assert!(render(&prompt).system.is_none());
    }
}
