use serde_json::{Value, json};

use super::json_tools::parameters_schema;
use super::{
    ChatPayload, Dialect, DialectKind, RenderedPrompt, decode_call, prepare, schema_tokens,
    tool_name, xml_tools,
};
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::prompt::{Message, Prompt};
use crate::tool::ToolDefinition;

/// Framing tokens `OpenAI` adds to every chat message.
pub(super) const OPENAI_MESSAGE_OVERHEAD: usize = 4;

/// `OpenAI` chat completions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatGpt;

impl Dialect for ChatGpt {
    fn kind(&self) -> DialectKind {
        DialectKind::ChatGpt
    }

    fn supports_structured_tools(&self, _model: &ModelConfig) -> bool {
        true
    }

    fn per_message_overhead(&self) -> usize {
        OPENAI_MESSAGE_OVERHEAD
    }

    fn tools(
        &self,
        tools: &[ToolDefinition],
        _model: &ModelConfig,
    ) -> Result<Vec<Value>, LlmError> {
        Ok(openai_tools(tools))
    }

    fn translate(&self, prompt: &Prompt, model: &ModelConfig) -> Result<RenderedPrompt, LlmError> {
        render_openai(
            self,
            prompt,
            model,
            ChatOptions {
                native_tools: true,
                fold_system: false,
            },
        )
    }
}

pub(super) fn openai_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": parameters_schema(tool),
                }
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub(super) struct ChatOptions {
    pub native_tools: bool,
    pub fold_system: bool,
}

/// `OpenAI` accepts `[a-zA-Z0-9_-]{1,64}` participant names.
fn participant_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect()
}

/// Renders the `OpenAI` message list shared by [`ChatGpt`] and the
/// `OpenAI`-compatible dialect.
pub(super) fn render_openai(
    dialect: &dyn Dialect,
    prompt: &Prompt,
    model: &ModelConfig,
    options: ChatOptions,
) -> Result<RenderedPrompt, LlmError> {
    let has_tools = !prompt.tools().is_empty();
    let tools = if options.native_tools {
        openai_tools(prompt.tools())
    } else {
        Vec::new()
    };
    let mut system = prompt.full_system_text();
    if has_tools && !options.native_tools {
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(&xml_tools::preamble(prompt.tools()));
    }

    let trimmed = prepare(dialect, &system, prompt, model, schema_tokens(&tools, model))?;

    let mut messages: Vec<Value> = Vec::with_capacity(trimmed.messages.len() + 1);
    let mut folded_system = None;
    if !trimmed.system.is_empty() {
        if options.fold_system {
            folded_system = Some(trimmed.system.clone());
        } else {
            messages.push(json!({"role": "system", "content": trimmed.system}));
        }
    }

    for message in &trimmed.messages {
        match message {
            Message::User { content, name } => {
                let content = match folded_system.take() {
                    Some(system) => format!("{system}\n\n{content}"),
                    None => content.clone(),
                };
                let mut entry = json!({"role": "user", "content": content});
                if let Some(name) = name {
                    entry["name"] = participant_name(name).into();
                }
                messages.push(entry);
            }
            Message::Model { content } => {
                messages.push(json!({"role": "assistant", "content": content}));
            }
            Message::ToolCall { .. } => {
                let Some(call) = decode_call(message)? else {
                    continue;
                };
                if !options.native_tools {
                    messages.push(json!({
                        "role": "assistant",
                        "content": xml_tools::render_calls(std::slice::from_ref(&call)),
                    }));
                    continue;
                }
                let entry = json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": Value::Object(call.arguments).to_string(),
                    }
                });
                let previous_calls = messages
                    .last_mut()
                    .filter(|m| m["role"] == "assistant")
                    .and_then(|m| m.get_mut("tool_calls"))
                    .and_then(Value::as_array_mut);
                match previous_calls {
                    Some(calls) => calls.push(entry),
                    None => messages.push(json!({"role": "assistant", "tool_calls": [entry]})),
                }
            }
            Message::Tool { id, content, .. } => {
                if options.native_tools {
                    messages.push(json!({"role": "tool", "tool_call_id": id, "content": content}));
                } else {
                    let name = tool_name(message, &trimmed.messages);
                    messages.push(json!({
                        "role": "user",
                        "content": xml_tools::render_results([(name.as_str(), content.as_str())]),
                    }));
                }
            }
        }
    }
    if let Some(system) = folded_system {
        // no user message survived to carry the system text
        messages.insert(0, json!({"role": "user", "content": system}));
    }

    let tool_choice = prompt
        .tool_choice()
        .filter(|_| options.native_tools)
        .map(|name| json!({"type": "function", "function": {"name": name}}));
    let stop_sequences = if has_tools && !options.native_tools {
        vec![xml_tools::FUNCTION_CALLS_CLOSE.to_owned()]
    } else {
        Vec::new()
    };

    Ok(RenderedPrompt::Chat(ChatPayload {
        system: None,
        messages,
        tools,
        tool_choice,
        stop_sequences,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{BasicTokenizer, Tokenizer};
    use crate::tool::{ParamType, Parameter, ToolCall};
    use serde_json::Map;

    fn render(prompt: &Prompt, model: &ModelConfig) -> ChatPayload {
        match ChatGpt.translate(prompt, model).unwrap() {
            RenderedPrompt::Chat(chat) => chat,
            RenderedPrompt::Text(_) => panic!("expected chat payload"),
        }
    }

    fn search_tool() -> ToolDefinition {
        ToolDefinition::new("search", "Search the web")
            .with_parameter(Parameter::new("q", ParamType::String, "query").required())
    }

    #[test]
    fn test_system_and_user_render_exactly() {
        let prompt = Prompt::new("You are a bot")
            .with_messages([Message::user("hello")])
            .unwrap();
        let chat = render(&prompt, &ModelConfig::default());
        assert_eq!(
            chat.messages,
            vec![
                json!({"role": "system", "content": "You are a bot"}),
                json!({"role": "user", "content": "hello"}),
            ]
        );
        assert!(chat.tools.is_empty());
        assert!(chat.tool_choice.is_none());
        assert!(chat.system.is_none());
    }

    #[test]
    fn test_post_instructions_join_system() {
        let prompt = Prompt::new("You are a bot")
            .with_post_instructions("Be brief")
            .with_messages([Message::user("hello")])
            .unwrap();
        let chat = render(&prompt, &ModelConfig::default());
        assert_eq!(chat.messages[0]["content"], "You are a bot\nBe brief");
    }

    #[test]
    fn test_examples_precede_conversation() {
        let prompt = Prompt::new("sys")
            .with_examples([("ping".to_owned(), "pong".to_owned())])
            .with_messages([Message::user("ping?")])
            .unwrap();
        let chat = render(&prompt, &ModelConfig::default());
        let roles: Vec<_> = chat.messages.iter().map(|m| m["role"].clone()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(chat.messages[2]["content"], "pong");
    }

    #[test]
    fn test_tool_round_trip_renders_tool_calls() {
        let args = json!({"q": "rust"}).as_object().cloned().unwrap();
        let call = ToolCall::new("call_1", "search", args);
        let prompt = Prompt::new("sys")
            .with_tools(vec![search_tool()])
            .unwrap()
            .with_messages([
                Message::user("look it up"),
                Message::tool_call(&call),
                Message::tool_result("call_1", None, "{\"hits\":3}"),
            ])
            .unwrap();
        let chat = render(&prompt, &ModelConfig::default());
        assert_eq!(
            chat.messages[2],
            json!({
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "search", "arguments": "{\"q\":\"rust\"}"}
                }]
            })
        );
        assert_eq!(
            chat.messages[3],
            json!({"role": "tool", "tool_call_id": "call_1", "content": "{\"hits\":3}"})
        );
    }

    #[test]
    fn test_parallel_calls_share_one_assistant_message() {
        let prompt = Prompt::new("sys")
            .with_tools(vec![search_tool()])
            .unwrap()
            .with_messages([
                Message::user("two searches"),
                Message::tool_call(&ToolCall::new("a", "search", Map::new())),
                Message::tool_call(&ToolCall::new("b", "search", Map::new())),
                Message::tool_result("a", None, "1"),
                Message::tool_result("b", None, "2"),
            ])
            .unwrap();
        let chat = render(&prompt, &ModelConfig::default());
        assert_eq!(chat.messages.len(), 5);
        assert_eq!(chat.messages[2]["tool_calls"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_tools_schema_and_choice() {
        let prompt = Prompt::new("sys")
            .with_tools(vec![search_tool()])
            .unwrap()
            .with_tool_choice("search")
            .unwrap();
        let chat = render(&prompt, &ModelConfig::default());
        assert_eq!(
            chat.tools,
            vec![json!({
                "type": "function",
                "function": {
                    "name": "search",
                    "description": "Search the web",
                    "parameters": {
                        "type": "object",
                        "properties": {"q": {"type": "string", "description": "query"}},
                        "required": ["q"]
                    }
                }
            })]
        );
        assert_eq!(
            chat.tool_choice,
            Some(json!({"type": "function", "function": {"name": "search"}}))
        );
    }

    #[test]
    fn test_named_user_sanitized() {
        let prompt = Prompt::new("sys")
            .with_messages([Message::named_user("sam smith", "hi")])
            .unwrap();
        let chat = render(&prompt, &ModelConfig::default());
        assert_eq!(chat.messages[1]["name"], "sam_smith");
    }

    #[test]
    fn test_long_system_truncated_to_share() {
        let system = (0..100).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let prompt = Prompt::new(system).with_messages([Message::user("hello")]).unwrap();
        let model = ModelConfig::default().with_max_prompt_tokens(50);
        let chat = render(&prompt, &model);
        let system_text = chat.messages[0]["content"].as_str().unwrap();
        assert_eq!(BasicTokenizer.size(system_text) + OPENAI_MESSAGE_OVERHEAD, 30);
        assert_eq!(chat.messages[1], json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_rendering_is_pure() {
        let prompt = Prompt::new("sys")
            .with_messages([Message::user("a"), Message::model("b"), Message::user("c")])
            .unwrap();
        let model = ModelConfig::default();
        assert_eq!(
            ChatGpt.translate(&prompt, &model).unwrap(),
            ChatGpt.translate(&prompt, &model).unwrap()
        );
    }
}
