use serde_json::Value;

use super::chat_gpt::{ChatOptions, OPENAI_MESSAGE_OVERHEAD, openai_tools, render_openai};
use super::{Dialect, DialectKind, RenderedPrompt};
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::prompt::Prompt;
use crate::tool::ToolDefinition;

/// Self-hosted `OpenAI`-compatible chat servers.
///
/// Many open models reject a system role or native tools. With
/// [`ModelConfig::disable_system_prompt`] the system text is prefixed onto
/// the first user message. With [`ModelConfig::disable_native_tools`] tools
/// are described in the system text and calls are read back from
/// `<function_calls>` blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiCompatible;

impl Dialect for OpenAiCompatible {
    fn kind(&self) -> DialectKind {
        DialectKind::OpenAiCompatible
    }

    fn supports_structured_tools(&self, model: &ModelConfig) -> bool {
        !model.disable_native_tools
    }

    fn per_message_overhead(&self) -> usize {
        OPENAI_MESSAGE_OVERHEAD
    }

    fn tools(&self, tools: &[ToolDefinition], model: &ModelConfig) -> Result<Vec<Value>, LlmError> {
        if model.disable_native_tools {
            Ok(Vec::new())
        } else {
            Ok(openai_tools(tools))
        }
    }

    fn translate(&self, prompt: &Prompt, model: &ModelConfig) -> Result<RenderedPrompt, LlmError> {
        render_openai(
            self,
            prompt,
            model,
            ChatOptions {
                native_tools: !model.disable_native_tools,
                fold_system: model.disable_system_prompt,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::dialect::ChatPayload;
    use crate::prompt::Message;
    use crate::tool::{ParamType, Parameter, ToolCall};
    use serde_json::json;

    fn model() -> ModelConfig {
        ModelConfig::new(Provider::Vllm, "mistral-7b")
    }

    fn render(prompt: &Prompt, model: &ModelConfig) -> ChatPayload {
        match OpenAiCompatible.translate(prompt, model).unwrap() {
            RenderedPrompt::Chat(chat) => chat,
            RenderedPrompt::Text(_) => panic!("expected chat payload"),
        }
    }

    #[test]
    fn test_default_matches_chat_shape() {
        let prompt = Prompt::new("sys").with_messages([Message::user("hi")]).unwrap();
        let chat = render(&prompt, &model());
        assert_eq!(
            chat.messages,
            vec![
                json!({"role": "system", "content": "sys"}),
                json!({"role": "user", "content": "hi"}),
            ]
        );
    }

    #[test]
    fn test_disabled_system_prompt_prefixes_first_user_message() {
        let prompt = Prompt::new("You are a bot")
            .with_messages([Message::user("hi"), Message::model("hello"), Message::user("bye")])
            .unwrap();
        let model = ModelConfig {
            disable_system_prompt: true,
            ..model()
        };
        let chat = render(&prompt, &model);
        assert_eq!(chat.messages.len(), 3);
        assert_eq!(
            chat.messages[0],
            json!({"role": "user", "content": "You are a bot\n\nhi"})
        );
        assert_eq!(chat.messages[2]["content"], "bye");
    }

    #[test]
    fn test_disabled_native_tools_use_xml_convention() {
        let tool = ToolDefinition::new("search", "Search")
            .with_parameter(Parameter::new("q", ParamType::String, "query"));
        let args = json!({"q": "x"}).as_object().cloned().unwrap();
        let prompt = Prompt::new("sys")
            .with_tools(vec![tool])
            .unwrap()
            .with_messages([
                Message::user("go"),
                Message::tool_call(&ToolCall::new("tool_0", "search", args)),
                Message::tool_result("tool_0", None, "done"),
            ])
            .unwrap();
        let model = ModelConfig {
            disable_native_tools: true,
            ..model()
        };
        assert!(!OpenAiCompatible.supports_structured_tools(&model));
        let chat = render(&prompt, &model);
        assert!(chat.tools.is_empty());
        let system = chat.messages[0]["content"].as_str().unwrap();
        assert!(system.starts_with("sys\n\n"));
        assert!(system.contains("<tool_name>search</tool_name>"));
        assert!(chat.messages[2]["content"].as_str().unwrap().starts_with("<function_calls>"));
        assert_eq!(chat.messages[3]["role"], "user");
        assert!(chat.messages[3]["content"].as_str().unwrap().contains("<function_results>"));
        assert_eq!(chat.stop_sequences, vec!["</function_calls>".to_owned()]);
    }
}
