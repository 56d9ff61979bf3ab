use serde_json::Value;

use super::{
    Dialect, DialectKind, RenderedPrompt, TextPayload, Turn, prepare, text_stop_sequences,
    text_system, text_turns,
};
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::prompt::Prompt;
use crate::tool::ToolDefinition;

/// Anthropic text completions: `Human:` / `Assistant:` turns, always ending
/// with an empty `Assistant:` cue.
#[derive(Debug, Clone, Copy, Default)]
pub struct Claude;

impl Dialect for Claude {
    fn kind(&self) -> DialectKind {
        DialectKind::Claude
    }

    fn supports_structured_tools(&self, _model: &ModelConfig) -> bool {
        false
    }

    fn tools(
        &self,
        _tools: &[ToolDefinition],
        _model: &ModelConfig,
    ) -> Result<Vec<Value>, LlmError> {
        Ok(Vec::new())
    }

    fn translate(&self, prompt: &Prompt, model: &ModelConfig) -> Result<RenderedPrompt, LlmError> {
        let trimmed = prepare(self, &text_system(prompt), prompt, model, 0)?;
        let mut out = trimmed.system;
        for turn in text_turns(&trimmed.messages)? {
            match turn {
                Turn::Human(text) => {
                    out.push_str("\n\nHuman: ");
                    out.push_str(&text);
                }
                Turn::Assistant(text) => {
                    out.push_str("\n\nAssistant: ");
                    out.push_str(&text);
                }
            }
        }
        out.push_str("\n\nAssistant:");
        Ok(RenderedPrompt::Text(TextPayload {
            prompt: out,
            stop_sequences: text_stop_sequences(prompt),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::prompt::Message;
    use crate::tool::{ParamType, Parameter};

    fn render(prompt: &Prompt) -> TextPayload {
        let model = ModelConfig::new(Provider::Anthropic, "claude-2");
        match Claude.translate(prompt, &model).unwrap() {
            RenderedPrompt::Text(text) => text,
            RenderedPrompt::Chat(_) => panic!("expected text payload"),
        }
    }

    #[test]
    fn test_human_assistant_format() {
        let prompt = Prompt::new("You are a bot")
            .with_messages([Message::user("hi"), Message::model("hello"), Message::user("bye")])
            .unwrap();
        assert_eq!(
            render(&prompt).prompt,
            "You are a bot\n\nHuman: hi\n\nAssistant: hello\n\nHuman: bye\n\nAssistant:"
        );
    }

    #[test]
    fn test_tools_go_into_preamble() {
        let tool = ToolDefinition::new("search", "Search")
            .with_parameter(Parameter::new("q", ParamType::String, "query"));
        let prompt = Prompt::new("sys")
            .with_tools(vec![tool])
            .unwrap()
            .with_messages([Message::user("find")])
            .unwrap();
        let text = render(&prompt);
        assert!(text.prompt.starts_with("sys\n\nIn this environment"));
        assert!(text.prompt.contains("<tool_name>search</tool_name>"));
        assert!(text.prompt.ends_with("\n\nHuman: find\n\nAssistant:"));
        assert_eq!(text.stop_sequences, vec!["</function_calls>".to_owned()]);
    }

    #[test]
    fn test_not_structured() {
        assert!(!Claude.supports_structured_tools(&ModelConfig::default()));
    }
}
