use serde_json::Value;

use super::{
    Dialect, DialectKind, RenderedPrompt, TextPayload, Turn, prepare, text_stop_sequences,
    text_system, text_turns,
};
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::prompt::Prompt;
use crate::tool::ToolDefinition;

/// The Orca / `StableBeluga` template: `### System:`, `### User:`, and
/// `### Assistant:` sections, ending with an open assistant section.
#[derive(Debug, Clone, Copy, Default)]
pub struct Orca;

impl Dialect for Orca {
    fn kind(&self) -> DialectKind {
        DialectKind::Orca
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
        let mut out = String::new();
        if !trimmed.system.is_empty() {
            out.push_str("### System:\n");
            out.push_str(&trimmed.system);
            out.push_str("\n\n");
        }
        for turn in text_turns(&trimmed.messages)? {
            let (header, text) = match turn {
                Turn::Human(text) => ("### User:\n", text),
                Turn::Assistant(text) => ("### Assistant:\n", text),
            };
            out.push_str(header);
            out.push_str(&text);
            out.push_str("\n\n");
        }
        out.push_str("### Assistant:");
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

    #[test]
    fn test_orca_format() {
        let prompt = Prompt::new("You are a bot")
            .with_messages([Message::user("hi")])
            .unwrap();
        let model = ModelConfig::new(Provider::HuggingFace, "StableBeluga2");
        let RenderedPrompt::Text(text) = Orca.translate(&prompt, &model).unwrap() else {
            panic!("expected text payload");
        };
        assert_eq!(
            text.prompt,
            "### System:\nYou are a bot\n\n### User:\nhi\n\n### Assistant:"
        );
    }
}
