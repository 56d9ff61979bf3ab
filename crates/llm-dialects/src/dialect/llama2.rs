use serde_json::Value;

use super::{
    Dialect, DialectKind, RenderedPrompt, TextPayload, Turn, prepare, text_stop_sequences,
    text_system, text_turns,
};
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::prompt::Prompt;
use crate::tool::ToolDefinition;

/// The Llama 2 chat template.
///
/// ```text
/// [INST] <<SYS>>
/// system
/// <</SYS>> [/INST]
/// [INST] user [/INST]
/// model
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Llama2;

impl Dialect for Llama2 {
    fn kind(&self) -> DialectKind {
        DialectKind::Llama2
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
            out.push_str("[INST] <<SYS>>\n");
            out.push_str(&trimmed.system);
            out.push_str("\n<</SYS>> [/INST]\n");
        }
        for turn in text_turns(&trimmed.messages)? {
            match turn {
                Turn::Human(text) => {
                    out.push_str("[INST] ");
                    out.push_str(&text);
                    out.push_str(" [/INST]\n");
                }
                Turn::Assistant(text) => {
                    out.push_str(&text);
                    out.push('\n');
                }
            }
        }
        Ok(RenderedPrompt::Text(TextPayload {
            prompt: out,
            stop_sequences: text_stop_sequences(prompt),
        }))
    }
}
