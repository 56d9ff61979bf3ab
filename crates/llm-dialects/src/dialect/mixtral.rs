use serde_json::Value;

use super::{
    Dialect, DialectKind, RenderedPrompt, TextPayload, Turn, prepare, text_stop_sequences,
    text_system, text_turns,
};
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::prompt::Prompt;
use crate::tool::ToolDefinition;

/// The Mixtral / Mistral instruction template. The system text is sent as
/// a first instruction the model acknowledges; model turns end with `</s>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mixtral;

impl Dialect for Mixtral {
    fn kind(&self) -> DialectKind {
        DialectKind::Mixtral
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
        let mut out = String::from("<s>");
        if !trimmed.system.is_empty() {
            out.push_str(" [INST] ");
            out.push_str(&trimmed.system);
            out.push_str(" [/INST] Ok </s>");
        }
        for turn in text_turns(&trimmed.messages)? {
            match turn {
                Turn::Human(text) => {
                    out.push_str(" [INST] ");
                    out.push_str(&text);
                    out.push_str(" [/INST]");
                }
                Turn::Assistant(text) => {
                    out.push(' ');
                    out.push_str(&text);
                    out.push_str("</s>");
                }
            }
        }
        Ok(RenderedPrompt::Text(TextPayload {
            prompt: out,
            stop_sequences: text_stop_sequences(prompt),
        }))
    }
}
