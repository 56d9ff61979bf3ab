use serde_json::{Map, Value, json};

use super::json_tools::parameters_schema;
use super::{
    ChatPayload, Dialect, DialectKind, RenderedPrompt, decode_call, prepare, schema_tokens,
    tool_name,
};
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::prompt::{Message, Prompt};
use crate::tool::{ParamType, ToolDefinition, validate_tools};

/// Google Gemini `generateContent`.
///
/// Messages become `contents` with `user`, `model`, and `function` roles;
/// adjacent entries of one role are merged into a single entry with several
/// parts. The system text goes into `systemInstruction`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gemini;

impl Dialect for Gemini {
    fn kind(&self) -> DialectKind {
        DialectKind::Gemini
    }

    fn supports_structured_tools(&self, _model: &ModelConfig) -> bool {
        true
    }

    /// Function declarations cannot describe object parameters or untyped
    /// arrays.
    fn validate_tools(&self, tools: &[ToolDefinition]) -> Result<(), LlmError> {
        validate_tools(tools)?;
        for tool in tools {
            for param in &tool.parameters {
                match (param.param_type, param.item_type) {
                    (ParamType::Object, _) => {
                        return Err(LlmError::configuration(format!(
                            "tool `{}` parameter `{}`: Gemini does not support object parameters",
                            tool.name, param.name
                        )));
                    }
                    (ParamType::Array, None) => {
                        return Err(LlmError::configuration(format!(
                            "tool `{}` parameter `{}`: Gemini arrays need an item_type",
                            tool.name, param.name
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn tools(
        &self,
        tools: &[ToolDefinition],
        _model: &ModelConfig,
    ) -> Result<Vec<Value>, LlmError> {
        if tools.is_empty() {
            return Ok(Vec::new());
        }
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let mut declaration = json!({"name": tool.name, "description": tool.description});
                if !tool.parameters.is_empty() {
                    declaration["parameters"] = parameters_schema(tool);
                }
                declaration
            })
            .collect();
        Ok(vec![json!({"functionDeclarations": declarations})])
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

        let mut contents: Vec<Value> = Vec::with_capacity(trimmed.messages.len());
        for message in &trimmed.messages {
            let (role, part) = match message {
                Message::User { content, name } => {
                    let text = match name {
                        Some(name) => format!("{name}: {content}"),
                        None => content.clone(),
                    };
                    ("user", json!({"text": text}))
                }
                Message::Model { content } => ("model", json!({"text": content})),
                Message::ToolCall { .. } => {
                    let Some(call) = decode_call(message)? else {
                        continue;
                    };
                    (
                        "model",
                        json!({"functionCall": {"name": call.name, "args": Value::Object(call.arguments)}}),
                    )
                }
                Message::Tool { content, .. } => {
                    let name = tool_name(message, &trimmed.messages);
                    let result = serde_json::from_str::<Value>(content)
                        .unwrap_or_else(|_| Value::String(content.clone()));
                    (
                        "function",
                        json!({"functionResponse": {"name": name, "response": {"content": result}}}),
                    )
                }
            };
            match contents.last_mut().filter(|c| c["role"] == role) {
                Some(entry) => {
                    if let Some(parts) = entry["parts"].as_array_mut() {
                        parts.push(part);
                    }
                }
                None => contents.push(json!({"role": role, "parts": [part]})),
            }
        }

        let system = Some(trimmed.system).filter(|s| !s.is_empty());
        let tool_choice = prompt.tool_choice().map(|name| {
            let mut config = Map::new();
            config.insert("mode".into(), "ANY".into());
            config.insert("allowedFunctionNames".into(), json!([name]));
            json!({"functionCallingConfig": config})
        });
        Ok(RenderedPrompt::Chat(ChatPayload {
            system,
            messages: contents,
            tools,
            tool_choice,
            stop_sequences: Vec::new(),
        }))
    }
}
