//! Extracting tool calls from model output.
//!
//! Two strategies share one contract. [`StructuredToolParser`] reassembles
//! calls from native function-call fields; [`XmlToolParser`] finds
//! `<function_calls>` blocks in free text. Both consume the
//! [`StreamEvent`]s an endpoint decodes (a blocking response decodes to the
//! same events) and emit the events the caller should see, with finished
//! calls as [`StreamEvent::ToolCallComplete`].
//!
//! ```rust
//! use llm_dialects::parser::{XmlToolParser, collect_tool_calls};
//! use llm_dialects::stream::StreamEvent;
//!
//! let text = "<function_calls><invoke><tool_name>image</tool_name>\
//!             <parameters><prompts>[\"a\",\"b\"]</prompts></parameters>\
//!             </invoke></function_calls>";
//! let mut parser = XmlToolParser::new(Vec::new());
//! let calls = collect_tool_calls(&mut parser, [StreamEvent::TextDelta(text.into())]).unwrap();
//! assert_eq!(calls[0].name, "image");
//! assert_eq!(calls[0].arguments["prompts"], serde_json::json!(["a", "b"]));
//! ```

mod structured;
mod xml;

pub use structured::StructuredToolParser;
pub use xml::{XmlToolParser, parse_function_calls};

use crate::config::ModelConfig;
use crate::dialect::Dialect;
use crate::error::LlmError;
use crate::stream::StreamEvent;
use crate::tool::{ToolCall, ToolDefinition};

/// Rewrites decoded provider events into caller-facing events.
pub trait ToolCallParser: Send {
    /// Feeds one event and returns the events to forward, in order.
    fn push(&mut self, event: StreamEvent) -> Result<Vec<StreamEvent>, LlmError>;

    /// Flushes held-back text and closes any open calls. Called when the
    /// response ends; calling it again yields nothing.
    fn finish(&mut self) -> Result<Vec<StreamEvent>, LlmError>;
}

/// The parser matching how `dialect` surfaces tool calls for `model`.
pub fn parser_for(
    dialect: &dyn Dialect,
    model: &ModelConfig,
    tools: &[ToolDefinition],
) -> Box<dyn ToolCallParser> {
    if dialect.supports_structured_tools(model) {
        Box::new(StructuredToolParser::new(tools.to_vec()))
    } else {
        Box::new(XmlToolParser::new(tools.to_vec()))
    }
}

/// Runs `events` through `parser` and returns only the completed calls.
pub fn collect_tool_calls<I>(
    parser: &mut dyn ToolCallParser,
    events: I,
) -> Result<Vec<ToolCall>, LlmError>
where
    I: IntoIterator<Item = StreamEvent>,
{
    let mut calls = Vec::new();
    let mut take = |out: Vec<StreamEvent>| {
        calls.extend(out.into_iter().filter_map(|event| match event {
            StreamEvent::ToolCallComplete { call, .. } => Some(call),
            _ => None,
        }));
    };
    for event in events {
        take(parser.push(event)?);
    }
    take(parser.finish()?);
    Ok(calls)
}

/// Checks a parsed call against the prompt's tool set: the tool must exist
/// and every required parameter must be present. An empty tool set accepts
/// any call.
pub fn validate_call(tools: &[ToolDefinition], call: &ToolCall) -> Result<(), LlmError> {
    if tools.is_empty() {
        return Ok(());
    }
    let Some(tool) = tools.iter().find(|t| t.name == call.name) else {
        return Err(LlmError::malformed_tool_call(
            format!("unknown tool `{}`", call.name),
            call.to_content(),
        ));
    };
    if let Some(missing) = tool
        .required_parameters()
        .find(|name| !call.arguments.contains_key(*name))
    {
        return Err(LlmError::malformed_tool_call(
            format!("tool `{}` is missing required parameter `{missing}`", call.name),
            call.to_content(),
        ));
    }
    Ok(())
}
