use std::collections::BTreeMap;

use super::{ToolCallParser, validate_call};
use crate::error::LlmError;
use crate::stream::{StopReason, StreamEvent};
use crate::tool::{ToolCall, ToolDefinition, parse_arguments};

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles native function calls.
///
/// Argument fragments are concatenated per call index and parsed as JSON
/// only when the response ends, so a partial document is never parsed.
#[derive(Debug, Default)]
pub struct StructuredToolParser {
    tools: Vec<ToolDefinition>,
    pending: BTreeMap<u32, PendingCall>,
}

impl StructuredToolParser {
    /// A parser validating calls against `tools` (empty accepts any call).
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools,
            pending: BTreeMap::new(),
        }
    }

    fn close_all(&mut self) -> Result<Vec<StreamEvent>, LlmError> {
        let mut out = Vec::with_capacity(self.pending.len());
        for (index, pending) in std::mem::take(&mut self.pending) {
            if pending.name.is_empty() {
                return Err(LlmError::malformed_tool_call(
                    format!("tool call {index} has no name"),
                    pending.arguments,
                ));
            }
            let arguments = parse_arguments(&pending.arguments)?;
            let id = if pending.id.is_empty() {
                format!("tool_{index}")
            } else {
                pending.id
            };
            let call = ToolCall::new(id, pending.name, arguments);
            validate_call(&self.tools, &call)?;
            tracing::debug!(index, tool = %call.name, "tool call closed");
            out.push(StreamEvent::ToolCallComplete { index, call });
        }
        Ok(out)
    }
}

impl ToolCallParser for StructuredToolParser {
    fn push(&mut self, event: StreamEvent) -> Result<Vec<StreamEvent>, LlmError> {
        match event {
            StreamEvent::ToolCallStart { index, ref id, ref name } => {
                let pending = self.pending.entry(index).or_default();
                if !id.is_empty() {
                    pending.id.clone_from(id);
                }
                if !name.is_empty() {
                    pending.name.clone_from(name);
                }
                Ok(vec![event])
            }
            StreamEvent::ToolCallDelta {
                index,
                ref json_chunk,
            } => {
                self.pending
                    .entry(index)
                    .or_default()
                    .arguments
                    .push_str(json_chunk);
                Ok(vec![event])
            }
            StreamEvent::ToolCallComplete { index, ref call } => {
                self.pending.remove(&index);
                validate_call(&self.tools, call)?;
                Ok(vec![event])
            }
            StreamEvent::Done { stop_reason } => {
                let mut out = self.close_all()?;
                let stop_reason = if out.is_empty() {
                    stop_reason
                } else {
                    StopReason::ToolUse
                };
                out.push(StreamEvent::Done { stop_reason });
                Ok(out)
            }
            other => Ok(vec![other]),
        }
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, LlmError> {
        self.close_all()
    }
}
