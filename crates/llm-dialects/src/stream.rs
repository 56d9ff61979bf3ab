//! Stream events and the merge logic that folds them into a partial result.
//!
//! Endpoints decode provider frames into [`StreamEvent`]s, a tool-call
//! parser rewrites them (holding back `<function_calls>` markup, closing
//! structured calls), and an [`Accumulator`] merges what remains into the
//! [`PartialResult`] the caller sees after every chunk.
//!
//! # Tool-call reassembly
//!
//! Structured tool calls arrive in three phases:
//! 1. [`ToolCallStart`](StreamEvent::ToolCallStart) announces the call's
//!    `id` and `name`.
//! 2. [`ToolCallDelta`](StreamEvent::ToolCallDelta) carries JSON argument
//!    fragments.
//! 3. [`ToolCallComplete`](StreamEvent::ToolCallComplete) carries the
//!    parsed [`ToolCall`], emitted by the parser once the stream closes it.
//!
//! The `index` field identifies which call an event belongs to when the
//! model invokes several tools in parallel.

use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;
use crate::usage::Usage;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the turn.
    EndTurn,
    /// The model is waiting for tool results.
    ToolUse,
    /// The output token limit was reached.
    MaxTokens,
    /// A stop sequence matched.
    StopSequence,
}

impl StopReason {
    /// Maps a provider's finish reason. Unknown reasons are `EndTurn`.
    pub fn from_provider(reason: &str) -> Self {
        match reason {
            "tool_calls" | "tool_use" | "function_call" => Self::ToolUse,
            "length" | "max_tokens" | "MAX_TOKENS" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            _ => Self::EndTurn,
        }
    }
}

/// An incremental event decoded from a provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StreamEvent {
    /// A fragment of the model's text output.
    TextDelta(String),
    /// Announces that a new tool call has started.
    ToolCallStart {
        /// Zero-based index of the call within the response.
        index: u32,
        /// Provider-assigned identifier.
        id: String,
        /// The name of the tool being called.
        name: String,
    },
    /// A JSON fragment of a tool call's arguments.
    ToolCallDelta {
        /// The tool-call index this delta belongs to.
        index: u32,
        /// A chunk of the JSON arguments string.
        json_chunk: String,
    },
    /// A fully assembled tool call.
    ToolCallComplete {
        /// The tool-call index this completion corresponds to.
        index: u32,
        /// The parsed call.
        call: ToolCall,
    },
    /// Token usage reported so far.
    Usage(Usage),
    /// The response has ended.
    Done {
        /// Why the model stopped.
        stop_reason: StopReason,
    },
}

/// What the caller has received so far.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialResult {
    /// Concatenated text deltas.
    pub text: String,
    /// Completed tool calls, in the order they closed.
    pub tool_calls: Vec<ToolCall>,
}

/// Merges [`StreamEvent`]s into a [`PartialResult`].
///
/// Once [`cancel`](Self::cancel) is called no further event is applied.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    partial: PartialResult,
    usage: Option<Usage>,
    stop_reason: Option<StopReason>,
    cancelled: bool,
}

impl Accumulator {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one event. Returns `true` when the visible partial result
    /// changed (new text or a completed tool call).
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.cancelled {
            return false;
        }
        match event {
            StreamEvent::TextDelta(text) => {
                if text.is_empty() {
                    return false;
                }
                self.partial.text.push_str(&text);
                true
            }
            StreamEvent::ToolCallComplete { call, .. } => {
                self.partial.tool_calls.push(call);
                true
            }
            StreamEvent::Usage(usage) => {
                self.usage
                    .get_or_insert_with(Usage::default)
                    .merge(&usage);
                false
            }
            StreamEvent::Done { stop_reason } => {
                self.stop_reason = Some(stop_reason);
                false
            }
            StreamEvent::ToolCallStart { .. } | StreamEvent::ToolCallDelta { .. } => false,
        }
    }

    /// Stops accepting events.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The result merged so far.
    pub fn partial(&self) -> &PartialResult {
        &self.partial
    }

    /// Provider-reported usage, if any arrived.
    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// The stop reason, once `Done` arrived.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Consumes the accumulator.
    pub fn into_parts(self) -> (PartialResult, Option<Usage>, Option<StopReason>) {
        (self.partial, self.usage, self.stop_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_text_deltas_concatenate() {
        let mut acc = Accumulator::new();
        assert!(acc.apply(StreamEvent::TextDelta("hello ".into())));
        assert!(acc.apply(StreamEvent::TextDelta("world".into())));
        assert!(!acc.apply(StreamEvent::TextDelta(String::new())));
        assert_eq!(acc.partial().text, "hello world");
    }

    #[test]
    fn test_cancel_after_two_words_stops_merging() {
        let mut acc = Accumulator::new();
        for chunk in ["Mount", "ain", " ", "Tree ", "Frog"] {
            acc.apply(StreamEvent::TextDelta(chunk.into()));
            if acc.partial().text.split_whitespace().count() >= 2 {
                acc.cancel();
            }
        }
        assert!(acc.is_cancelled());
        assert_eq!(acc.partial().text, "Mountain Tree ");
        assert!(!acc.apply(StreamEvent::TextDelta("more".into())));
        assert_eq!(acc.partial().text, "Mountain Tree ");
    }

    #[test]
    fn test_completed_calls_collected_in_order() {
        let mut acc = Accumulator::new();
        acc.apply(StreamEvent::ToolCallStart {
            index: 0,
            id: "a".into(),
            name: "x".into(),
        });
        assert!(acc.partial().tool_calls.is_empty());
        for (index, name) in [(0, "x"), (1, "y")] {
            acc.apply(StreamEvent::ToolCallComplete {
                index,
                call: ToolCall::new(format!("id{index}"), name, Map::new()),
            });
        }
        let names: Vec<_> = acc.partial().tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn test_usage_reports_merge() {
        let mut acc = Accumulator::new();
        acc.apply(StreamEvent::Usage(Usage::new(25, 1)));
        acc.apply(StreamEvent::Usage(Usage::new(0, 15)));
        acc.apply(StreamEvent::Done {
            stop_reason: StopReason::EndTurn,
        });
        let (partial, usage, stop) = acc.into_parts();
        assert!(partial.text.is_empty());
        assert_eq!(usage, Some(Usage::new(25, 15)));
        assert_eq!(stop, Some(StopReason::EndTurn));
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_provider("tool_calls"), StopReason::ToolUse);
        assert_eq!(StopReason::from_provider("length"), StopReason::MaxTokens);
        assert_eq!(StopReason::from_provider("STOP"), StopReason::EndTurn);
    }
}
