//! The provider-agnostic conversation model.
//!
//! A [`Prompt`] holds the system instructions, an ordered message history
//! (oldest first), optional tool definitions, and optional few-shot
//! examples. Dialects render a prompt into a provider payload; rendering
//! never mutates it, so callers keep the untrimmed history for persistence.
//!
//! ```rust
//! use llm_dialects::{Message, Prompt};
//!
//! let mut prompt = Prompt::new("You are a helpful bot");
//! prompt.push(Message::user("What is the capital of France?")).unwrap();
//! prompt.push(Message::model("Paris.")).unwrap();
//! assert_eq!(prompt.messages().len(), 2);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::tool::{ToolCall, ToolDefinition, validate_tools};

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A human participant. `name` tells several humans apart.
    User {
        /// The message text.
        content: String,
        /// Optional participant name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// The assistant.
    Model {
        /// The message text.
        content: String,
    },
    /// The assistant electing to invoke a tool. `content` is a JSON
    /// document `{name, arguments}`.
    ToolCall {
        /// Identifier the matching [`Message::Tool`] answers.
        id: String,
        /// `{name, arguments}` JSON.
        content: String,
    },
    /// A tool's result.
    Tool {
        /// Identifier of the [`Message::ToolCall`] this answers.
        id: String,
        /// The name of the tool that produced the result, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// The result text (often JSON).
        content: String,
    },
}

impl Message {
    /// A user message without a participant name.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            name: None,
        }
    }

    /// A user message from a named participant.
    pub fn named_user(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            name: Some(name.into()),
        }
    }

    /// An assistant message.
    pub fn model(content: impl Into<String>) -> Self {
        Self::Model {
            content: content.into(),
        }
    }

    /// A tool-call message built from a parsed call.
    pub fn tool_call(call: &ToolCall) -> Self {
        Self::ToolCall {
            id: call.id.clone(),
            content: call.to_content(),
        }
    }

    /// A tool-result message answering the call with `id`.
    pub fn tool_result(
        id: impl Into<String>,
        name: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            id: id.into(),
            name,
            content: content.into(),
        }
    }

    /// The message text (for tool calls, the `{name, arguments}` JSON).
    pub fn content(&self) -> &str {
        match self {
            Self::User { content, .. }
            | Self::Model { content }
            | Self::ToolCall { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    /// The text counted against the token budget: the content plus any
    /// participant or tool name.
    pub fn token_text(&self) -> String {
        match self {
            Self::User {
                content,
                name: Some(name),
            }
            | Self::Tool {
                content,
                name: Some(name),
                ..
            } => format!("{content}{name}"),
            _ => self.content().to_owned(),
        }
    }

    /// Returns a copy with its content replaced, keeping every other field.
    pub fn with_content(&self, content: String) -> Self {
        match self {
            Self::User { name, .. } => Self::User {
                content,
                name: name.clone(),
            },
            Self::Model { .. } => Self::Model { content },
            Self::ToolCall { id, .. } => Self::ToolCall {
                id: id.clone(),
                content,
            },
            Self::Tool { id, name, .. } => Self::Tool {
                id: id.clone(),
                name: name.clone(),
                content,
            },
        }
    }

    /// The tool-call id for `ToolCall` and `Tool` messages.
    pub fn tool_id(&self) -> Option<&str> {
        match self {
            Self::ToolCall { id, .. } | Self::Tool { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Decodes a `ToolCall` message. Returns `None` for other kinds.
    pub fn parsed_tool_call(&self) -> Option<Result<ToolCall, LlmError>> {
        match self {
            Self::ToolCall { id, content } => Some(ToolCall::from_content(id, content)),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Model { .. } => "model",
            Self::ToolCall { .. } => "tool_call",
            Self::Tool { .. } => "tool",
        }
    }
}

/// A few-shot example: an input the user might send and the output the
/// model should produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    /// Example user input.
    pub input: String,
    /// Expected model output.
    pub output: String,
}

/// A complete conversation plus system instructions and tools.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prompt {
    system_instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    post_instructions: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    tools: Vec<ToolDefinition>,
    #[serde(default)]
    examples: Vec<Example>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

impl Prompt {
    /// Creates a prompt with the given system instructions and no history.
    pub fn new(system_instructions: impl Into<String>) -> Self {
        Self {
            system_instructions: system_instructions.into(),
            ..Default::default()
        }
    }

    /// Appends every message in order, validating each turn.
    pub fn with_messages(
        mut self,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<Self, LlmError> {
        for message in messages {
            self.push(message)?;
        }
        Ok(self)
    }

    /// Sets the tool definitions.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Result<Self, LlmError> {
        validate_tools(&tools)?;
        self.tools = tools;
        Ok(self)
    }

    /// Sets the few-shot examples.
    #[must_use]
    pub fn with_examples(mut self, examples: impl IntoIterator<Item = (String, String)>) -> Self {
        self.examples = examples
            .into_iter()
            .map(|(input, output)| Example { input, output })
            .collect();
        self
    }

    /// Sets instructions appended after the system text.
    #[must_use]
    pub fn with_post_instructions(mut self, post: impl Into<String>) -> Self {
        self.post_instructions = Some(post.into());
        self
    }

    /// Forces the model to call the named tool.
    pub fn with_tool_choice(mut self, tool: impl Into<String>) -> Result<Self, LlmError> {
        let tool = tool.into();
        if !self.tools.iter().any(|t| t.name == tool) {
            return Err(LlmError::configuration(format!(
                "tool_choice `{tool}` does not name a defined tool"
            )));
        }
        self.tool_choice = Some(tool);
        Ok(self)
    }

    /// Appends a message to the running conversation.
    ///
    /// Rejects turns no provider accepts: a tool result that does not
    /// follow a tool call, two adjacent model messages, or a tool call
    /// whose content is not `{name, arguments}` JSON.
    pub fn push(&mut self, message: Message) -> Result<(), LlmError> {
        let last = self.messages.last();
        match (&message, last) {
            (Message::Tool { .. }, Some(Message::ToolCall { .. } | Message::Tool { .. })) => {}
            (Message::Tool { .. }, _) => {
                return Err(LlmError::configuration(
                    "a tool message must follow a tool_call message",
                ));
            }
            (Message::Model { .. }, Some(Message::Model { .. })) => {
                return Err(LlmError::configuration(
                    "a model message cannot follow another model message",
                ));
            }
            (Message::ToolCall { content, .. }, _) => {
                if let Some(Err(e)) = message.parsed_tool_call() {
                    return Err(LlmError::configuration(format!(
                        "invalid tool_call content {content:?}: {e}"
                    )));
                }
            }
            _ => {}
        }
        if let (Message::Tool { id, .. }, Some(_)) = (&message, last) {
            let answered = self
                .messages
                .iter()
                .rev()
                .take_while(|m| matches!(m, Message::ToolCall { .. } | Message::Tool { .. }))
                .any(|m| matches!(m, Message::ToolCall { id: call_id, .. } if call_id == id));
            if !answered {
                return Err(LlmError::configuration(format!(
                    "tool message `{id}` does not answer a preceding tool_call"
                )));
            }
        }
        tracing::trace!(kind = message.kind(), "prompt message pushed");
        self.messages.push(message);
        Ok(())
    }

    /// The system instructions.
    pub fn system_instructions(&self) -> &str {
        &self.system_instructions
    }

    /// Instructions that follow the system text, if any.
    pub fn post_instructions(&self) -> Option<&str> {
        self.post_instructions.as_deref()
    }

    /// System instructions and post instructions joined by a newline.
    pub fn full_system_text(&self) -> String {
        match &self.post_instructions {
            Some(post) if !post.is_empty() => format!("{}\n{post}", self.system_instructions),
            _ => self.system_instructions.clone(),
        }
    }

    /// The conversation, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The tool definitions.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// The few-shot examples.
    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// The forced tool name, if any.
    pub fn tool_choice(&self) -> Option<&str> {
        self.tool_choice.as_deref()
    }

    /// Examples expanded into user/model pairs, followed by the real
    /// conversation. This is the sequence dialects trim and render.
    pub fn conversation(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.examples.len() * 2 + self.messages.len());
        for example in &self.examples {
            out.push(Message::user(example.input.clone()));
            out.push(Message::model(example.output.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ParamType, Parameter};
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "search", json!({"q": "rust"}).as_object().cloned().unwrap())
    }

    #[test]
    fn test_push_builds_history_in_order() {
        let mut prompt = Prompt::new("sys");
        prompt.push(Message::user("one")).unwrap();
        prompt.push(Message::model("two")).unwrap();
        prompt.push(Message::user("three")).unwrap();
        let contents: Vec<_> = prompt.messages().iter().map(Message::content).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_tool_must_follow_tool_call() {
        let mut prompt = Prompt::new("sys");
        prompt.push(Message::user("hi")).unwrap();
        let err = prompt
            .push(Message::tool_result("call_1", None, "{}"))
            .unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));
    }

    #[test]
    fn test_tool_must_answer_its_call() {
        let mut prompt = Prompt::new("sys");
        prompt.push(Message::tool_call(&call("call_1"))).unwrap();
        assert!(prompt.push(Message::tool_result("call_2", None, "{}")).is_err());
        assert!(prompt.push(Message::tool_result("call_1", None, "{}")).is_ok());
    }

    #[test]
    fn test_parallel_tool_results_accepted() {
        let mut prompt = Prompt::new("sys");
        prompt.push(Message::tool_call(&call("a"))).unwrap();
        prompt.push(Message::tool_call(&call("b"))).unwrap();
        prompt.push(Message::tool_result("a", None, "1")).unwrap();
        prompt.push(Message::tool_result("b", None, "2")).unwrap();
        assert_eq!(prompt.messages().len(), 4);
    }

    #[test]
    fn test_adjacent_model_messages_rejected() {
        let mut prompt = Prompt::new("sys");
        prompt.push(Message::model("a")).unwrap();
        assert!(prompt.push(Message::model("b")).is_err());
    }

    #[test]
    fn test_malformed_tool_call_content_rejected() {
        let mut prompt = Prompt::new("sys");
        let err = prompt
            .push(Message::ToolCall {
                id: "x".into(),
                content: "not json".into(),
            })
            .unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));
    }

    #[test]
    fn test_conversation_puts_examples_first() {
        let prompt = Prompt::new("sys")
            .with_examples([("2+2".to_owned(), "4".to_owned())])
            .with_messages([Message::user("3+3")])
            .unwrap();
        let convo = prompt.conversation();
        assert_eq!(convo, vec![Message::user("2+2"), Message::model("4"), Message::user("3+3")]);
        // the stored history is untouched
        assert_eq!(prompt.messages().len(), 1);
    }

    #[test]
    fn test_full_system_text_joins_post_instructions() {
        let prompt = Prompt::new("You are a bot").with_post_instructions("Answer briefly");
        assert_eq!(prompt.full_system_text(), "You are a bot\nAnswer briefly");
    }

    #[test]
    fn test_tool_choice_must_name_a_tool() {
        let tool = ToolDefinition::new("search", "Search")
            .with_parameter(Parameter::new("q", ParamType::String, "query"));
        let prompt = Prompt::new("sys").with_tools(vec![tool]).unwrap();
        assert!(prompt.clone().with_tool_choice("search").is_ok());
        assert!(prompt.with_tool_choice("image").is_err());
    }

    #[test]
    fn test_token_text_includes_names() {
        assert_eq!(Message::named_user("sam", "hi").token_text(), "hisam");
        assert_eq!(Message::model("hi").token_text(), "hi");
    }

    #[test]
    fn test_prompt_serde_roundtrip() {
        let prompt = Prompt::new("sys")
            .with_messages([Message::named_user("sam", "hi"), Message::model("hello")])
            .unwrap();
        let json = serde_json::to_value(&prompt).unwrap();
        assert_eq!(json["messages"][0]["type"], "user");
        assert_eq!(json["messages"][0]["name"], "sam");
        let back: Prompt = serde_json::from_value(json).unwrap();
        assert_eq!(back, prompt);
    }
}
