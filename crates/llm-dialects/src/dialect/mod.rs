//! Translating a [`Prompt`] into each provider family's request shape.
//!
//! A [`Dialect`] is a stateless strategy selected by [`DialectKind`]. Every
//! dialect trims with the shared [`trim_messages`] and then renders either
//! a message list ([`RenderedPrompt::Chat`]) or one flattened string
//! ([`RenderedPrompt::Text`]). Rendering is pure: the same prompt and model
//! config always produce the same payload.
//!
//! ```rust
//! use llm_dialects::{DialectKind, Message, ModelConfig, Prompt, RenderedPrompt, dialect_for};
//!
//! let prompt = Prompt::new("You are a bot").with_messages([Message::user("hi")]).unwrap();
//! let model = ModelConfig::default();
//! let RenderedPrompt::Chat(chat) = dialect_for(DialectKind::ChatGpt).translate(&prompt, &model).unwrap()
//! else {
//!     unreachable!()
//! };
//! assert_eq!(chat.messages.len(), 2);
//! ```

mod chat_gpt;
mod claude;
mod claude_messages;
mod gemini;
pub mod json_tools;
mod llama2;
mod mixtral;
mod open_ai_compatible;
mod orca;
pub mod xml_tools;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ModelConfig, Provider};
use crate::error::LlmError;
use crate::prompt::{Message, Prompt};
use crate::tool::{ToolCall, ToolDefinition, validate_tools};
use crate::trim::{TrimLimits, Trimmed, trim_messages};

pub use chat_gpt::ChatGpt;
pub use claude::Claude;
pub use claude_messages::ClaudeMessages;
pub use gemini::Gemini;
pub use llama2::Llama2;
pub use mixtral::Mixtral;
pub use open_ai_compatible::OpenAiCompatible;
pub use orca::Orca;

/// The closed set of wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectKind {
    /// `OpenAI` chat completions.
    ChatGpt,
    /// Self-hosted `OpenAI`-compatible chat (vLLM, Ollama).
    OpenAiCompatible,
    /// Anthropic Messages API.
    ClaudeMessages,
    /// Anthropic text completions (`Human:` / `Assistant:`).
    Claude,
    /// Google Gemini `contents`.
    Gemini,
    /// Mixtral instruction template.
    Mixtral,
    /// Llama 2 chat template.
    Llama2,
    /// Orca / `StableBeluga` template.
    Orca,
}

impl DialectKind {
    /// The dialect implied by a provider and model name.
    pub fn default_for(provider: Provider, model_name: &str) -> Self {
        let name = model_name.to_ascii_lowercase();
        match provider {
            Provider::OpenAi => Self::ChatGpt,
            Provider::Anthropic => {
                if name.contains("claude-2") || name.contains("claude-instant") {
                    Self::Claude
                } else {
                    Self::ClaudeMessages
                }
            }
            Provider::Gemini => Self::Gemini,
            Provider::HuggingFace => {
                if name.contains("mistral") || name.contains("mixtral") {
                    Self::Mixtral
                } else if name.contains("beluga") || name.contains("orca") {
                    Self::Orca
                } else {
                    Self::Llama2
                }
            }
            Provider::Vllm | Provider::Ollama => Self::OpenAiCompatible,
        }
    }

    /// Whether the dialect renders one flattened string.
    pub fn is_text(self) -> bool {
        matches!(self, Self::Claude | Self::Mixtral | Self::Llama2 | Self::Orca)
    }
}

/// A message-list payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatPayload {
    /// Top-level system text for APIs that take it outside the message
    /// list. `None` when the system text is a message (or absent).
    pub system: Option<String>,
    /// Provider-shaped messages, oldest first.
    pub messages: Vec<Value>,
    /// Provider-shaped tool schema. Empty when there are no native tools.
    pub tools: Vec<Value>,
    /// Provider-shaped forced tool choice.
    pub tool_choice: Option<Value>,
    /// Extra stop sequences the dialect needs.
    pub stop_sequences: Vec<String>,
}

/// A single-string payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextPayload {
    /// The flattened conversation, ending with the model's cue.
    pub prompt: String,
    /// Extra stop sequences the dialect needs.
    pub stop_sequences: Vec<String>,
}

/// The output of [`Dialect::translate`].
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedPrompt {
    /// Role-separated messages.
    Chat(ChatPayload),
    /// One flattened prompt string.
    Text(TextPayload),
}

impl RenderedPrompt {
    /// Stop sequences required by the dialect.
    pub fn stop_sequences(&self) -> &[String] {
        match self {
            Self::Chat(chat) => &chat.stop_sequences,
            Self::Text(text) => &text.stop_sequences,
        }
    }

    /// The text a tokenizer should count to estimate prompt tokens.
    pub fn token_text(&self) -> String {
        match self {
            Self::Text(text) => text.prompt.clone(),
            Self::Chat(chat) => {
                let mut out = chat.system.clone().unwrap_or_default();
                for message in &chat.messages {
                    out.push_str(&message.to_string());
                }
                out
            }
        }
    }
}

/// A translator between [`Prompt`] and one provider wire format.
pub trait Dialect: Send + Sync {
    /// Which format this is.
    fn kind(&self) -> DialectKind;

    /// Whether tool calls come back as structured response fields. When
    /// `false` the model writes `<function_calls>` blocks into its text.
    fn supports_structured_tools(&self, model: &ModelConfig) -> bool;

    /// Tokens of framing each rendered message adds.
    fn per_message_overhead(&self) -> usize {
        0
    }

    /// Rejects tool sets the dialect cannot express.
    fn validate_tools(&self, tools: &[ToolDefinition]) -> Result<(), LlmError> {
        validate_tools(tools)
    }

    /// The provider's native tool schema. Empty for dialects that describe
    /// tools in the prompt text.
    fn tools(&self, tools: &[ToolDefinition], model: &ModelConfig) -> Result<Vec<Value>, LlmError>;

    /// Trims and renders `prompt` for `model`.
    fn translate(&self, prompt: &Prompt, model: &ModelConfig) -> Result<RenderedPrompt, LlmError>;
}

static CHAT_GPT: ChatGpt = ChatGpt;
static OPEN_AI_COMPATIBLE: OpenAiCompatible = OpenAiCompatible;
static CLAUDE_MESSAGES: ClaudeMessages = ClaudeMessages;
static CLAUDE: Claude = Claude;
static GEMINI: Gemini = Gemini;
static MIXTRAL: Mixtral = Mixtral;
static LLAMA2: Llama2 = Llama2;
static ORCA: Orca = Orca;

/// The dialect implementation for `kind`.
pub fn dialect_for(kind: DialectKind) -> &'static dyn Dialect {
    match kind {
        DialectKind::ChatGpt => &CHAT_GPT,
        DialectKind::OpenAiCompatible => &OPEN_AI_COMPATIBLE,
        DialectKind::ClaudeMessages => &CLAUDE_MESSAGES,
        DialectKind::Claude => &CLAUDE,
        DialectKind::Gemini => &GEMINI,
        DialectKind::Mixtral => &MIXTRAL,
        DialectKind::Llama2 => &LLAMA2,
        DialectKind::Orca => &ORCA,
    }
}

/// Validates the inputs, then trims the prompt's conversation. `reserved`
/// tokens (a native tool schema) come off the budget first.
pub(crate) fn prepare(
    dialect: &dyn Dialect,
    system: &str,
    prompt: &Prompt,
    model: &ModelConfig,
    reserved: usize,
) -> Result<Trimmed, LlmError> {
    model.validate()?;
    dialect.validate_tools(prompt.tools())?;
    let limits = TrimLimits {
        max_tokens: model.max_prompt_tokens.saturating_sub(reserved),
        reserved_for_system: model.system_prompt_token_share,
        per_message_overhead: dialect.per_message_overhead(),
    };
    let trimmed = trim_messages(system, &prompt.conversation(), &limits, model.tokenizer.as_ref());
    tracing::debug!(
        dialect = ?dialect.kind(),
        kept = trimmed.messages.len(),
        total = prompt.messages().len() + prompt.examples().len() * 2,
        "prompt trimmed"
    );
    Ok(trimmed)
}

/// Tokens a rendered native tool schema costs.
pub(crate) fn schema_tokens(tools: &[Value], model: &ModelConfig) -> usize {
    if tools.is_empty() {
        return 0;
    }
    model.tokenizer.size(&Value::Array(tools.to_vec()).to_string())
}

/// Decodes a `tool_call` message, surfacing bad content as a
/// configuration error (deserialized prompts skip `push` validation).
pub(crate) fn decode_call(message: &Message) -> Result<Option<ToolCall>, LlmError> {
    message
        .parsed_tool_call()
        .transpose()
        .map_err(|e| LlmError::configuration(format!("cannot render tool_call: {e}")))
}

/// The tool name for a `tool` message: its own name, else the name of the
/// call it answers.
pub(crate) fn tool_name(message: &Message, conversation: &[Message]) -> String {
    if let Message::Tool { name: Some(name), .. } = message {
        return name.clone();
    }
    let Some(id) = message.tool_id() else {
        return String::new();
    };
    conversation
        .iter()
        .filter(|m| matches!(m, Message::ToolCall { id: call_id, .. } if call_id == id))
        .find_map(|m| m.parsed_tool_call().and_then(Result::ok))
        .map(|call| call.name)
        .unwrap_or_default()
}

/// User text as the text dialects print it, prefixed by the participant
/// name when there is one.
pub(crate) fn user_text(message: &Message) -> String {
    match message {
        Message::User {
            content,
            name: Some(name),
        } => format!("{name}: {content}"),
        other => other.content().to_owned(),
    }
}

/// One side of a flattened conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Turn {
    Human(String),
    Assistant(String),
}

/// Flattens trimmed messages into alternating turns for the text dialects.
///
/// Adjacent tool calls share one `<function_calls>` block, adjacent tool
/// results share one `<function_results>` block, and adjacent turns of the
/// same side are joined with a newline.
pub(crate) fn text_turns(messages: &[Message]) -> Result<Vec<Turn>, LlmError> {
    let mut turns: Vec<Turn> = Vec::new();
    let mut idx = 0;
    while idx < messages.len() {
        let turn = match &messages[idx] {
            Message::ToolCall { .. } => {
                let mut calls = Vec::new();
                while let Some(call) = messages.get(idx).map(decode_call).transpose()? {
                    let Some(call) = call else { break };
                    calls.push(call);
                    idx += 1;
                }
                Turn::Assistant(xml_tools::render_calls(&calls))
            }
            Message::Tool { .. } => {
                let mut results = Vec::new();
                while let Some(message) = messages.get(idx) {
                    let Message::Tool { content, .. } = message else {
                        break;
                    };
                    results.push((tool_name(message, messages), content.as_str()));
                    idx += 1;
                }
                Turn::Human(xml_tools::render_results(
                    results.iter().map(|(name, content)| (name.as_str(), *content)),
                ))
            }
            Message::User { .. } => {
                idx += 1;
                Turn::Human(user_text(&messages[idx - 1]))
            }
            Message::Model { content } => {
                idx += 1;
                Turn::Assistant(content.clone())
            }
        };
        if let Some(prev) = turns.last_mut() {
            if let (Turn::Human(prev), Turn::Human(next))
            | (Turn::Assistant(prev), Turn::Assistant(next)) = (prev, &turn)
            {
                prev.push('\n');
                prev.push_str(next);
                continue;
            }
        }
        turns.push(turn);
    }
    Ok(turns)
}

/// System text for a text dialect: instructions, post instructions, and
/// the tool preamble when the prompt has tools.
pub(crate) fn text_system(prompt: &Prompt) -> String {
    let mut system = prompt.full_system_text();
    if !prompt.tools().is_empty() {
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(&xml_tools::preamble(prompt.tools()));
    }
    system
}

/// Stop sequences a text dialect needs for the prompt.
pub(crate) fn text_stop_sequences(prompt: &Prompt) -> Vec<String> {
    if prompt.tools().is_empty() {
        Vec::new()
    } else {
        vec![xml_tools::FUNCTION_CALLS_CLOSE.to_owned()]
    }
}
