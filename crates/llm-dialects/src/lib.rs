//! # llm-dialects
//!
//! Provider-agnostic prompts and the wire-format dialects that render them.
//!
//! A [`Prompt`] holds system instructions, few-shot examples, the running
//! conversation, and the tools a model may call. A [`Dialect`] trims it to
//! the model's token budget and renders it into one provider family's
//! request shape: chat-style JSON messages, Claude Messages content blocks,
//! Gemini `contents`, or a single instruction-template string. Tool calls
//! coming back are extracted by a [`parser::ToolCallParser`], either from
//! native function-call fields or from a `<function_calls>` XML block.
//!
//! This crate does no I/O. The sibling `llm-dialects-client` crate sends
//! rendered prompts over HTTP and streams the results back.
//!
//! # Quick start
//!
//! ```rust
//! use llm_dialects::{DialectKind, Message, ModelConfig, Prompt, RenderedPrompt, dialect_for};
//!
//! let prompt = Prompt::new("You are a helpful bot")
//!     .with_messages([Message::user("hello")])
//!     .unwrap();
//! let model = ModelConfig::default();
//! let rendered = dialect_for(DialectKind::ChatGpt).translate(&prompt, &model).unwrap();
//! let RenderedPrompt::Chat(chat) = rendered else { unreachable!() };
//! assert_eq!(chat.messages.len(), 2);
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`prompt`] | Messages, few-shot examples, and the [`Prompt`] builder |
//! | [`tool`] | Tool definitions and parsed [`ToolCall`]s |
//! | [`tokenizer`] | The [`Tokenizer`] trait and its implementations |
//! | [`trim`] | Budget trimming shared by every dialect |
//! | [`dialect`] | The [`Dialect`] strategies |
//! | [`parser`] | Structured and XML tool-call extraction |
//! | [`stream`] | Stream events and the partial-result accumulator |
//! | [`config`] | [`ModelConfig`], [`ModelSpec`], and the tokenizer catalog |
//! | [`audit`] | Audit records and sinks |
//! | [`usage`] | Token counts |
//! | [`error`] | The unified [`LlmError`] |

#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod dialect;
pub mod error;
pub mod parser;
pub mod prompt;
pub mod stream;
pub mod tokenizer;
pub mod tool;
pub mod trim;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

pub use config::{ModelConfig, ModelSpec, Provider, TokenizerCatalog, TokenizerKind};
pub use dialect::{Dialect, DialectKind, RenderedPrompt, dialect_for};
pub use error::LlmError;
pub use prompt::{Message, Prompt};
pub use stream::{PartialResult, StopReason, StreamEvent};
pub use tokenizer::Tokenizer;
pub use tool::{ToolCall, ToolDefinition};
pub use usage::Usage;
