//! # llm-dialects-client
//!
//! Sends [`llm_dialects`] prompts to LLM providers over HTTP.
//!
//! A [`CompletionClient`] renders a [`Prompt`](llm_dialects::Prompt) with
//! the model's dialect, wraps it in the provider's request envelope, and
//! returns either a whole [`Completion`] or a [`CompletionStream`] of
//! partial results ending in one terminal event. Tool calls come back as
//! [`ToolCall`](llm_dialects::ToolCall) values next to the text, whether
//! the provider returned them as native fields or the model wrote them as
//! `<function_calls>` XML.
//!
//! # Streaming with cancellation
//!
//! ```rust,no_run
//! use llm_dialects::{Message, ModelConfig, Prompt, Provider};
//! use llm_dialects_client::{ClientOptions, CompletionClient, GenerateOptions};
//!
//! # async fn example() -> Result<(), llm_dialects::LlmError> {
//! let client = CompletionClient::new(ClientOptions::default())?;
//! let model = ModelConfig::new(Provider::Anthropic, "claude-3-opus").with_api_key("sk-ant-...");
//! let prompt = Prompt::new("You are a helpful bot").with_messages([Message::user("Write a haiku")])?;
//!
//! let completion = client
//!     .generate_streaming(&prompt, &model, &GenerateOptions::default(), |partial, cancel| {
//!         if partial.text.len() > 200 {
//!             cancel.cancel();
//!         }
//!     })
//!     .await?;
//! println!("{} ({})", completion.text, completion.state);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`endpoint`] | Per-provider URL, auth, request body, and response decoding |
//! | [`framing`] | SSE and JSON-lines stream framing |
//! | [`options`] | [`GenerateOptions`] and [`ClientOptions`] |
//! | [`retry`] | Bounded retry for side calls |
//! | [`state`] | The per-request [`RequestState`] machine |
//! | [`fan_out`](mod@fan_out) | Concurrent independent calls |

#![warn(missing_docs)]

mod client;
pub mod endpoint;
pub mod fan_out;
pub mod framing;
pub mod options;
pub mod retry;
pub mod state;
#[cfg(feature = "schema")]
pub mod structured;

pub use client::{Completion, CompletionClient, CompletionEvent, CompletionStream};
pub use endpoint::{Endpoint, endpoint_for};
pub use fan_out::fan_out;
pub use framing::Framing;
pub use options::{ClientOptions, GenerateOptions};
pub use retry::{RetryPolicy, with_retry};
pub use state::RequestState;
#[cfg(feature = "schema")]
pub use structured::{StructuredCompletion, parse_structured};
pub use tokio_util::sync::CancellationToken;
