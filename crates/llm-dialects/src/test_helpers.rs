//! Pre-built fixtures for code that uses `llm-dialects` types.
//!
//! Available with the `test-utils` feature so the client crate's tests can
//! reuse them. Also compiled for this crate's own `#[cfg(test)]` builds.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::config::{ModelConfig, Provider};
use crate::prompt::{Message, Prompt};
use crate::tokenizer::BasicTokenizer;
use crate::tool::{ParamType, Parameter, ToolCall, ToolDefinition};

/// A model config counting tokens with [`BasicTokenizer`], pointed at `url`.
pub fn test_model(provider: Provider, name: &str, url: &str) -> ModelConfig {
    ModelConfig::new(provider, name)
        .with_url(url)
        .with_api_key("test-key")
        .with_max_prompt_tokens(1000)
        .with_tokenizer(Arc::new(BasicTokenizer))
}

/// `Prompt("You are a helpful bot", [user(text)])`.
pub fn sample_prompt(text: &str) -> Prompt {
    Prompt::new("You are a helpful bot")
        .with_messages([Message::user(text)])
        .unwrap_or_default()
}

/// A search tool with one required string parameter `query`.
pub fn search_tool() -> ToolDefinition {
    ToolDefinition::new("search", "Search the forum")
        .with_parameter(Parameter::new("query", ParamType::String, "what to look for").required())
        .with_parameter(
            Parameter::new("order", ParamType::String, "sort order").with_enum(["latest", "likes"]),
        )
}

/// An image tool with one required array-of-strings parameter `prompts`.
pub fn image_tool() -> ToolDefinition {
    ToolDefinition::new("image", "Render images from prompts").with_parameter(
        Parameter::new("prompts", ParamType::Array, "one prompt per image")
            .with_item_type(ParamType::String)
            .required(),
    )
}

/// Builds a call from a JSON object literal.
pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    let arguments = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ToolCall::new(id, name, arguments)
}

/// A prompt with tools and one completed search round trip.
pub fn tool_conversation() -> Prompt {
    let call = tool_call("call_1", "search", json!({"query": "rust"}));
    Prompt::new("You are a helpful bot")
        .with_tools(vec![search_tool(), image_tool()])
        .and_then(|p| {
            p.with_messages([
                Message::user("find rust posts"),
                Message::tool_call(&call),
                Message::tool_result("call_1", Some("search".into()), "[\"post 1\"]"),
            ])
        })
        .unwrap_or_default()
}
