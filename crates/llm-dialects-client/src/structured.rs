//! Typed, schema-validated completions.
//!
//! [`CompletionClient::complete_structured`] derives a JSON Schema from the
//! target type, asks the provider to constrain its output to it, then
//! validates and deserializes the text that comes back. Providers without
//! native structured output still get the schema check.

use llm_dialects::tool::JsonSchema;
use llm_dialects::{LlmError, ModelConfig, Prompt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::{Completion, CompletionClient};
use crate::options::GenerateOptions;

/// A deserialized structured completion.
#[derive(Debug, Clone)]
pub struct StructuredCompletion<T> {
    /// The validated value.
    pub value: T,
    /// The underlying completion, including the raw text and usage.
    pub completion: Completion,
}

impl CompletionClient {
    /// Completes `prompt` and parses the output as a `T`.
    ///
    /// Fails with [`LlmError::ResponseFormat`] when the output is not JSON
    /// and [`LlmError::SchemaValidation`] when it does not match the schema.
    pub async fn complete_structured<T>(
        &self,
        prompt: &Prompt,
        model: &ModelConfig,
        options: &GenerateOptions,
    ) -> Result<StructuredCompletion<T>, LlmError>
    where
        T: DeserializeOwned + schemars::JsonSchema,
    {
        let schema = JsonSchema::from_type::<T>()
            .map_err(|e| LlmError::configuration(format!("failed to derive JSON schema: {e}")))?;
        let options = GenerateOptions {
            response_schema: Some(schema.clone()),
            ..options.clone()
        };
        let completion = self.complete(prompt, model, &options).await?;
        let value = parse_structured(&completion.text, &schema)?;
        Ok(StructuredCompletion { value, completion })
    }
}

/// Parses model output as JSON, validates it, and deserializes it.
///
/// A surrounding Markdown code fence is ignored.
pub fn parse_structured<T: DeserializeOwned>(
    text: &str,
    schema: &JsonSchema,
) -> Result<T, LlmError> {
    let json = strip_fence(text);
    let value: Value = serde_json::from_str(json).map_err(|e| LlmError::ResponseFormat {
        message: format!("model output is not valid JSON: {e}"),
        raw: text.to_owned(),
    })?;
    schema.validate(&value)?;
    serde_json::from_value(value).map_err(|e| LlmError::ResponseFormat {
        message: format!("model output does not match the target type: {e}"),
        raw: text.to_owned(),
    })
}

fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
