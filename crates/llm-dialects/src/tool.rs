//! Tool definitions the model may invoke, and the calls it makes.
//!
//! A [`ToolDefinition`] is provider-agnostic: a name, a description, and a
//! flat list of typed [`Parameter`]s. Each dialect renders it to its own
//! schema (a JSON-schema `function` object, a Gemini function declaration,
//! or an XML `<tool_description>` block).
//!
//! A [`ToolCall`] is what comes back: the tool name plus the parsed
//! arguments. Calls compare equal by `(name, arguments)`; the provider
//! assigned `id` only links a call to its result.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LlmError;

/// The type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Free text.
    String,
    /// Whole number.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` / `false`.
    Boolean,
    /// A JSON array; element type in [`Parameter::item_type`].
    Array,
    /// A JSON object.
    Object,
}

impl ParamType {
    /// The JSON-schema spelling of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn is_scalar(self) -> bool {
        matches!(self, Self::String | Self::Integer | Self::Number | Self::Boolean)
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name, used as the argument key.
    pub name: String,
    /// The parameter's type.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Shown to the model.
    pub description: String,
    /// Allowed values, when the parameter is an enumeration.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Element type for [`ParamType::Array`] parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ParamType>,
    /// Whether the model must supply this argument.
    #[serde(default)]
    pub required: bool,
}

impl Parameter {
    /// Creates an optional parameter with no enum and no item type.
    pub fn new(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            enum_values: None,
            item_type: None,
            required: false,
        }
    }

    /// Marks the parameter as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restricts the parameter to the given values.
    #[must_use]
    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the element type of an array parameter.
    #[must_use]
    pub fn with_item_type(mut self, item_type: ParamType) -> Self {
        self.item_type = Some(item_type);
        self
    }
}

/// A function signature the model may invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique within a prompt's tool set.
    pub name: String,
    /// Tells the model when to use the tool.
    pub description: String,
    /// Ordered parameter list.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl ToolDefinition {
    /// Creates a tool with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Appends a parameter.
    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Names of the required parameters, in declaration order.
    pub fn required_parameters(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }
}

/// Checks rules every dialect shares: unique tool names, `enum` only on
/// scalar types, and array element types that are themselves scalar.
pub fn validate_tools(tools: &[ToolDefinition]) -> Result<(), LlmError> {
    let mut seen = HashSet::with_capacity(tools.len());
    for tool in tools {
        if tool.name.is_empty() {
            return Err(LlmError::configuration("tool name must not be empty"));
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(LlmError::configuration(format!(
                "duplicate tool name `{}`",
                tool.name
            )));
        }
        for param in &tool.parameters {
            if param.enum_values.is_some()
                && !matches!(
                    param.param_type,
                    ParamType::String | ParamType::Integer | ParamType::Number
                )
            {
                return Err(LlmError::configuration(format!(
                    "tool `{}` parameter `{}`: enum is not supported for {} parameters",
                    tool.name, param.name, param.param_type
                )));
            }
            if let Some(item) = param.item_type {
                if param.param_type != ParamType::Array {
                    return Err(LlmError::configuration(format!(
                        "tool `{}` parameter `{}`: item_type requires an array parameter",
                        tool.name, param.name
                    )));
                }
                if !item.is_scalar() {
                    return Err(LlmError::configuration(format!(
                        "tool `{}` parameter `{}`: arrays of {item} are not supported",
                        tool.name, param.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// A model's request to invoke a named tool.
///
/// Equality ignores `id`: two calls are the same call when they name the
/// same tool with the same arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier linking the call to its result. Provider-assigned when
    /// the provider has native tool calls, generated otherwise.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Parsed arguments keyed by parameter name.
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Creates a call from its parts.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// The `{name, arguments}` JSON document used as the content of a
    /// `tool_call` message.
    pub fn to_content(&self) -> String {
        serde_json::json!({
            "name": self.name,
            "arguments": Value::Object(self.arguments.clone()),
        })
        .to_string()
    }

    /// Decodes a `tool_call` message body back into a call with the given id.
    ///
    /// `arguments` may be an object or a string holding a JSON object (the
    /// shape OpenAI uses on the wire).
    pub fn from_content(id: &str, content: &str) -> Result<Self, LlmError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| LlmError::malformed_tool_call(format!("invalid JSON: {e}"), content))?;
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| LlmError::malformed_tool_call("missing tool name", content))?;
        let arguments = match value.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(raw)) => parse_arguments(raw)?,
            Some(_) => {
                return Err(LlmError::malformed_tool_call(
                    "arguments must be an object",
                    content,
                ));
            }
        };
        Ok(Self::new(id, name, arguments))
    }
}

impl PartialEq for ToolCall {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.arguments == other.arguments
    }
}

/// Parses a complete JSON arguments document. An empty string is an empty
/// argument map.
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>, LlmError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(LlmError::malformed_tool_call("arguments must be a JSON object", raw)),
        Err(e) => Err(LlmError::malformed_tool_call(format!("invalid JSON arguments: {e}"), raw)),
    }
}

/// A JSON Schema document for structured output.
///
/// Validation goes through the [`jsonschema`] crate and derivation from
/// Rust types through [`schemars`] (both behind the `schema` feature).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema(Value);

impl JsonSchema {
    /// Wraps a raw schema value.
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    /// The underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Derives a schema from a type implementing [`schemars::JsonSchema`].
    #[cfg(feature = "schema")]
    pub fn from_type<T: schemars::JsonSchema>() -> Result<Self, serde_json::Error> {
        let schema = schemars::schema_for!(T);
        Ok(Self(serde_json::to_value(schema)?))
    }

    /// Validates `value` against this schema.
    ///
    /// Returns [`LlmError::SchemaValidation`] listing every violation, or
    /// [`LlmError::Configuration`] when the schema itself is malformed.
    #[cfg(feature = "schema")]
    pub fn validate(&self, value: &Value) -> Result<(), LlmError> {
        let validator = jsonschema::validator_for(&self.0)
            .map_err(|e| LlmError::configuration(format!("invalid JSON schema: {e}")))?;
        let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::SchemaValidation {
                message: errors.join("; "),
                schema: self.0.clone(),
                actual: value.clone(),
            })
        }
    }
}
