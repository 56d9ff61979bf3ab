//! The tag-based tool convention used by text dialects: a tool preamble in
//! the system text, `<function_calls>` blocks in assistant turns, and
//! `<function_results>` blocks in the following human turn.

use std::fmt::Write as _;

use quick_xml::escape::partial_escape;
use serde_json::Value;

use crate::tool::{ToolCall, ToolDefinition};

/// The stop sequence that ends a model turn after it calls tools.
pub const FUNCTION_CALLS_CLOSE: &str = "</function_calls>";

const INSTRUCTIONS: &str = "In this environment you have access to a set of tools you can use to answer the user's question.
You may call them like this.
<function_calls>
<invoke>
<tool_name>$TOOL_NAME</tool_name>
<parameters>
<$PARAMETER_NAME>$PARAMETER_VALUE</$PARAMETER_NAME>
...
</parameters>
</invoke>
</function_calls>

If a parameter takes a list or an object, write its value as JSON.
Here are the tools available:";

/// Renders the instructions and `<tools>` block appended to the system
/// text. `write!` into a `String` cannot fail, so its results are ignored.
pub fn preamble(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(INSTRUCTIONS);
    out.push_str("\n\n<tools>\n");
    for tool in tools {
        let _ = write!(
            out,
            "<tool_description>\n<tool_name>{}</tool_name>\n<description>{}</description>\n<parameters>\n",
            tool.name, tool.description
        );
        for param in &tool.parameters {
            let _ = write!(
                out,
                "<parameter>\n<name>{}</name>\n<type>{}</type>\n<description>{}</description>\n<required>{}</required>\n",
                param.name, param.param_type, param.description, param.required
            );
            if let Some(item) = param.item_type {
                let _ = writeln!(out, "<items>{item}</items>");
            }
            if let Some(options) = &param.enum_values {
                let _ = writeln!(out, "<options>{}</options>", options.join(","));
            }
            out.push_str("</parameter>\n");
        }
        out.push_str("</parameters>\n</tool_description>\n");
    }
    out.push_str("</tools>");
    out
}

/// Renders one or more calls as a single `<function_calls>` block.
pub fn render_calls(calls: &[ToolCall]) -> String {
    let mut out = String::from("<function_calls>\n");
    for call in calls {
        let _ = write!(
            out,
            "<invoke>\n<tool_name>{}</tool_name>\n<parameters>\n",
            call.name
        );
        for (name, value) in &call.arguments {
            let text = match value {
                Value::String(s) => partial_escape(s.as_str()).into_owned(),
                other => partial_escape(other.to_string().as_str()).into_owned(),
            };
            let _ = writeln!(out, "<{name}>{text}</{name}>");
        }
        out.push_str("</parameters>\n</invoke>\n");
    }
    out.push_str(FUNCTION_CALLS_CLOSE);
    out
}

/// Renders tool results, as `(tool name, content)` pairs, as a single
/// `<function_results>` block.
pub fn render_results<'a>(results: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::from("<function_results>\n");
    for (name, content) in results {
        let _ = write!(
            out,
            "<result>\n<tool_name>{name}</tool_name>\n<json>\n{content}\n</json>\n</result>\n"
        );
    }
    out.push_str("</function_results>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ParamType, Parameter};
    use serde_json::json;

    #[test]
    fn test_preamble_describes_each_tool() {
        let tool = ToolDefinition::new("get_weather", "Get the weather in a city")
            .with_parameter(Parameter::new("location", ParamType::String, "the city").required())
            .with_parameter(
                Parameter::new("unit", ParamType::String, "unit").with_enum(["c", "f"]),
            );
        let text = preamble(&[tool]);
        assert!(text.contains("<tools>\n<tool_description>\n<tool_name>get_weather</tool_name>"));
        assert!(text.contains("<name>location</name>\n<type>string</type>"));
        assert!(text.contains("<required>true</required>"));
        assert!(text.contains("<options>c,f</options>"));
        assert!(text.ends_with("</tools>"));
    }

    #[test]
    fn test_render_calls_writes_json_for_lists() {
        let args = json!({"prompts": ["a", "b"]}).as_object().cloned().unwrap();
        let text = render_calls(&[ToolCall::new("tool_0", "image", args)]);
        assert_eq!(
            text,
            "<function_calls>\n<invoke>\n<tool_name>image</tool_name>\n<parameters>\n<prompts>[\"a\",\"b\"]</prompts>\n</parameters>\n</invoke>\n</function_calls>"
        );
    }

    #[test]
    fn test_render_results() {
        let text = render_results([("search", "{\"hits\":1}")]);
        assert_eq!(
            text,
            "<function_results>\n<result>\n<tool_name>search</tool_name>\n<json>\n{\"hits\":1}\n</json>\n</result>\n</function_results>"
        );
    }
}
