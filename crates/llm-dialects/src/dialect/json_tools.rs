//! JSON-schema rendering of tool parameters, shared by the dialects with
//! native tool fields.

use serde_json::{Map, Value, json};

use crate::tool::{Parameter, ToolDefinition};

fn property(param: &Parameter) -> Value {
    let mut prop = Map::new();
    prop.insert("type".into(), param.param_type.as_str().into());
    prop.insert("description".into(), param.description.clone().into());
    if let Some(values) = &param.enum_values {
        prop.insert("enum".into(), json!(values));
    }
    if let Some(item) = param.item_type {
        prop.insert("items".into(), json!({"type": item.as_str()}));
    }
    Value::Object(prop)
}

/// `{type: object, properties: {...}, required: [...]}` for a tool.
pub fn parameters_schema(tool: &ToolDefinition) -> Value {
    let properties: Map<String, Value> = tool
        .parameters
        .iter()
        .map(|p| (p.name.clone(), property(p)))
        .collect();
    let required: Vec<&str> = tool.required_parameters().collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ParamType;

    #[test]
    fn test_parameters_schema() {
        let tool = ToolDefinition::new("image", "Render")
            .with_parameter(
                Parameter::new("prompts", ParamType::Array, "what to draw")
                    .with_item_type(ParamType::String)
                    .required(),
            )
            .with_parameter(
                Parameter::new("style", ParamType::String, "style").with_enum(["photo", "art"]),
            );
        assert_eq!(
            parameters_schema(&tool),
            json!({
                "type": "object",
                "properties": {
                    "prompts": {"type": "array", "description": "what to draw", "items": {"type": "string"}},
                    "style": {"type": "string", "description": "style", "enum": ["photo", "art"]}
                },
                "required": ["prompts"]
            })
        );
    }
}
