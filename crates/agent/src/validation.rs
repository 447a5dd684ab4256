//! Top-level checks of tool arguments against the tool's input schema.

use serde_json::{Map, Value};

use crate::error::ToolError;

/// Checks object shape, required fields, declared property types and `enum` members.
/// Nested schemas are not walked.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), ToolError> {
    let Some(object) = args.as_object() else {
        return Err(ToolError::Validation(format!(
            "arguments must be a JSON object, got {}",
            type_name(args)
        )));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| object.get(*field).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::Validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        check_properties(object, properties)?;
    }

    Ok(())
}

fn check_properties(object: &Map<String, Value>, properties: &Map<String, Value>) -> Result<(), ToolError> {
    for (key, value) in object {
        let Some(property) = properties.get(key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        if let Some(expected) = property.get("type") {
            let matches = match expected {
                Value::String(expected) => matches_type(value, expected),
                Value::Array(options) => {
                    options.iter().filter_map(Value::as_str).any(|option| matches_type(value, option))
                }
                _ => true,
            };
            if !matches {
                return Err(ToolError::Validation(format!(
                    "field `{key}` expected {}, got {}",
                    describe_expected(expected),
                    type_name(value)
                )));
            }
        }

        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                let allowed: Vec<String> = allowed.iter().map(Value::to_string).collect();
                return Err(ToolError::Validation(format!(
                    "field `{key}` must be one of {}",
                    allowed.join(", ")
                )));
            }
        }
    }
    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_expected(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(options) => {
            options.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(" or ")
        }
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
