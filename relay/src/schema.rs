//! Structural validation of tool arguments against the JSON Schema subset the
//! registry uses: `type` (a name or a list of names), `properties`, `required`, `additionalProperties`,
//! `enum`, `minimum`, `minLength` and `items`.

use serde_json::Value;

use crate::errors::{RelayError, Result};

pub fn validate(schema: &Value, value: &Value) -> Result<()> {
    validate_at(schema, value, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<()> {
    match schema.get("type") {
        Some(Value::String(expected)) if !matches_type(expected, value) => {
            return Err(violation(path, format!("expected {expected}, found {}", type_name(value))));
        }
        Some(Value::Array(options)) => {
            let expected: Vec<&str> = options.iter().filter_map(Value::as_str).collect();
            if !expected.iter().any(|kind| matches_type(kind, value)) {
                return Err(violation(
                    path,
                    format!("expected {}, found {}", expected.join(" or "), type_name(value)),
                ));
            }
        }
        _ => {}
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(violation(path, format!("must be one of {}", Value::Array(options.clone()))));
        }
    }

    if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64) {
        if let Some(number) = value.as_f64() {
            if number < minimum {
                return Err(violation(path, format!("must be at least {minimum}")));
            }
        }
    }

    if let Some(min_length) = schema.get("minLength").and_then(Value::as_u64) {
        if let Some(text) = value.as_str() {
            if (text.chars().count() as u64) < min_length {
                return Err(violation(path, format!("must be at least {min_length} characters")));
            }
        }
    }

    if let (Some(items), Some(entries)) = (schema.get("items"), value.as_array()) {
        for (index, entry) in entries.iter().enumerate() {
            validate_at(items, entry, &format!("{path}[{index}]"))?;
        }
    }

    if let Some(object) = value.as_object() {
        let properties = schema.get("properties").and_then(Value::as_object);
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(field) {
                    return Err(violation(path, format!("missing required property '{field}'")));
                }
            }
        }
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
        for (key, entry) in object {
            match properties.and_then(|props| props.get(key)) {
                Some(property) => validate_at(property, entry, &format!("{path}.{key}"))?,
                None if closed => {
                    return Err(violation(path, format!("unexpected property '{key}'")));
                }
                None => {}
            }
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(number) if number.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn violation(path: &str, detail: String) -> RelayError {
    RelayError::InvalidParams(format!("{path}: {detail}"))
}
