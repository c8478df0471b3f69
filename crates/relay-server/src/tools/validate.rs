//! Argument checks against the JSON Schema subset tools declare:
//! top-level `type: object`, `required`, per-property `type` and `enum`.

use serde_json::Value;

/// Check `args` against `schema`. The error names the first offending field.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            match obj.get(name) {
                None | Some(Value::Null) => return Err(format!("missing required field '{name}'")),
                Some(_) => {}
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (name, value) in obj {
        let Some(prop) = properties.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                return Err(format!("field '{name}' must be of type {expected}"));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!("field '{name}' must be one of {}", Value::Array(allowed.clone())));
            }
        }
        if let (Some(items), Some(values)) = (prop.get("items"), value.as_array()) {
            if let Some(expected) = items.get("type").and_then(Value::as_str) {
                if let Some(pos) = values.iter().position(|v| !type_matches(expected, v)) {
                    return Err(format!("field '{name}[{pos}]' must be of type {expected}"));
                }
            }
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // unknown type keywords are not enforced
        _ => true,
    }
}
