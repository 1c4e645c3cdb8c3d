//! JSON Schema checks for tool inputs and outputs.

use jsonschema::JSONSchema;
use serde_json::Value;

/// Confirm that `schema` compiles.
pub fn check_schema(schema: &Value) -> Result<(), String> {
    JSONSchema::compile(schema)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Validate `instance` against an optional schema. `None` accepts anything.
///
/// On failure returns all violations joined into one message.
pub fn validate(schema: Option<&Value>, instance: &Value) -> Result<(), String> {
    let Some(schema) = schema else {
        return Ok(());
    };
    let compiled = JSONSchema::compile(schema).map_err(|e| format!("invalid schema: {e}"))?;

    let violations: Vec<String> = match compiled.validate(instance) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect(),
    };

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations.join("; "))
    }
}
