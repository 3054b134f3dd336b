//! Test-input shapes for playground operations.
//!
//! [`synthesize_input_schema`] describes what a full input for one operation
//! looks like; it never produces values. [`generate_from_schema`] and
//! [`validate_against_schema`] are the local, schema-driven generator and the
//! lightweight checker the debug backend also uses for unit inputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::spec::{ApiOperation, Param};

/// How a test input should be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Defaults derived locally from the schema
    Schema,
    /// The sample input registered next to the schema
    Sample,
    /// Generated remotely by the backend's language model
    Llm,
}

impl InputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Sample => "sample",
            Self::Llm => "llm",
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "schema" => Ok(Self::Schema),
            "sample" => Ok(Self::Sample),
            "llm" => Ok(Self::Llm),
            other => Err(format!("unknown input mode: {other} (expected schema, sample or llm)")),
        }
    }
}

/// Build the composite input schema for one resolved operation.
///
/// The result is an object schema with up to three properties:
/// - `path_params`: every path parameter, all required
/// - `query_params`: only the *required* query parameters; omitted when
///   there are none (optional ones stay editable by hand)
/// - `body`: the JSON body schema, required when the operation says so
pub fn synthesize_input_schema(op: &ApiOperation) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();

    let path_params: Vec<&Param> = op.path_params().collect();
    if !path_params.is_empty() {
        properties.insert("path_params".into(), params_object(&path_params));
        required.push("path_params".into());
    }

    let required_query: Vec<&Param> = op.query_params().filter(|p| p.required).collect();
    if !required_query.is_empty() {
        properties.insert("query_params".into(), params_object(&required_query));
        required.push("query_params".into());
    }

    if let Some(body) = op.body_schema() {
        properties.insert("body".into(), body.clone());
        if op.request_body_required {
            required.push("body".into());
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn params_object(params: &[&Param]) -> Value {
    let properties: Map<String, Value> = params
        .iter()
        .map(|p| (p.name.clone(), p.schema.clone()))
        .collect();
    let required: Vec<Value> = params.iter().map(|p| Value::from(p.name.clone())).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Produce a minimal value that satisfies `schema`.
///
/// `example` wins when present. Objects only get their required properties.
pub fn generate_from_schema(schema: &Value) -> Value {
    if let Some(example) = schema.get("example") {
        return example.clone();
    }

    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let empty = Map::new();
            let props = schema
                .get("properties")
                .and_then(Value::as_object)
                .unwrap_or(&empty);
            let obj: Map<String, Value> = required_names(schema)
                .filter_map(|name| {
                    props
                        .get(name)
                        .filter(|p| p.is_object())
                        .map(|p| (name.to_string(), generate_from_schema(p)))
                })
                .collect();
            Value::Object(obj)
        }
        Some("array") => {
            let item = schema
                .get("items")
                .filter(|i| i.is_object())
                .cloned()
                .unwrap_or_else(|| json!({"type": "string"}));
            Value::Array(vec![generate_from_schema(&item)])
        }
        Some("string") => schema
            .get("enum")
            .and_then(Value::as_array)
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_else(|| Value::from("test")),
        Some("integer") => Value::from(1),
        Some("number") => json!(1.0),
        Some("boolean") => Value::Bool(false),
        _ => Value::Null,
    }
}

/// Check `data` against `schema`, returning `"$.path: message"` entries.
///
/// Deliberately shallow: types, required keys, string `minLength`, and the
/// first five array elements.
pub fn validate_against_schema(data: &Value, schema: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_at(data, schema, "$", &mut errors);
    errors
}

fn validate_at(data: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let obj = match data.as_object() {
                Some(obj) => obj,
                None => return errors.push(format!("{path}: expected object")),
            };
            for name in required_names(schema) {
                if !obj.contains_key(name) {
                    errors.push(format!("{path}.{name}: missing required field"));
                }
            }
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (name, child) in props {
                    if let (Some(value), true) = (obj.get(name), child.is_object()) {
                        validate_at(value, child, &format!("{path}.{name}"), errors);
                    }
                }
            }
        }
        Some("array") => {
            let items = match data.as_array() {
                Some(items) => items,
                None => return errors.push(format!("{path}: expected array")),
            };
            if let Some(item_schema) = schema.get("items").filter(|s| s.is_object()) {
                for (i, item) in items.iter().take(5).enumerate() {
                    validate_at(item, item_schema, &format!("{path}[{i}]"), errors);
                }
            }
        }
        Some("string") => {
            let s = match data.as_str() {
                Some(s) => s,
                None => return errors.push(format!("{path}: expected string")),
            };
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if (s.chars().count() as u64) < min {
                    errors.push(format!("{path}: too short"));
                }
            }
        }
        Some("integer") if !(data.is_i64() || data.is_u64()) => {
            errors.push(format!("{path}: expected integer"));
        }
        Some("number") if !data.is_number() => {
            errors.push(format!("{path}: expected number"));
        }
        Some("boolean") if !data.is_boolean() => {
            errors.push(format!("{path}: expected boolean"));
        }
        _ => {}
    }
}

fn required_names(schema: &Value) -> impl Iterator<Item = &str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}
