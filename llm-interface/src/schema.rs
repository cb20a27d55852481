use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Types usable as a strict structured-output response.
///
/// Strict mode wants `additionalProperties: false` on every object, every
/// property listed in `required`, and no `$ref`s.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn openai_schema() -> Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        let definitions = value.get("definitions").cloned().unwrap_or(Value::Null);
        inline_refs(&mut value, &definitions);
        close_objects(&mut value);

        if let Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
            map.remove("title");
        }
        value
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
                let required: Vec<Value> = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().map(Value::String).collect())
                    .unwrap_or_default();
                map.insert("required".to_string(), Value::Array(required));
            }
            map.values_mut().for_each(close_objects);
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(resolved) = resolve_ref(map, definitions) {
                *value = resolved;
                inline_refs(value, definitions);
                return;
            }
            for (key, child) in map.iter_mut() {
                if key != "definitions" {
                    inline_refs(child, definitions);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| inline_refs(v, definitions)),
        _ => {}
    }
}

/// `{"$ref": ...}` and single-element `allOf` wrappers resolve to the target schema.
fn resolve_ref(map: &Map<String, Value>, definitions: &Value) -> Option<Value> {
    if let Some(path) = map.get("$ref").and_then(Value::as_str) {
        let name = path.strip_prefix("#/definitions/")?;
        return definitions.get(name).cloned();
    }
    match map.get("allOf").and_then(Value::as_array) {
        Some(all_of) if all_of.len() == 1 => {
            let mut inner = all_of[0].clone();
            // Keep the field's own description when unwrapping
            if let (Some(description), Value::Object(inner_map)) =
                (map.get("description"), &mut inner)
            {
                inner_map
                    .entry("description")
                    .or_insert_with(|| description.clone());
            }
            Some(inner)
        }
        _ => None,
    }
}
