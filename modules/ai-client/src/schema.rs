use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// Types that can be requested as schema-constrained tool input.
///
/// Automatically implemented for any `JsonSchema + DeserializeOwned` type.
/// The generated schema is fully inlined (no `$ref`), closes every object
/// with `additionalProperties: false` and drops the schemars metadata keys
/// the Messages API rejects.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn tool_schema() -> serde_json::Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        close_objects(&mut value);
        inline_refs(&mut value);

        if let serde_json::Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
            map.remove("title");
        }

        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn close_objects(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if map.get("type") == Some(&serde_json::Value::String("object".to_string())) {
                map.insert(
                    "additionalProperties".to_string(),
                    serde_json::Value::Bool(false),
                );
            }
            for (_, v) in map.iter_mut() {
                close_objects(v);
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                close_objects(item);
            }
        }
        _ => {}
    }
}

fn inline_refs(value: &mut serde_json::Value) {
    let definitions = match value {
        serde_json::Value::Object(map) => map.get("definitions").cloned(),
        _ => None,
    };

    if let Some(defs) = definitions {
        inline_refs_recursive(value, &defs);
    }
}

fn inline_refs_recursive(value: &mut serde_json::Value, definitions: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(ref_path)) = map.get("$ref").cloned() {
                if let Some(type_name) = ref_path.strip_prefix("#/definitions/") {
                    if let Some(def) = definitions.get(type_name) {
                        *value = def.clone();
                        inline_refs_recursive(value, definitions);
                        return;
                    }
                }
            }

            if let Some(serde_json::Value::Array(all_of)) = map.get("allOf").cloned() {
                if all_of.len() == 1 {
                    if let Some(single) = all_of.into_iter().next() {
                        *value = single;
                        inline_refs_recursive(value, definitions);
                        return;
                    }
                }
            }

            for (_, v) in map.iter_mut() {
                inline_refs_recursive(v, definitions);
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                inline_refs_recursive(item, definitions);
            }
        }
        _ => {}
    }
}
