use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Inlining stops here; a schema this deep is malformed or self-referential.
const MAX_DEPTH: usize = 32;

/// Types usable as strict structured output.
///
/// Implemented for any `JsonSchema + DeserializeOwned` type. The endpoint
/// requires:
/// 1. `additionalProperties: false` on every object
/// 2. every property listed in `required`, nullable ones included
/// 3. fully inlined schemas (no `$ref`)
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn strict_schema() -> Value {
        let root = serde_json::to_value(schema_for!(Self)).unwrap_or_default();
        let definitions = root
            .get("definitions")
            .cloned()
            .unwrap_or(Value::Null);

        let mut schema = rebuild(root, &definitions, 0);
        if let Value::Object(map) = &mut schema {
            map.remove("definitions");
            map.remove("$schema");
        }
        schema
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Rebuild one schema node into its strict form, in a single pass:
/// `$ref`s are replaced by their definition, single-entry `allOf` wrappers
/// (schemars' encoding for a referenced named type) are collapsed, and
/// every object schema is closed with all of its properties required.
fn rebuild(node: Value, definitions: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return node;
    }

    let map = match node {
        Value::Object(map) => map,
        Value::Array(items) => {
            let items = items
                .into_iter()
                .map(|item| rebuild(item, definitions, depth + 1))
                .collect();
            return Value::Array(items);
        }
        leaf => return leaf,
    };

    // A reference node is discarded entirely in favor of its definition.
    if let Some(name) = map
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|path| path.strip_prefix("#/definitions/"))
    {
        if let Some(definition) = definitions.get(name) {
            return rebuild(definition.clone(), definitions, depth + 1);
        }
    }

    // schemars wraps a referenced type as `{"allOf": [{"$ref": …}]}`.
    if let Some(Value::Array(wrapped)) = map.get("allOf") {
        if wrapped.len() == 1 {
            return rebuild(wrapped[0].clone(), definitions, depth + 1);
        }
    }

    let is_object_schema = map.get("type").and_then(Value::as_str) == Some("object");
    let property_names: Vec<Value> = map
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().map(Value::String).collect())
        .unwrap_or_default();

    let mut rebuilt = serde_json::Map::with_capacity(map.len() + 2);
    for (key, value) in map {
        rebuilt.insert(key, rebuild(value, definitions, depth + 1));
    }
    if is_object_schema {
        rebuilt.insert("additionalProperties".into(), Value::Bool(false));
        rebuilt.insert("required".into(), Value::Array(property_names));
    }
    Value::Object(rebuilt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[serde(rename_all = "snake_case")]
    enum Light {
        Green,
        Yellow,
        Red,
    }

    #[derive(Deserialize, JsonSchema)]
    struct Finding {
        light: Light,
        note: Option<String>,
        tags: Vec<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    struct Report {
        findings: Vec<Finding>,
        reviewed_by: Option<String>,
    }

    /// Every object node in the rendered schema must be closed and carry a
    /// `required` list covering all of its properties.
    fn assert_strict(node: &Value) {
        match node {
            Value::Object(map) => {
                if map.get("type").and_then(Value::as_str) == Some("object") {
                    assert_eq!(map.get("additionalProperties"), Some(&Value::Bool(false)));
                    let required: Vec<&str> = map["required"]
                        .as_array()
                        .expect("required array")
                        .iter()
                        .filter_map(Value::as_str)
                        .collect();
                    if let Some(props) = map.get("properties").and_then(Value::as_object) {
                        for name in props.keys() {
                            assert!(required.contains(&name.as_str()), "{name} not required");
                        }
                    }
                }
                map.values().for_each(assert_strict);
            }
            Value::Array(items) => items.iter().for_each(assert_strict),
            _ => {}
        }
    }

    #[test]
    fn nullable_fields_are_still_required() {
        let schema = Report::strict_schema();
        assert_strict(&schema);
        let required = serde_json::to_string(&schema["required"]).unwrap();
        assert!(required.contains("reviewed_by"));
    }

    #[test]
    fn nested_types_inline_without_refs() {
        let schema = Report::strict_schema();
        let rendered = serde_json::to_string(&schema).unwrap();
        assert!(!rendered.contains("$ref"), "refs left in: {rendered}");
        assert!(!rendered.contains("allOf"), "allOf wrapper left in: {rendered}");
        assert!(schema.get("definitions").is_none());
        assert!(schema.get("$schema").is_none());

        // The enum variants survive the rewrite inside the array items.
        assert!(rendered.contains("green") && rendered.contains("red"));
    }

    #[test]
    fn deeply_nested_arrays_are_processed() {
        #[derive(Deserialize, JsonSchema)]
        struct Matrix {
            rows: Vec<Vec<Finding>>,
        }

        let schema = Matrix::strict_schema();
        assert_strict(&schema);
        assert!(!serde_json::to_string(&schema).unwrap().contains("$ref"));
    }
}
