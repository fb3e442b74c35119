//! Request variables and canonical JSON serialization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Variable assignment for a request or fragment.
///
/// Equality and [`Variables::canonical_json`] ignore key order, so two
/// assignments built in a different order identify the same cached result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(Map<String, Value>);

impl Variables {
    /// Create an empty variable assignment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build variables from a JSON value. Returns None unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Add a variable, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Insert or replace a variable, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Serialize with object keys sorted at every depth.
    pub fn canonical_json(&self) -> String {
        let mut out = String::new();
        write_canonical_object(&self.0, &mut out);
        out
    }
}

impl From<Map<String, Value>> for Variables {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Variables> for Value {
    fn from(variables: Variables) -> Self {
        Value::Object(variables.0)
    }
}

/// Serialize any JSON value with object keys sorted at every depth.
///
/// Array order is significant and preserved.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Display for scalars is compact JSON with string escaping applied.
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        if let Some(value) = map.get(key) {
            write_canonical(value, out);
        }
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"z": 1, "a": [{"y": true, "x": null}]}, "a": "s"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"s","b":{"a":[{"x":null,"y":true}],"z":1}}"#
        );
    }

    #[test]
    fn test_canonical_json_escapes_keys_and_strings() {
        let value = json!({"q\"uote": "line\nbreak"});
        assert_eq!(canonical_json(&value), r#"{"q\"uote":"line\nbreak"}"#);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Variables::from_value(json!([1, 2])).is_none());
        assert!(Variables::from_value(json!("id")).is_none());
        assert_eq!(
            Variables::from_value(json!({"id": "1"})),
            Some(Variables::new().with("id", "1"))
        );
    }

    #[test]
    fn test_empty_variables_serialize_to_empty_object() {
        assert_eq!(Variables::new().canonical_json(), "{}");
    }

    proptest! {
        #[test]
        fn prop_canonical_json_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8)
        ) {
            let mut forward = Variables::new();
            for (k, v) in entries.iter() {
                forward.insert(k.clone(), *v);
            }
            let mut backward = Variables::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), *v);
            }
            prop_assert_eq!(forward.canonical_json(), backward.canonical_json());
        }

        #[test]
        fn prop_canonical_json_is_valid_json(
            entries in proptest::collection::btree_map("[a-z\"\\\\]{1,6}", ".{0,8}", 0..6)
        ) {
            let mut variables = Variables::new();
            for (k, v) in entries.iter() {
                variables.insert(k.clone(), v.clone());
            }
            let parsed: Value = serde_json::from_str(&variables.canonical_json()).unwrap();
            prop_assert_eq!(parsed, Value::from(variables));
        }
    }
}
