//! Shape helpers shared by the field transforms

use crate::domain::Document;
use serde_json::Value;
use std::collections::BTreeSet;

/// Recursively replaces `null` with `""`
///
/// # Examples
///
/// ```
/// use lineage::core::transform::empty_if_none;
/// use serde_json::json;
///
/// let value = empty_if_none(json!({"title": null, "tags": [null, "x"]}));
/// assert_eq!(value, json!({"title": "", "tags": ["", "x"]}));
/// ```
pub fn empty_if_none(value: Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::Array(items) => Value::Array(items.into_iter().map(empty_if_none).collect()),
        Value::Object(map) => Value::Object(empty_if_none_map(map)),
        other => other,
    }
}

/// [`empty_if_none`] over every value of a document
pub fn empty_if_none_map(map: Document) -> Document {
    map.into_iter()
        .map(|(k, v)| (k, empty_if_none(v)))
        .collect()
}

/// Coerces a value that may be a scalar or a list into a list
///
/// `null` becomes the empty list.
pub fn scalar_or_list(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Distinct string members of a scalar-or-list value, sorted
///
/// Non-string members are kept by their JSON text.
pub fn string_set(value: Value) -> BTreeSet<String> {
    scalar_or_list(value)
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

/// Converts a string set back into a JSON list
pub fn set_to_json(set: BTreeSet<String>) -> Value {
    Value::Array(set.into_iter().map(Value::String).collect())
}

/// Whether a value carries no information
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Whether a value is missing or spelled as a null in legacy data
pub fn is_none_like(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty() || s == "None",
        _ => false,
    }
}

/// Removes and returns the object stored under `key`
///
/// Missing or non-object values yield an empty object.
pub fn take_object(doc: &mut Document, key: &str) -> Document {
    match doc.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Document::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_if_none_nested() {
        let value = json!({
            "title": null,
            "tags": [null, "x"],
            "meta": {"a": null, "b": [{"c": null}], "n": 3}
        });
        assert_eq!(
            empty_if_none(value),
            json!({
                "title": "",
                "tags": ["", "x"],
                "meta": {"a": "", "b": [{"c": ""}], "n": 3}
            })
        );
    }

    #[test]
    fn test_scalar_or_list() {
        assert_eq!(scalar_or_list(json!("a")), vec![json!("a")]);
        assert_eq!(scalar_or_list(json!(["a", "b"])), vec![json!("a"), json!("b")]);
        assert!(scalar_or_list(Value::Null).is_empty());
    }

    #[test]
    fn test_string_set_dedups_and_sorts() {
        let set = string_set(json!(["zeta", "alpha", "zeta"]));
        assert_eq!(set_to_json(set), json!(["alpha", "zeta"]));
    }

    #[test]
    fn test_is_none_like() {
        assert!(is_none_like(None));
        assert!(is_none_like(Some(&json!("None"))));
        assert!(is_none_like(Some(&json!(""))));
        assert!(!is_none_like(Some(&json!("article"))));
    }

    #[test]
    fn test_take_object() {
        let mut doc = Document::new();
        doc.insert("imprint".into(), json!({"isbn": "1"}));
        doc.insert("meeting".into(), json!("x"));
        assert_eq!(take_object(&mut doc, "imprint").len(), 1);
        assert!(take_object(&mut doc, "meeting").is_empty());
        assert!(doc.is_empty());
    }
}
