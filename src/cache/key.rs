//! Cache Key Module
//!
//! Turns structured keys into the canonical strings used for equality and
//! storage addressing.

use serde_json::Value;

/// Separator placed between the parts of a sequence key.
pub const KEY_SEPARATOR: &str = ":";

// == Cache Key ==
/// A cache key: a plain string, an ordered sequence, or an object.
///
/// Two keys address the same entry iff their [`normalize`](Self::normalize)d
/// forms are equal. Object components are compared structurally with sorted
/// property names.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey(Value);

impl CacheKey {
    pub fn new(key: impl Into<Value>) -> Self {
        Self(key.into())
    }

    /// Canonical string form of this key.
    pub fn normalize(&self) -> String {
        normalize(&self.0)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(Value::String(key.to_string()))
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(Value::String(key))
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        Self(Value::String(key.clone()))
    }
}

impl From<Value> for CacheKey {
    fn from(key: Value) -> Self {
        Self(key)
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> Self {
        key.clone()
    }
}

impl<T: Into<Value>> From<Vec<T>> for CacheKey {
    fn from(parts: Vec<T>) -> Self {
        Self(Value::Array(parts.into_iter().map(Into::into).collect()))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for CacheKey {
    fn from(parts: [T; N]) -> Self {
        Self(Value::Array(parts.into_iter().map(Into::into).collect()))
    }
}

impl<T: Clone + Into<Value>> From<&[T]> for CacheKey {
    fn from(parts: &[T]) -> Self {
        Self(Value::Array(parts.iter().cloned().map(Into::into).collect()))
    }
}

// == Normalize ==
/// Normalizes a key value.
///
/// - strings are used verbatim, other scalars as their JSON text
/// - sequences normalize each element and join them with `:`
/// - objects and nested sequences are written as canonical JSON
pub fn normalize(key: &Value) -> String {
    match key {
        Value::Array(parts) => parts
            .iter()
            .map(normalize_part)
            .collect::<Vec<_>>()
            .join(KEY_SEPARATOR),
        other => normalize_part(other),
    }
}

fn normalize_part(part: &Value) -> String {
    match part {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => canonical_json(part),
        scalar => scalar.to_string(),
    }
}

// == Canonical JSON ==
/// Serializes `value` with object keys sorted at every depth.
///
/// Used for key normalization and for the payloads written to durable
/// storage, so identical content always produces identical text.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<_> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(field, out);
            }
            out.push('}');
        }
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_string_key_is_verbatim() {
        assert_eq!(CacheKey::from("reviews").normalize(), "reviews");
        assert_eq!(CacheKey::from(String::from("a b")).normalize(), "a b");
    }

    #[test]
    fn test_sequence_key_joins_in_order() {
        assert_eq!(CacheKey::from(["reviews", "u1"]).normalize(), "reviews:u1");
        assert_eq!(
            CacheKey::from(vec![json!("page"), json!(2), json!(true), json!(null)]).normalize(),
            "page:2:true:null"
        );
        assert_ne!(
            CacheKey::from(["a", "b"]).normalize(),
            CacheKey::from(["b", "a"]).normalize()
        );
    }

    #[test]
    fn test_object_part_ignores_insertion_order() {
        let mut first = Map::new();
        first.insert("status".into(), json!("open"));
        first.insert("page".into(), json!(1));

        let mut second = Map::new();
        second.insert("page".into(), json!(1));
        second.insert("status".into(), json!("open"));

        let a = CacheKey::from(vec![json!("reviews"), Value::Object(first)]);
        let b = CacheKey::from(vec![json!("reviews"), Value::Object(second)]);

        assert_eq!(a.normalize(), b.normalize());
        assert_eq!(a.normalize(), r#"reviews:{"page":1,"status":"open"}"#);
    }

    #[test]
    fn test_nested_object_is_sorted_recursively() {
        let key = CacheKey::new(json!({"z": {"b": 2, "a": [1, {"d": 0, "c": 0}]}, "a": null}));
        assert_eq!(
            key.normalize(),
            r#"{"a":null,"z":{"a":[1,{"c":0,"d":0}],"b":2}}"#
        );
    }

    #[test]
    fn test_numeric_key() {
        assert_eq!(CacheKey::new(json!(42)).normalize(), "42");
        assert_eq!(CacheKey::from([1, 2, 3]).normalize(), "1:2:3");
    }

    #[test]
    fn test_slice_key() {
        let parts = ["user".to_string(), "7".to_string()];
        assert_eq!(CacheKey::from(&parts[..]).normalize(), "user:7");
    }

    #[test]
    fn test_canonical_json_escapes_strings() {
        assert_eq!(canonical_json(&json!({"q\"": "a\nb"})), r#"{"q\"":"a\nb"}"#);
    }
}
