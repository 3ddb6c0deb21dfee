//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check key normalization and the cache's read/write contract.

use proptest::prelude::*;
use serde_json::{Map, Value};
use std::thread::sleep;
use std::time::Duration;

use crate::cache::{CacheKey, CacheManager};
use crate::config::CacheConfig;

// == Strategies ==
/// Generates key segments (non-empty, no separator)
fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,16}".prop_map(|s| s)
}

/// Generates cache values
fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,64}".prop_map(|s| s)
}

/// Generates arbitrary JSON values a few levels deep
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,4}", inner), 0..4).prop_map(|fields| {
                Value::Object(fields.into_iter().collect::<Map<String, Value>>())
            }),
        ]
    })
}

/// Rebuilds every object in `value` with its fields inserted in reverse order
fn reinsert_reversed(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut rebuilt = Map::new();
            for (name, field) in map.iter().rev() {
                rebuilt.insert(name.clone(), reinsert_reversed(field));
            }
            Value::Object(rebuilt)
        }
        Value::Array(items) => Value::Array(items.iter().map(reinsert_reversed).collect()),
        scalar => scalar.clone(),
    }
}

fn cache() -> CacheManager {
    CacheManager::in_memory(CacheConfig::default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Structurally equal keys normalize identically, whatever the property
    // insertion order.
    #[test]
    fn prop_normalization_ignores_field_order(parts in prop::collection::vec(json_strategy(), 1..4)) {
        let original = CacheKey::from(parts.clone());
        let reordered = CacheKey::from(parts.iter().map(reinsert_reversed).collect::<Vec<_>>());

        prop_assert_eq!(original.normalize(), reordered.normalize());
    }

    // Normalization is a pure function.
    #[test]
    fn prop_normalization_is_deterministic(value in json_strategy()) {
        let key = CacheKey::new(value);
        prop_assert_eq!(key.normalize(), key.clone().normalize());
    }

    // Storing then immediately reading returns the stored value.
    #[test]
    fn prop_roundtrip_storage(key in segment_strategy(), value in value_strategy()) {
        let cache = cache();

        cache.set(key.as_str(), &value, None).unwrap();

        prop_assert_eq!(cache.get::<String>(key.as_str()), Some(value));
    }

    // After a delete the key reads as absent.
    #[test]
    fn prop_delete_removes_entry(key in segment_strategy(), value in value_strategy()) {
        let cache = cache();

        cache.set(key.as_str(), &value, None).unwrap();
        prop_assert!(cache.has(key.as_str()));

        cache.delete(key.as_str());
        prop_assert_eq!(cache.get::<String>(key.as_str()), None);
    }

    // A second set replaces the first, leaving one entry.
    #[test]
    fn prop_overwrite_semantics(
        key in segment_strategy(),
        value1 in value_strategy(),
        value2 in value_strategy()
    ) {
        let cache = cache();

        cache.set(key.as_str(), &value1, None).unwrap();
        cache.set(key.as_str(), &value2, None).unwrap();

        prop_assert_eq!(cache.get::<String>(key.as_str()), Some(value2));
        prop_assert_eq!(cache.len(), 1);
    }

    // Invalidating a namespace removes every key under it and nothing else.
    #[test]
    fn prop_invalidate_pattern_scopes_to_prefix(
        namespace in segment_strategy(),
        other in segment_strategy(),
        children in prop::collection::vec(segment_strategy(), 1..6)
    ) {
        prop_assume!(!other.starts_with(namespace.as_str()));
        let cache = cache();

        for child in &children {
            cache.set([namespace.as_str(), child.as_str()], &1, None).unwrap();
        }
        cache.set([other.as_str(), "x"], &2, None).unwrap();

        cache.invalidate_pattern([namespace.as_str()]);

        for child in &children {
            prop_assert!(!cache.has([namespace.as_str(), child.as_str()]));
        }
        prop_assert_eq!(cache.get::<i32>([other.as_str(), "x"]), Some(2));
    }
}

// Separate proptest block with fewer cases for time-sensitive TTL tests
proptest! {
    #![proptest_config(ProptestConfig::with_cases(5))]

    // Reads honour the TTL without any sweep having run.
    #[test]
    fn prop_ttl_expiration_behavior(key in segment_strategy(), value in value_strategy()) {
        let cache = cache();

        cache.set(key.as_str(), &value, Some(Duration::from_millis(60))).unwrap();

        prop_assert_eq!(cache.get::<String>(key.as_str()), Some(value));

        sleep(Duration::from_millis(100));

        prop_assert_eq!(cache.get::<String>(key.as_str()), None);
    }
}
