//! Shared key/value context store and the predicate grammar used by
//! `context_aware` transition rules.
//!
//! A condition value is either a literal, compared for equality, or an
//! object made only of operator keys, evaluated as the conjunction of its
//! operators:
//!
//! | Operator | Holds when |
//! |---|---|
//! | `eq` / `ne` | value equal / not equal |
//! | `gt` `gte` `lt` `lte` | numeric comparison |
//! | `in` | value is an element of the given array |
//! | `contains` | string contains substring, or array contains element |
//! | `exists` | key presence matches the given boolean |
//!
//! A missing key fails every operator except `exists: false`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

const OPERATORS: &[&str] = &["eq", "ne", "gt", "gte", "lt", "lte", "in", "contains", "exists"];

/// Thread-safe key/value store written by sensors and backgrounds, read by
/// the transition engine.  Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.write().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().remove(key)
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.read().clone()
    }

    /// `true` when every condition holds.  An empty set never holds.
    pub fn satisfies(&self, conditions: &BTreeMap<String, Value>) -> bool {
        if conditions.is_empty() {
            return false;
        }
        let map = self.inner.read();
        conditions
            .iter()
            .all(|(key, expected)| condition_holds(expected, map.get(key)))
    }
}

/// Evaluate a single condition against the (possibly absent) actual value.
pub fn condition_holds(expected: &Value, actual: Option<&Value>) -> bool {
    match expected {
        Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| OPERATORS.contains(&k.as_str())) => {
            ops.iter().all(|(op, arg)| operator_holds(op, arg, actual))
        }
        literal => actual.is_some_and(|a| values_equal(a, literal)),
    }
}

fn operator_holds(op: &str, arg: &Value, actual: Option<&Value>) -> bool {
    if op == "exists" {
        return arg.as_bool().unwrap_or(true) == actual.is_some();
    }
    let Some(actual) = actual else {
        return false;
    };
    match op {
        "eq" => values_equal(actual, arg),
        "ne" => !values_equal(actual, arg),
        "gt" => compare(actual, arg).is_some_and(|o| o.is_gt()),
        "gte" => compare(actual, arg).is_some_and(|o| o.is_ge()),
        "lt" => compare(actual, arg).is_some_and(|o| o.is_lt()),
        "lte" => compare(actual, arg).is_some_and(|o| o.is_le()),
        "in" => arg
            .as_array()
            .is_some_and(|items| items.iter().any(|v| values_equal(actual, v))),
        "contains" => match (actual, arg) {
            (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|v| values_equal(v, needle)),
            _ => false,
        },
        _ => false,
    }
}

/// Equality that treats `1` and `1.0` as the same number.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conditions(v: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn literal_conditions_compare_for_equality() {
        let store = ContextStore::new();
        store.set("location", json!("kitchen"));
        store.set("battery", json!(80));
        assert!(store.satisfies(&conditions(json!({"location": "kitchen", "battery": 80.0}))));
        assert!(!store.satisfies(&conditions(json!({"location": "garage"}))));
    }

    #[test]
    fn empty_conditions_never_hold() {
        let store = ContextStore::new();
        store.set("anything", json!(true));
        assert!(!store.satisfies(&BTreeMap::new()));
    }

    #[test]
    fn numeric_operators() {
        let store = ContextStore::new();
        store.set("battery", json!(15));
        assert!(store.satisfies(&conditions(json!({"battery": {"lt": 20}}))));
        assert!(store.satisfies(&conditions(json!({"battery": {"gte": 15, "lte": 15}}))));
        assert!(!store.satisfies(&conditions(json!({"battery": {"gt": 15}}))));
        store.set("battery", json!("low"));
        assert!(!store.satisfies(&conditions(json!({"battery": {"lt": 20}}))));
    }

    #[test]
    fn membership_operators() {
        let store = ContextStore::new();
        store.set("room", json!("lab"));
        store.set("tags", json!(["person", "dog"]));
        store.set("caption", json!("a person waving"));
        assert!(store.satisfies(&conditions(json!({"room": {"in": ["lab", "office"]}}))));
        assert!(store.satisfies(&conditions(json!({"tags": {"contains": "dog"}}))));
        assert!(store.satisfies(&conditions(json!({"caption": {"contains": "waving"}}))));
        assert!(store.satisfies(&conditions(json!({"room": {"ne": "garage"}}))));
    }

    #[test]
    fn missing_keys_only_satisfy_exists_false() {
        let store = ContextStore::new();
        assert!(store.satisfies(&conditions(json!({"alarm": {"exists": false}}))));
        assert!(!store.satisfies(&conditions(json!({"alarm": {"ne": "on"}}))));
        assert!(!store.satisfies(&conditions(json!({"alarm": {"exists": true}}))));
        store.set("alarm", json!("on"));
        assert!(store.satisfies(&conditions(json!({"alarm": {"exists": true}}))));
    }

    #[test]
    fn object_with_non_operator_keys_is_a_literal() {
        let store = ContextStore::new();
        store.set("pose", json!({"x": 1, "y": 2}));
        assert!(store.satisfies(&conditions(json!({"pose": {"x": 1, "y": 2}}))));
    }

    #[test]
    fn clones_share_state() {
        let a = ContextStore::new();
        let b = a.clone();
        a.set("k", json!(1));
        assert_eq!(b.get("k"), Some(json!(1)));
        b.remove("k");
        assert!(a.snapshot().is_empty());
    }
}
