//! Collection-shape helpers over JSON values.
//!
//! Lists are JSON arrays keyed by [`Key::Index`]; maps are JSON objects
//! keyed by [`Key::Name`]. Lookups accept either key kind where it makes
//! sense, so a path segment like `"0"` works against an array.

use serde_json::{Map, Value};

use crate::spec::Key;

/// How a collection node lays out its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Array-like; children are re-keyed positionally.
    List,
    /// Object-like; children keep their names.
    Map,
}

impl Layout {
    /// The layout implied by a value, if it is a collection.
    pub fn of(value: Option<&Value>) -> Option<Self> {
        match value {
            Some(Value::Array(_)) => Some(Self::List),
            Some(Value::Object(_)) => Some(Self::Map),
            _ => None,
        }
    }

    /// The layout implied by a set of declared keys, if any.
    pub fn of_keys(keys: &[Key]) -> Option<Self> {
        let first = keys.first()?;
        Some(match first {
            Key::Index(_) => Self::List,
            Key::Name(_) => Self::Map,
        })
    }
}

/// The keys of a collection value, in order. Non-collections have none.
pub fn keys_of(value: Option<&Value>) -> Vec<Key> {
    match value {
        Some(Value::Array(items)) => (0..items.len()).map(Key::Index).collect(),
        Some(Value::Object(map)) => map.keys().map(|k| Key::Name(k.clone())).collect(),
        _ => Vec::new(),
    }
}

/// The value stored under `key`, if any.
pub fn value_at(value: Option<&Value>, key: &Key) -> Option<Value> {
    match value? {
        Value::Array(items) => items.get(key.as_index()?).cloned(),
        Value::Object(map) => map.get(&key.to_string()).cloned(),
        _ => None,
    }
}

/// Walk a sequence of keys into a value.
pub fn value_at_path(value: Option<&Value>, path: &[Key]) -> Option<Value> {
    let mut current = value?;
    for key in path {
        current = match current {
            Value::Array(items) => items.get(key.as_index()?)?,
            Value::Object(map) => map.get(&key.to_string())?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Compose child values into a collection value.
///
/// Lists map undefined children to `null`; maps omit them.
pub fn compose<'a, I>(layout: Layout, entries: I) -> Value
where
    I: IntoIterator<Item = (&'a Key, Option<&'a Value>)>,
{
    match layout {
        Layout::List => Value::Array(
            entries
                .into_iter()
                .map(|(_, value)| value.cloned().unwrap_or(Value::Null))
                .collect(),
        ),
        Layout::Map => {
            let mut map = Map::new();
            for (key, value) in entries {
                if let Some(value) = value {
                    map.insert(key.to_string(), value.clone());
                }
            }
            Value::Object(map)
        }
    }
}

/// Deep equality where numbers compare by value, so `1` equals `1.0`.
///
/// Integers compare exactly; a float on either side compares as `f64`.
/// Object key order is ignored.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x == y || ((x.is_f64() || y.is_f64()) && x.as_f64() == y.as_f64())
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| same_value(x, y)))
        }
        _ => a == b,
    }
}

/// [`same_value`] lifted to possibly undefined values.
pub fn same_option(a: &Option<Value>, b: &Option<Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_value(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_of() {
        assert_eq!(keys_of(Some(&json!([1, 2]))), vec![Key::Index(0), Key::Index(1)]);
        assert_eq!(
            keys_of(Some(&json!({"b": 1, "a": 2}))),
            vec![Key::from("b"), Key::from("a")]
        );
        assert!(keys_of(Some(&json!("scalar"))).is_empty());
        assert!(keys_of(None).is_empty());
    }

    #[test]
    fn test_value_at_accepts_both_key_kinds() {
        let list = json!(["a", "b"]);
        assert_eq!(value_at(Some(&list), &Key::Index(1)), Some(json!("b")));
        assert_eq!(value_at(Some(&list), &Key::from("0")), Some(json!("a")));
        assert_eq!(value_at(Some(&list), &Key::Index(5)), None);

        let map = json!({"1": "one"});
        assert_eq!(value_at(Some(&map), &Key::Index(1)), Some(json!("one")));
        assert_eq!(value_at(None, &Key::Index(0)), None);
    }

    #[test]
    fn test_value_at_path() {
        let value = json!({"items": [{"x": 5}, {"x": 7}]});
        let path = [Key::from("items"), Key::Index(1), Key::from("x")];
        assert_eq!(value_at_path(Some(&value), &path), Some(json!(7)));
        assert_eq!(value_at_path(Some(&value), &[]), Some(value.clone()));
        assert_eq!(value_at_path(Some(&value), &[Key::from("nope")]), None);
    }

    #[test]
    fn test_compose() {
        let keys = [Key::from("name"), Key::from("age")];
        let age = json!(30);
        let composed = compose(Layout::Map, [(&keys[0], None), (&keys[1], Some(&age))]);
        assert_eq!(composed, json!({"age": 30}));

        let keys = [Key::Index(0), Key::Index(1)];
        let first = json!("a");
        let composed = compose(Layout::List, [(&keys[0], Some(&first)), (&keys[1], None)]);
        assert_eq!(composed, json!(["a", null]));
    }

    #[test]
    fn test_layout_detection() {
        assert_eq!(Layout::of(Some(&json!([]))), Some(Layout::List));
        assert_eq!(Layout::of(Some(&json!({}))), Some(Layout::Map));
        assert_eq!(Layout::of(Some(&json!(1))), None);
        assert_eq!(Layout::of_keys(&[Key::from("a")]), Some(Layout::Map));
        assert_eq!(Layout::of_keys(&[]), None);
    }

    #[test]
    fn test_same_value_compares_numbers_by_value() {
        assert!(same_value(&json!(1), &json!(1.0)));
        assert!(same_value(&json!({"a": [1, 2.5]}), &json!({"a": [1.0, 2.5]})));
        assert!(same_value(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1})));
        assert!(!same_value(&json!(1), &json!(1.5)));
        assert!(!same_value(&json!([1]), &json!([1, 1])));
        assert!(!same_value(&json!("1"), &json!(1)));
        assert!(same_option(&None, &None));
        assert!(!same_option(&Some(json!(null)), &None));
    }
}
