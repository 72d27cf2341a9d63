//! Attribute values - JSON values with a total order and identity keys.
//!
//! Models store their attributes as `serde_json::Value`, so comparators and
//! id indices need two things the JSON type doesn't provide on its own: a
//! total order across all values, and a canonical string key for identity
//! values so that an id of `1` and an id of `"1"` resolve to the same slot.

use std::cmp::Ordering;

use serde_json::Value;

/// Attribute map for models: JSON object entries keyed by attribute name.
pub type AttrMap = serde_json::Map<String, Value>;

/// Convert a JSON object into an [`AttrMap`].
///
/// # Panics
///
/// Panics when given a non-object value. Passing a scalar where an
/// attribute map is required is a programmer error, not a recoverable
/// condition.
pub fn attrs(value: Value) -> AttrMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object of attributes, got {}", other),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values.
///
/// Values of different types order by type rank (null < bool < number <
/// string < array < object). Numbers compare numerically, arrays
/// lexicographically, objects by length and then by entries in iteration
/// order. Used by attribute and key-extractor comparators.
pub fn value_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            // serde_json numbers are finite, so partial_cmp cannot fail
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = value_cmp(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let ord = x.len().cmp(&y.len());
            if ord != Ordering::Equal {
                return ord;
            }
            for ((xk, xv), (yk, yv)) in x.iter().zip(y.iter()) {
                let ord = xk.cmp(yk).then_with(|| value_cmp(xv, yv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Canonical index key for a persistent id value.
///
/// Strings key as themselves, numbers by their decimal rendering, so a
/// model with id `1` is retrievable through both `1` and `"1"`. Null,
/// booleans, and composite values are not identities.
pub(crate) fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ranks_across_types() {
        let ordered = vec![
            json!(null),
            json!(false),
            json!(true),
            json!(-3),
            json!(2.5),
            json!(10),
            json!("a"),
            json!("b"),
            json!([1]),
            json!([1, 2]),
            json!({"a": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                value_cmp(&pair[0], &pair[1]),
                Ordering::Less,
                "{} < {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn equal_values_compare_equal() {
        assert_eq!(value_cmp(&json!(1), &json!(1.0)), Ordering::Equal);
        assert_eq!(value_cmp(&json!("x"), &json!("x")), Ordering::Equal);
        assert_eq!(value_cmp(&json!([1, 2]), &json!([1, 2])), Ordering::Equal);
    }

    #[test]
    fn id_keys_unify_numbers_and_strings() {
        assert_eq!(id_key(&json!(1)), Some("1".to_string()));
        assert_eq!(id_key(&json!("1")), Some("1".to_string()));
        assert_eq!(id_key(&json!("abc")), Some("abc".to_string()));
        assert_eq!(id_key(&json!(null)), None);
        assert_eq!(id_key(&json!(true)), None);
        assert_eq!(id_key(&json!([1])), None);
    }

    #[test]
    #[should_panic(expected = "expected a JSON object")]
    fn attrs_rejects_scalars() {
        attrs(json!(42));
    }
}
