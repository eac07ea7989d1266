//! The recursive document value type, its total order, and structural
//! equality — the bedrock that every other module (index keys, query
//! matching, update modifiers, sort) is built on.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::cmp::Ordering;

/// A recursively typed document value.
///
/// `Undefined` is not a value a caller can construct from JSON — it only
/// ever appears as the result of a dotted-path lookup that misses. It is
/// still a first-class member of the total order (the lowest one) so sort
/// and comparison code never has to special-case "missing".
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

/// Cross-type bucket order: undefined < null < number < string < boolean
/// < timestamp < array < object.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Undefined => 0,
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Bool(_) => 4,
        Value::Timestamp(_) => 5,
        Value::Array(_) => 6,
        Value::Object(_) => 7,
    }
}

/// An optional string comparator, used to override the default
/// lexicographic ordering of the string bucket.
pub type StrCmp<'a> = &'a (dyn Fn(&str, &str) -> Ordering + Send + Sync);

fn default_str_cmp(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

impl Value {
    pub fn cmp_total(&self, other: &Value) -> Ordering {
        self.cmp_with(other, &default_str_cmp)
    }

    /// Total order comparison, taking an optional string comparator.
    pub fn cmp_with(&self, other: &Value, str_cmp: StrCmp<'_>) -> Ordering {
        let (ra, rb) = (type_rank(self), type_rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Undefined, Value::Undefined) => Ordering::Equal,
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => str_cmp(a, b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.cmp_with(y, str_cmp);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let kc = str_cmp(ka, kb);
                    if kc != Ordering::Equal {
                        return kc;
                    }
                    let vc = va.cmp_with(vb, str_cmp);
                    if vc != Ordering::Equal {
                        return vc;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => unreachable!("same type_rank implies same variant pairing"),
        }
    }

    /// Structural equality: NaN != NaN, timestamps equal iff same instant.
    pub fn eq_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a == b, // NaN != NaN falls out of IEEE-754 ==
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_value(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|bv| v.eq_value(bv)))
            }
            _ => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Timestamp(_)
        )
    }
}

/// Dotted-path read: split on `.`, walk descending; array segments that
/// parse as an integer index into the array, array segments that don't
/// map the lookup over every element (skipping elements where the key is
/// absent). A missing path yields `Value::Undefined`.
pub fn get_dot_value(doc: &Value, path: &str) -> Value {
    let mut parts = path.split('.');
    let Some(first) = parts.next() else {
        return Value::Undefined;
    };
    let mut current = get_field(doc, first);
    for part in parts {
        current = get_field(&current, part);
        if current.is_undefined() {
            return Value::Undefined;
        }
    }
    current
}

fn get_field(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Undefined),
        Value::Array(arr) => {
            if let Ok(idx) = key.parse::<usize>() {
                arr.get(idx).cloned().unwrap_or(Value::Undefined)
            } else {
                let mapped: Vec<Value> = arr
                    .iter()
                    .filter_map(|el| {
                        let v = get_field(el, key);
                        if v.is_undefined() {
                            None
                        } else {
                            Some(v)
                        }
                    })
                    .collect();
                Value::Array(mapped)
            }
        }
        _ => Value::Undefined,
    }
}

/// Set a value at a dotted path, creating intermediate objects as needed.
/// Used by update modifiers and upsert document construction.
pub fn set_dot_value(doc: &mut Value, path: &str, new_value: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let last = parts.pop().expect("path always has at least one segment");
    let mut current = doc;
    for part in parts {
        if !matches!(current, Value::Object(_)) {
            *current = Value::Object(IndexMap::new());
        }
        let map = current.as_object_mut().unwrap();
        current = map.entry(part.to_string()).or_insert(Value::Object(IndexMap::new()));
    }
    if !matches!(current, Value::Object(_)) {
        *current = Value::Object(IndexMap::new());
    }
    current
        .as_object_mut()
        .unwrap()
        .insert(last.to_string(), new_value);
}

/// Remove a value at a dotted path. No-op if the path does not resolve.
pub fn unset_dot_value(doc: &mut Value, path: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let last = parts.pop().expect("path always has at least one segment");
    let mut current = doc;
    for part in parts {
        match current.as_object_mut().and_then(|m| m.get_mut(part)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.shift_remove(last);
    }
}

// --- serde_json interop (the persistence/result boundary) ---

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(a) => Value::Array(a.iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect())
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from(&v)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Undefined => serde_json::Value::Null,
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::Array(a) => serde_json::Value::Array(a.iter().map(serde_json::Value::from).collect()),
            Value::Object(o) => serde_json::Value::Object(
                o.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_value(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(&j)
    }

    #[test]
    fn total_order_boundary() {
        let undefined = Value::Undefined;
        let null = Value::Null;
        let zero = v(json!(0));
        let empty_str = v(json!(""));
        let f = Value::Bool(false);
        let t = Value::Bool(true);
        let arr = Value::Array(vec![]);
        let obj = Value::Object(Default::default());

        let chain = [undefined, null, zero, empty_str, f, t, arr, obj];
        for w in chain.windows(2) {
            assert_eq!(w[0].cmp_total(&w[1]), Ordering::Less, "{:?} < {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn nan_not_equal_to_itself() {
        let nan = Value::Number(f64::NAN);
        assert!(!nan.eq_value(&nan));
    }

    #[test]
    fn dotted_path_array_expansion() {
        let doc = v(json!({"items": [{"name": "a"}, {"name": "b"}, {}]}));
        let names = get_dot_value(&doc, "items.name");
        assert_eq!(names, Value::Array(vec![Value::String("a".into()), Value::String("b".into())]));
    }

    #[test]
    fn dotted_path_array_index() {
        let doc = v(json!({"items": ["x", "y"]}));
        assert_eq!(get_dot_value(&doc, "items.1"), Value::String("y".into()));
    }

    #[test]
    fn missing_path_is_undefined() {
        let doc = v(json!({"a": 1}));
        assert!(get_dot_value(&doc, "b.c").is_undefined());
    }

    #[test]
    fn array_shorter_prefix_orders_first() {
        let a = Value::Array(vec![Value::Number(1.0)]);
        let b = Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(a.cmp_total(&b), Ordering::Less);
    }
}
