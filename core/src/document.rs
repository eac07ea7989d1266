//! Documents: validated, `_id`-bearing [`Value::Object`]s.

use crate::error::{Result, StoreError};
use crate::value::{get_dot_value, Value};
use indexmap::IndexMap;
use rand::Rng;

const ID_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_LEN: usize = 16;

/// A document is an object-valued [`Value`] that carries a string `_id`.
/// The newtype exists so call sites can't accidentally hand a bare array
/// or scalar to the store.
#[derive(Debug, Clone)]
pub struct Document(Value);

impl Document {
    /// Wrap a `Value::Object`. Does not itself enforce the presence of
    /// `_id` — callers assign one (see [`generate_id`]) before a document
    /// becomes visible to indexes.
    pub fn new(value: Value) -> Result<Self> {
        match &value {
            Value::Object(_) => Ok(Document(value)),
            other => Err(StoreError::InvalidDocument(format!(
                "document must be an object, got {:?}",
                other
            ))),
        }
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn fields(&self) -> &IndexMap<String, Value> {
        self.0.as_object().expect("Document invariant: always Object")
    }

    pub fn fields_mut(&mut self) -> &mut IndexMap<String, Value> {
        self.0.as_object_mut().expect("Document invariant: always Object")
    }

    pub fn id(&self) -> Option<&str> {
        self.fields().get("_id").and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: String) {
        self.fields_mut().insert("_id".to_string(), Value::String(id));
    }

    pub fn get(&self, path: &str) -> Value {
        get_dot_value(&self.0, path)
    }

    pub fn deep_clone(&self) -> Document {
        self.clone()
    }
}

/// Reject keys containing `.` or starting with `$`, recursively. The two
/// internal tombstone markers travel only through the persistence
/// channel and are never validated here because they never reach this
/// function — callers construct them directly as persistence records.
pub fn check_object(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if k.contains('.') || k.starts_with('$') {
                    return Err(StoreError::InvalidDocument(k.clone()));
                }
                check_object(v)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_object(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Generate a 16-character opaque identifier from a uniform random
/// alphabet. Collisions are the caller's concern (retried against the
/// `_id` index until unique).
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ID_ALPHABET.len());
            ID_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn check_object_rejects_dotted_key() {
        let v = Value::from(&json!({"a.b": 1}));
        assert!(check_object(&v).is_err());
    }

    #[test]
    fn check_object_rejects_dollar_key_nested() {
        let v = Value::from(&json!({"a": {"$set": 1}}));
        assert!(check_object(&v).is_err());
    }

    #[test]
    fn check_object_accepts_clean_document() {
        let v = Value::from(&json!({"a": {"b": [1, 2, {"c": 3}]}}));
        assert!(check_object(&v).is_ok());
    }

    #[test]
    fn generated_id_has_expected_length_and_alphabet() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
