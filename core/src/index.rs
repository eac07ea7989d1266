//! The ordered index: a keyed multimap over [`Key`], backed by `BTreeMap`
//! (a self-balancing B-tree, the ordered-tree shape this store needs,
//! minus any on-disk page format since everything lives in memory).
//!
//! Indexes store document *ids*, not documents: the canonical document
//! body lives once in the store, indexes only ever carry pointers to it.

use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::value::{get_dot_value, Value};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

/// One (old, new) pair for a batch update, keyed by document id.
pub struct UpdatePair {
    pub id: String,
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone)]
pub struct Index {
    pub field: String,
    pub unique: bool,
    pub sparse: bool,
    tree: BTreeMap<Key, Vec<String>>,
}

enum KeysForDoc {
    Skip,
    Keys(Vec<Key>),
}

impl Index {
    pub fn new(field: impl Into<String>, unique: bool, sparse: bool) -> Self {
        Index {
            field: field.into(),
            unique,
            sparse,
            tree: BTreeMap::new(),
        }
    }

    fn keys_for(&self, doc: &Value) -> KeysForDoc {
        let v = get_dot_value(doc, &self.field);
        if v.is_undefined() {
            return if self.sparse {
                KeysForDoc::Skip
            } else {
                KeysForDoc::Keys(vec![Key::Undefined])
            };
        }
        match v {
            Value::Array(items) => {
                let mut seen = HashSet::new();
                let mut keys = Vec::new();
                for item in &items {
                    let k = Key::from(item);
                    if seen.insert(k.clone()) {
                        keys.push(k);
                    }
                }
                KeysForDoc::Keys(keys)
            }
            other => KeysForDoc::Keys(vec![Key::from(&other)]),
        }
    }

    /// Insert `doc` (identified by `doc_id`) into the index. On any
    /// mid-batch failure (a duplicate key under a unique index), every
    /// entry this call added is removed before the error propagates, so
    /// the index is left exactly as it was.
    pub fn insert(&mut self, doc_id: &str, doc: &Value) -> Result<()> {
        let keys = match self.keys_for(doc) {
            KeysForDoc::Skip => return Ok(()),
            KeysForDoc::Keys(k) => k,
        };

        let mut applied = Vec::new();
        for key in &keys {
            if self.unique {
                if let Some(existing) = self.tree.get(key) {
                    if !existing.is_empty() {
                        for applied_key in &applied {
                            self.remove_one(applied_key, doc_id);
                        }
                        return Err(StoreError::UniqueViolation {
                            index: self.field.clone(),
                            field: doc_id.to_string(),
                        });
                    }
                }
            }
            self.tree.entry(key.clone()).or_default().push(doc_id.to_string());
            applied.push(key.clone());
        }
        Ok(())
    }

    fn remove_one(&mut self, key: &Key, doc_id: &str) {
        if let Some(list) = self.tree.get_mut(key) {
            list.retain(|id| id != doc_id);
            if list.is_empty() {
                self.tree.remove(key);
            }
        }
    }

    pub fn remove(&mut self, doc_id: &str, doc: &Value) {
        let keys = match self.keys_for(doc) {
            KeysForDoc::Skip => return,
            KeysForDoc::Keys(k) => k,
        };
        for key in &keys {
            self.remove_one(key, doc_id);
        }
    }

    /// Remove `old`, insert `new`; on insert failure, re-insert `old` and
    /// propagate the error.
    pub fn update(&mut self, doc_id: &str, old: &Value, new: &Value) -> Result<()> {
        self.remove(doc_id, old);
        if let Err(e) = self.insert(doc_id, new) {
            self.insert(doc_id, old)
                .expect("re-inserting a document that was valid moments ago cannot fail");
            return Err(e);
        }
        Ok(())
    }

    /// Two-phase batch update: remove every old doc, then insert every
    /// new doc. A failure at position `i` unwinds the new-doc
    /// inserts made at positions `< i` and restores every old doc, so the
    /// index returns exactly to its pre-call state.
    pub fn update_batch(&mut self, pairs: &[UpdatePair]) -> Result<()> {
        for pair in pairs {
            self.remove(&pair.id, &pair.old);
        }
        for (i, pair) in pairs.iter().enumerate() {
            if let Err(e) = self.insert(&pair.id, &pair.new) {
                for earlier in &pairs[..i] {
                    self.remove(&earlier.id, &earlier.new);
                }
                for pair in pairs {
                    self.insert(&pair.id, &pair.old)
                        .expect("restoring a document that was valid before the batch cannot fail");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Inverse of [`Index::update_batch`]: used to unwind a batch update
    /// that this index committed but a sibling index rejected.
    pub fn revert_update(&mut self, pairs: &[UpdatePair]) {
        for pair in pairs {
            self.remove(&pair.id, &pair.new);
        }
        for pair in pairs {
            self.insert(&pair.id, &pair.old)
                .expect("restoring a document that was valid before the batch cannot fail");
        }
    }

    /// `getMatching`: equality lookup, or (for `$in`) the deduplicated
    /// union of per-element lookups.
    pub fn get_matching(&self, value: &Value) -> Vec<String> {
        match value {
            Value::Array(items) => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for item in items {
                    for id in self.get_matching(item) {
                        if seen.insert(id.clone()) {
                            out.push(id);
                        }
                    }
                }
                out
            }
            other => {
                let key = Key::from(other);
                self.tree.get(&key).cloned().unwrap_or_default()
            }
        }
    }

    /// Ordered range scan over `$lt`/`$lte`/`$gt`/`$gte` bounds.
    pub fn get_between_bounds(
        &self,
        gt: Option<&Value>,
        gte: Option<&Value>,
        lt: Option<&Value>,
        lte: Option<&Value>,
    ) -> Vec<String> {
        let lower = match (gt, gte) {
            (Some(v), _) => Bound::Excluded(Key::from(v)),
            (None, Some(v)) => Bound::Included(Key::from(v)),
            (None, None) => Bound::Unbounded,
        };
        let upper = match (lt, lte) {
            (Some(v), _) => Bound::Excluded(Key::from(v)),
            (None, Some(v)) => Bound::Included(Key::from(v)),
            (None, None) => Bound::Unbounded,
        };
        if range_is_empty(&lower, &upper) {
            return Vec::new();
        }
        self.tree
            .range((lower, upper))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// In-order traversal of every document id in the index, deduplicated
    /// (an array-valued field can otherwise repeat an id across keys).
    pub fn get_all(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for ids in self.tree.values() {
            for id in ids {
                if seen.insert(id.clone()) {
                    out.push(id.clone());
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.tree.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// `BTreeMap::range` panics if the start bound is greater than the end
/// bound, or if they're equal and either side is excluded. A range query
/// built from user-supplied `$gt`/`$gte`/`$lt`/`$lte` operators can easily
/// land here (e.g. `{$gt: 10, $lt: 5}`), so this is checked up front and
/// treated as an empty result rather than passed through to `range`.
fn range_is_empty(lower: &Bound<Key>, upper: &Bound<Key>) -> bool {
    let (Some(lo), Some(hi)) = (bound_key(lower), bound_key(upper)) else {
        return false;
    };
    match lo.cmp(hi) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => {
            !matches!((lower, upper), (Bound::Included(_), Bound::Included(_)))
        }
        std::cmp::Ordering::Less => false,
    }
}

fn bound_key(bound: &Bound<Key>) -> Option<&Key> {
    match bound {
        Bound::Included(k) | Bound::Excluded(k) => Some(k),
        Bound::Unbounded => None,
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
    fn array_value_indexes_each_distinct_element_once() {
        let mut idx = Index::new("tags", false, false);
        let doc = v(json!({"tags": ["x", "y", "x"]}));
        idx.insert("a", &doc).unwrap();
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get_matching(&v(json!("x"))), vec!["a".to_string()]);
        assert_eq!(idx.get_matching(&v(json!("y"))), vec!["a".to_string()]);
    }

    #[test]
    fn unique_violation_rolls_back_partial_insert() {
        let mut idx = Index::new("tags", true, false);
        idx.insert("a", &v(json!({"tags": "x"}))).unwrap();
        let err = idx.insert("b", &v(json!({"tags": ["x", "y"]})));
        assert!(err.is_err());
        // "y" must not have been left behind by the failed insert.
        assert!(idx.get_matching(&v(json!("y"))).is_empty());
    }

    #[test]
    fn sparse_index_skips_missing_field() {
        let mut idx = Index::new("f", false, true);
        idx.insert("a", &v(json!({"other": 1}))).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn non_sparse_index_keys_missing_field_as_undefined() {
        let mut idx = Index::new("f", false, false);
        idx.insert("a", &v(json!({"other": 1}))).unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn batch_update_rolls_back_on_failure() {
        let mut idx = Index::new("f", true, false);
        idx.insert("a", &v(json!({"f": 1}))).unwrap();
        idx.insert("b", &v(json!({"f": 2}))).unwrap();

        let pairs = vec![
            UpdatePair {
                id: "a".into(),
                old: v(json!({"f": 1})),
                new: v(json!({"f": 3})),
            },
            UpdatePair {
                id: "b".into(),
                old: v(json!({"f": 2})),
                new: v(json!({"f": 3})), // collides with the first new value
            },
        ];
        let before: Vec<_> = idx.get_all();
        assert!(idx.update_batch(&pairs).is_err());
        let after: Vec<_> = idx.get_all();
        assert_eq!(before.len(), after.len());
        assert_eq!(idx.get_matching(&v(json!(1))), vec!["a".to_string()]);
        assert_eq!(idx.get_matching(&v(json!(2))), vec!["b".to_string()]);
    }

    #[test]
    fn range_scan() {
        let mut idx = Index::new("n", false, false);
        for (id, n) in [("a", 1), ("b", 2), ("c", 3)] {
            idx.insert(id, &v(json!({"n": n}))).unwrap();
        }
        let result = idx.get_between_bounds(Some(&v(json!(1))), None, None, Some(&v(json!(3))));
        let mut result = result;
        result.sort();
        assert_eq!(result, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn contradictory_range_returns_empty_instead_of_panicking() {
        let mut idx = Index::new("n", false, false);
        for (id, n) in [("a", 1), ("b", 2), ("c", 3)] {
            idx.insert(id, &v(json!({"n": n}))).unwrap();
        }
        // gt > lt
        assert!(idx
            .get_between_bounds(Some(&v(json!(10))), None, Some(&v(json!(5))), None)
            .is_empty());
        // gt == lt, both excluded
        assert!(idx
            .get_between_bounds(Some(&v(json!(5))), None, Some(&v(json!(5))), None)
            .is_empty());
        // gte == lte is a valid single-point range
        let result = idx.get_between_bounds(None, Some(&v(json!(2))), None, Some(&v(json!(2))));
        assert_eq!(result, vec!["b".to_string()]);
    }
}
