//! End-to-end scenarios straight out of the concrete examples used to
//! validate this store's semantics: unique violations, sort/skip/limit,
//! array-indexed dedup, upsert, inconsistent projections, and rollback on
//! a failed batch insert.

use nanodb_core::{get_dot_value, Store, UpdateOptions, Value};
use serde_json::json;

fn v(j: serde_json::Value) -> Value {
    Value::from(&j)
}

#[test]
fn unique_violation_on_second_insert_leaves_one_document() {
    let store = Store::new();
    store.ensure_index("a", true, false).unwrap();
    store.insert(v(json!({"a": 1}))).unwrap();

    let err = store.insert(v(json!({"a": 1})));
    assert!(err.is_err());
    assert_eq!(store.find(v(json!({}))).unwrap().exec().unwrap().len(), 1);
}

#[test]
fn sort_skip_limit_over_three_documents() {
    let store = Store::new();
    store.insert(v(json!({"_id": "1", "n": 3}))).unwrap();
    store.insert(v(json!({"_id": "2", "n": 1}))).unwrap();
    store.insert(v(json!({"_id": "3", "n": 2}))).unwrap();

    let result = store
        .find_sorted(v(json!({})), vec![("n".to_string(), 1)])
        .unwrap()
        .skip(1)
        .limit(1)
        .exec()
        .unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(get_dot_value(&result[0], "_id"), Value::String("3".into()));
    assert_eq!(get_dot_value(&result[0], "n"), Value::Number(2.0));
}

#[test]
fn array_valued_indexed_field_dedups_to_one_hit_per_document() {
    let store = Store::new();
    store.ensure_index("tags", false, false).unwrap();
    store
        .insert(v(json!({"_id": "a", "tags": ["x", "y", "x"]})))
        .unwrap();

    let result = store.find(v(json!({"tags": "x"}))).unwrap().exec().unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(get_dot_value(&result[0], "_id"), Value::String("a".into()));
}

#[test]
fn upsert_on_empty_store_inserts_and_reports_upsert() {
    let store = Store::new();
    let report = store
        .update(
            v(json!({"_id": "z"})),
            v(json!({"$set": {"v": 1}})),
            UpdateOptions {
                upsert: true,
                return_updated_docs: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(report.num_affected, 1);
    assert!(report.upsert);

    let found = store.find_one(v(json!({"_id": "z"}))).unwrap().unwrap();
    assert_eq!(get_dot_value(&found, "v"), Value::Number(1.0));
}

#[test]
fn mixed_projection_fails_but_id_exclusion_is_allowed() {
    let store = Store::new();
    store.insert(v(json!({"_id": "1", "a": 1, "b": 2}))).unwrap();

    let bad = store.find(v(json!({}))).unwrap().project(&v(json!({"a": 1, "b": 0})));
    assert!(bad.is_err());

    let ok = store
        .find(v(json!({})))
        .unwrap()
        .project(&v(json!({"a": 1, "_id": 0})))
        .unwrap()
        .exec()
        .unwrap();
    assert_eq!(ok.len(), 1);
    assert!(get_dot_value(&ok[0], "_id").is_undefined());
    assert_eq!(get_dot_value(&ok[0], "a"), Value::Number(1.0));
    assert!(get_dot_value(&ok[0], "b").is_undefined());
}

#[test]
fn batch_insert_with_duplicate_id_leaves_store_empty() {
    let store = Store::new();
    let err = store.insert_many(vec![
        v(json!({"_id": "1"})),
        v(json!({"_id": "2"})),
        v(json!({"_id": "1"})),
    ]);
    assert!(err.is_err());
    assert_eq!(store.find(v(json!({}))).unwrap().exec().unwrap().len(), 0);
}

#[test]
fn remove_multi_deletes_every_match() {
    let store = Store::new();
    store.insert(v(json!({"_id": "1", "kind": "x"}))).unwrap();
    store.insert(v(json!({"_id": "2", "kind": "x"}))).unwrap();
    store.insert(v(json!({"_id": "3", "kind": "y"}))).unwrap();

    let removed = store.remove(v(json!({"kind": "x"})), true).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.find(v(json!({}))).unwrap().exec().unwrap().len(), 1);
}

#[test]
fn sparse_index_ignores_documents_missing_the_field() {
    let store = Store::new();
    store.ensure_index("email", true, true).unwrap();
    store.insert(v(json!({"_id": "1"}))).unwrap();
    store.insert(v(json!({"_id": "2"}))).unwrap();
    // Neither document carries `email`; a non-sparse unique index would
    // have collided both under the undefined key.
    assert_eq!(store.find(v(json!({}))).unwrap().exec().unwrap().len(), 2);
}

#[test]
fn in_empty_matches_nothing_nin_empty_matches_everything() {
    let store = Store::new();
    store.insert(v(json!({"a": 1}))).unwrap();

    assert_eq!(store.count(v(json!({"a": {"$in": []}}))).unwrap(), 0);
    assert_eq!(store.count(v(json!({"a": {"$nin": []}}))).unwrap(), 1);
}

#[test]
fn round_trip_insert_remove_insert_restores_identical_state() {
    let store = Store::new();
    store.ensure_index("a", true, false).unwrap();
    let doc = v(json!({"_id": "x", "a": 1}));

    store.insert(doc.clone()).unwrap();
    store.remove(v(json!({"_id": "x"})), false).unwrap();
    store.insert(doc).unwrap();

    assert_eq!(store.find(v(json!({}))).unwrap().exec().unwrap().len(), 1);
    assert_eq!(store.count(v(json!({"a": 1}))).unwrap(), 1);
}
