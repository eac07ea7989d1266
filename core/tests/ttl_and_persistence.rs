//! TTL expiry on candidate fetch and the persistence collaborator
//! boundary, using an injected clock so expiry is deterministic.

use chrono::{DateTime, TimeZone, Utc};
use nanodb_core::{
    get_dot_value, Clock, PersistenceSink, Store, StoreOptionsBuilder, Value, VecPersistence,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn v(j: serde_json::Value) -> Value {
    Value::from(&j)
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[test]
fn expired_document_is_excluded_from_candidates_and_swept() {
    let epoch = Utc.timestamp_opt(1_000_000, 0).unwrap();
    let now = epoch + chrono::Duration::seconds(120);

    let options = StoreOptionsBuilder::new()
        .ttl("seenAt", Duration::from_secs(60))
        .clock(Arc::new(FixedClock(now)))
        .build();
    let store = Store::with_options(options);

    // `seenAt` must be our `Timestamp` variant for the TTL check to see
    // it, so these documents are built directly rather than via JSON
    // (which would round-trip through `String`).
    let mut stale = v(json!({"_id": "stale"}));
    if let Value::Object(map) = &mut stale {
        map.insert("seenAt".to_string(), Value::Timestamp(epoch));
    }
    store.insert(stale).unwrap();

    let mut fresh = v(json!({"_id": "fresh"}));
    if let Value::Object(map) = &mut fresh {
        map.insert("seenAt".to_string(), Value::Timestamp(now));
    }
    store.insert(fresh).unwrap();

    let results = store.find(v(json!({}))).unwrap().exec().unwrap();
    let ids: Vec<_> = results
        .iter()
        .filter_map(|d| get_dot_value(d, "_id").as_str().map(|s| s.to_string()))
        .collect();
    assert!(ids.contains(&"fresh".to_string()));
    assert!(!ids.contains(&"stale".to_string()));
}

#[test]
fn persistence_sink_records_every_accepted_mutation() {
    let sink = Arc::new(VecPersistence::new());
    let options = StoreOptionsBuilder::new().persistence(sink.clone() as Arc<dyn PersistenceSink>).build();
    let store = Store::with_options(options);

    store.insert(v(json!({"_id": "1", "n": 1}))).unwrap();
    store
        .update(v(json!({"_id": "1"})), v(json!({"$set": {"n": 2}})), Default::default())
        .unwrap();
    store.remove(v(json!({"_id": "1"})), false).unwrap();

    assert_eq!(sink.records().len(), 3);
}
