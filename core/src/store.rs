//! The store: owns the index set and the executor, and composes every
//! other module into the CRUD surface an embedding application calls.
//! The executor is the only serialization device; [`PersistenceSink`] is
//! the only durability hook.

use crate::cursor::{Cursor, SortDirection, SortKey};
use crate::document::{check_object, generate_id, Document};
use crate::error::{Result, StoreError};
use crate::executor::Executor;
use crate::index::{Index, UpdatePair};
use crate::{log_debug, log_info, log_warn};
use crate::match_query::Query;
use crate::modify::modify;
use crate::options::{StoreOptions, StoreOptionsBuilder};
use crate::persistence::ChangeRecord;
use crate::value::{get_dot_value, set_dot_value, Value};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct Inner {
    documents: RwLock<HashMap<String, Document>>,
    indexes: RwLock<HashMap<String, Index>>,
    options: StoreOptions,
}

/// A handle to one in-memory collection. Cheap to clone — internally an
/// `Arc` around the shared state plus a handle to the executor.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
    executor: Arc<Executor>,
}

/// Options passed to [`Store::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub multi: bool,
    pub upsert: bool,
    pub return_updated_docs: bool,
}

/// What came back from [`Store::update`]: affected count, whether it was
/// an upsert, and the updated document(s) if requested.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub num_affected: usize,
    pub upsert: bool,
    pub updated: UpdatedDocs,
}

#[derive(Debug, Clone)]
pub enum UpdatedDocs {
    None,
    One(Value),
    Many(Vec<Value>),
}

impl Store {
    pub fn new() -> Self {
        Self::with_options(StoreOptionsBuilder::new().build())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self::new_with_executor(options, Executor::new())
    }

    /// Like [`Store::with_options`], but the executor starts in the
    /// not-ready state: operations issued before [`Store::load_database`]
    /// queue up instead of running ahead of the replay. Use this when a
    /// persisted stream is going to be loaded immediately after
    /// construction and callers might start issuing requests before that
    /// finishes.
    pub fn with_options_buffered(options: StoreOptions) -> Self {
        Self::new_with_executor(options, Executor::new_buffered())
    }

    fn new_with_executor(options: StoreOptions, executor: Executor) -> Self {
        let mut indexes = HashMap::new();
        indexes.insert("_id".to_string(), Index::new("_id", true, false));
        let inner = Arc::new(Inner {
            documents: RwLock::new(HashMap::new()),
            indexes: RwLock::new(indexes),
            options,
        });
        Store {
            inner,
            executor: Arc::new(executor),
        }
    }

    /// Replays a previously persisted document/tombstone stream into an
    /// otherwise-empty store, then transitions the executor to ready so
    /// queued user operations start draining. Out-of-scope concerns
    /// (reading the stream from a [`crate::persistence::PersistenceSink`]'s
    /// backing storage) are the caller's job; this only applies records.
    /// Calling this on a store that's already ready (the common case) is
    /// harmless: `set_ready` is idempotent.
    pub fn load_database(&self, records: Vec<ChangeRecord>) -> Result<()> {
        let inner = self.inner.clone();
        let result = self.executor.submit_boot(move || load_database_locked(&inner, records));
        self.executor.set_ready();
        result
    }

    pub fn ensure_index(&self, field: impl Into<String>, unique: bool, sparse: bool) -> Result<()> {
        let field = field.into();
        if field.is_empty() {
            return Err(StoreError::MissingField);
        }
        let inner = self.inner.clone();
        self.executor
            .submit(move || ensure_index_locked(&inner, &field, unique, sparse))
    }

    pub fn remove_index(&self, field: impl Into<String>) -> Result<()> {
        let field = field.into();
        let inner = self.inner.clone();
        self.executor.submit(move || remove_index_locked(&inner, &field))
    }

    pub fn insert(&self, doc: Value) -> Result<Value> {
        let inner = self.inner.clone();
        self.executor.submit(move || insert_one_locked(&inner, doc))
    }

    pub fn insert_many(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let inner = self.inner.clone();
        self.executor.submit(move || insert_many_locked(&inner, docs))
    }

    pub fn update(&self, query: Value, upd: Value, opts: UpdateOptions) -> Result<UpdateReport> {
        let inner = self.inner.clone();
        let executor = self.executor.clone();
        self.executor
            .submit(move || update_locked(&inner, &executor, &query, &upd, opts))
    }

    pub fn remove(&self, query: Value, multi: bool) -> Result<usize> {
        let inner = self.inner.clone();
        let executor = self.executor.clone();
        self.executor.submit(move || remove_locked(&inner, &executor, &query, multi))
    }

    pub fn count(&self, filter: Value) -> Result<usize> {
        Ok(self.find(filter)?.exec()?.len())
    }

    /// Synchronous read: bypasses the executor and returns a snapshot
    /// cursor over the store's current state, as the concurrency model
    /// allows for reads that never call `exec` through the queue.
    pub fn find(&self, filter: Value) -> Result<Cursor<'_>> {
        let ids = get_candidates(&self.inner, &self.executor, &filter, false);
        let documents = self.inner.documents.read();
        let candidates: Vec<Value> = ids
            .iter()
            .filter_map(|id| documents.get(id).map(|d| d.value().clone()))
            .collect();
        Ok(Cursor::new(candidates, Query::new(filter)).with_str_cmp(self.inner.options.str_cmp()))
    }

    pub fn find_one(&self, filter: Value) -> Result<Option<Value>> {
        Ok(self.find(filter)?.limit(1).exec()?.into_iter().next())
    }

    /// Convenience builder for a sorted/projected read; equivalent to
    /// [`Store::find`] followed by the cursor's own fluent methods.
    pub fn find_sorted(&self, filter: Value, sort: Vec<(String, i32)>) -> Result<Cursor<'_>> {
        let keys = sort
            .into_iter()
            .map(|(field, dir)| SortKey {
                field,
                direction: if dir < 0 {
                    SortDirection::Descending
                } else {
                    SortDirection::Ascending
                },
            })
            .collect();
        Ok(self.find(filter)?.sort(keys))
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

fn load_database_locked(inner: &Inner, records: Vec<ChangeRecord>) -> Result<()> {
    for record in records {
        match record {
            ChangeRecord::Insert { doc } | ChangeRecord::Update { doc, .. } => {
                insert_one_locked(inner, doc)?;
            }
            ChangeRecord::Remove { id } => {
                inner.documents.write().remove(&id);
            }
            ChangeRecord::IndexCreated { field, unique, sparse } => {
                ensure_index_locked(inner, &field, unique, sparse)?;
            }
            ChangeRecord::IndexRemoved { field } => {
                let _ = remove_index_locked(inner, &field);
            }
        }
    }
    log_info!("loaded {} document(s) from persisted state", inner.documents.read().len());
    Ok(())
}

fn ensure_index_locked(inner: &Inner, field: &str, unique: bool, sparse: bool) -> Result<()> {
    let mut idx = Index::new(field.to_string(), unique, sparse);
    {
        let documents = inner.documents.read();
        for (id, doc) in documents.iter() {
            idx.insert(id, doc.value())?;
        }
    }
    inner.indexes.write().insert(field.to_string(), idx);
    inner
        .options
        .persistence
        .persist_new_state(&[ChangeRecord::IndexCreated {
            field: field.to_string(),
            unique,
            sparse,
        }]);
    log_debug!("ensured index on `{field}` (unique={unique}, sparse={sparse})");
    Ok(())
}

fn remove_index_locked(inner: &Inner, field: &str) -> Result<()> {
    if field == "_id" {
        return Err(StoreError::IndexNotFound("_id is immortal".to_string()));
    }
    let mut indexes = inner.indexes.write();
    if indexes.remove(field).is_none() {
        return Err(StoreError::IndexNotFound(field.to_string()));
    }
    drop(indexes);
    inner
        .options
        .persistence
        .persist_new_state(&[ChangeRecord::IndexRemoved {
            field: field.to_string(),
        }]);
    Ok(())
}

fn insert_one_locked(inner: &Inner, doc: Value) -> Result<Value> {
    insert_one_locked_inner(inner, doc, true)
}

/// Like [`insert_one_locked`], but lets the caller defer the persistence
/// notification for this document. Used by [`insert_many_locked`], which
/// must not let an observer see a document that a later failure in the
/// same batch will roll back: persistence is only emitted once the whole
/// batch has committed in memory.
fn insert_one_locked_inner(inner: &Inner, doc: Value, persist: bool) -> Result<Value> {
    check_object(&doc)?;
    let mut document = Document::new(doc)?;

    if document.id().is_none() {
        loop {
            let candidate = generate_id();
            if !inner.documents.read().contains_key(&candidate) {
                document.set_id(candidate);
                break;
            }
        }
    }

    if inner.options.timestamping {
        let now = Value::Timestamp(inner.options.clock.now());
        if document.get("createdAt").is_undefined() {
            document.fields_mut().insert("createdAt".to_string(), now.clone());
        }
        if document.get("updatedAt").is_undefined() {
            document.fields_mut().insert("updatedAt".to_string(), now);
        }
    }

    let id = document.id().expect("id assigned above").to_string();
    let value = document.value().clone();

    {
        let mut indexes = inner.indexes.write();
        let names: Vec<String> = indexes.keys().cloned().collect();
        let mut applied = Vec::new();
        for name in &names {
            let idx = indexes.get_mut(name).expect("name came from this map's own keys");
            if let Err(e) = idx.insert(&id, &value) {
                for applied_name in &applied {
                    indexes
                        .get_mut(applied_name)
                        .expect("previously-applied index still exists")
                        .remove(&id, &value);
                }
                return Err(e);
            }
            applied.push(name.clone());
        }
    }

    inner.documents.write().insert(id.clone(), document);
    if persist {
        inner
            .options
            .persistence
            .persist_new_state(&[ChangeRecord::Insert { doc: value.clone() }]);
    }
    Ok(value)
}

fn remove_document_everywhere(inner: &Inner, id: &str, value: &Value) {
    let mut indexes = inner.indexes.write();
    for idx in indexes.values_mut() {
        idx.remove(id, value);
    }
    drop(indexes);
    inner.documents.write().remove(id);
}

fn insert_many_locked(inner: &Inner, docs: Vec<Value>) -> Result<Vec<Value>> {
    let mut committed = Vec::new();
    for doc in docs {
        match insert_one_locked_inner(inner, doc, false) {
            Ok(value) => committed.push(value),
            Err(e) => {
                for value in &committed {
                    if let Some(id) = get_dot_value(value, "_id").as_str() {
                        remove_document_everywhere(inner, id, value);
                    }
                }
                log_warn!("batch insert rolled back after {} prior commit(s): {e}", committed.len());
                return Err(e);
            }
        }
    }
    let records: Vec<ChangeRecord> = committed
        .iter()
        .map(|doc| ChangeRecord::Insert { doc: doc.clone() })
        .collect();
    inner.options.persistence.persist_new_state(&records);
    Ok(committed)
}

fn is_scalar_query_value(v: &Value) -> bool {
    matches!(
        v,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Timestamp(_)
    )
}

fn is_operator_object(m: &IndexMap<String, Value>) -> bool {
    !m.is_empty() && m.keys().all(|k| k.starts_with('$'))
}

/// Pick at most one index, in priority order: direct equality, then
/// `$in`, then range, then the `_id` fallback.
fn pick_candidate_ids(inner: &Inner, filter: &Value) -> Vec<String> {
    let indexes = inner.indexes.read();
    let Value::Object(map) = filter else {
        return indexes["_id"].get_all();
    };

    for (field, val) in map {
        if field.starts_with('$') {
            continue;
        }
        if is_scalar_query_value(val) {
            if let Some(idx) = indexes.get(field.as_str()) {
                return idx.get_matching(val);
            }
        }
    }
    for (field, val) in map {
        if field.starts_with('$') {
            continue;
        }
        if let Value::Object(ops) = val {
            if is_operator_object(ops) {
                if let Some(in_val) = ops.get("$in") {
                    if let Some(idx) = indexes.get(field.as_str()) {
                        return idx.get_matching(in_val);
                    }
                }
            }
        }
    }
    for (field, val) in map {
        if field.starts_with('$') {
            continue;
        }
        if let Value::Object(ops) = val {
            let has_range = ops.keys().any(|k| matches!(k.as_str(), "$lt" | "$lte" | "$gt" | "$gte"));
            if has_range {
                if let Some(idx) = indexes.get(field.as_str()) {
                    return idx.get_between_bounds(ops.get("$gt"), ops.get("$gte"), ops.get("$lt"), ops.get("$lte"));
                }
            }
        }
    }
    indexes["_id"].get_all()
}

fn is_expired(inner: &Inner, doc: &Value, now: chrono::DateTime<chrono::Utc>) -> bool {
    inner.options.ttls.iter().any(|entry| match get_dot_value(doc, &entry.field) {
        Value::Timestamp(t) => {
            chrono::Duration::from_std(entry.ttl)
                .map(|ttl| t + ttl < now)
                .unwrap_or(false)
        }
        _ => false,
    })
}

/// Filters out TTL-expired documents from a candidate id list and
/// schedules their removal as fire-and-forget executor tasks — pushed,
/// not submitted, so this never deadlocks when called from within an
/// already-running task.
fn get_candidates(inner: &Arc<Inner>, executor: &Arc<Executor>, filter: &Value, allow_stale: bool) -> Vec<String> {
    let ids = pick_candidate_ids(inner, filter);
    if allow_stale || inner.options.ttls.is_empty() {
        return ids;
    }
    let now = inner.options.clock.now();
    let documents = inner.documents.read();
    let mut kept = Vec::new();
    let mut expired: Vec<(String, Value)> = Vec::new();
    for id in ids {
        match documents.get(&id) {
            Some(doc) if is_expired(inner, doc.value(), now) => expired.push((id, doc.value().clone())),
            Some(_) => kept.push(id),
            None => {}
        }
    }
    drop(documents);

    for (id, value) in expired {
        let inner = inner.clone();
        executor.push(
            Box::new(move || {
                remove_document_everywhere(&inner, &id, &value);
                inner.options.persistence.persist_new_state(&[ChangeRecord::Remove { id }]);
            }),
            false,
        );
    }
    kept
}

fn strip_query_operators(query: &Value) -> Value {
    match query {
        Value::Object(map) => {
            let mut out = IndexMap::new();
            for (k, v) in map {
                if k.starts_with('$') {
                    continue;
                }
                match v {
                    Value::Object(inner_map) if is_operator_object(inner_map) => continue,
                    other => {
                        out.insert(k.clone(), other.clone());
                    }
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn build_upsert_doc(query: &Value, upd: &Value) -> Result<Value> {
    let has_modifiers = matches!(upd, Value::Object(m) if m.keys().any(|k| k.starts_with('$')));
    if !has_modifiers {
        check_object(upd)?;
        return Ok(upd.clone());
    }
    let base = strip_query_operators(query);
    modify(&base, upd)
}

fn preserve_created_set_updated(new_doc: &mut Value, old: &Value, now: chrono::DateTime<chrono::Utc>) {
    let created = get_dot_value(old, "createdAt");
    if !created.is_undefined() {
        set_dot_value(new_doc, "createdAt", created);
    }
    set_dot_value(new_doc, "updatedAt", Value::Timestamp(now));
}

fn update_locked(
    inner: &Arc<Inner>,
    executor: &Arc<Executor>,
    query: &Value,
    upd: &Value,
    opts: UpdateOptions,
) -> Result<UpdateReport> {
    let ids = get_candidates(inner, executor, query, false);
    let query_obj = Query::new(query.clone());
    let mut matched: Vec<(String, Value)> = {
        let documents = inner.documents.read();
        ids.iter()
            .filter_map(|id| documents.get(id).map(|d| (id.clone(), d.value().clone())))
            .filter(|(_, v)| query_obj.matches(v))
            .collect()
    };

    if matched.is_empty() {
        if opts.upsert {
            let new_doc = build_upsert_doc(query, upd)?;
            let inserted = insert_one_locked(inner, new_doc)?;
            return Ok(UpdateReport {
                num_affected: 1,
                upsert: true,
                updated: if opts.return_updated_docs {
                    UpdatedDocs::One(inserted)
                } else {
                    UpdatedDocs::None
                },
            });
        }
        return Ok(UpdateReport {
            num_affected: 0,
            upsert: false,
            updated: UpdatedDocs::None,
        });
    }

    if !opts.multi {
        matched.truncate(1);
    }

    let now = inner.options.clock.now();
    let mut pairs = Vec::with_capacity(matched.len());
    let mut new_docs = Vec::with_capacity(matched.len());
    for (id, old) in &matched {
        let mut new_doc = modify(old, upd)?;
        if inner.options.timestamping {
            preserve_created_set_updated(&mut new_doc, old, now);
        }
        pairs.push(UpdatePair {
            id: id.clone(),
            old: old.clone(),
            new: new_doc.clone(),
        });
        new_docs.push(new_doc);
    }

    {
        let mut indexes = inner.indexes.write();
        let names: Vec<String> = indexes.keys().cloned().collect();
        let mut committed = Vec::new();
        for name in &names {
            let idx = indexes.get_mut(name).expect("name came from this map's own keys");
            if let Err(e) = idx.update_batch(&pairs) {
                for committed_name in &committed {
                    indexes
                        .get_mut(committed_name)
                        .expect("previously-committed index still exists")
                        .revert_update(&pairs);
                }
                return Err(e);
            }
            committed.push(name.clone());
        }
    }

    {
        let mut documents = inner.documents.write();
        for (pair, new_doc) in pairs.iter().zip(new_docs.iter()) {
            documents.insert(pair.id.clone(), Document::new(new_doc.clone())?);
        }
    }

    let records: Vec<ChangeRecord> = pairs
        .iter()
        .zip(new_docs.iter())
        .map(|(p, d)| ChangeRecord::Update {
            id: p.id.clone(),
            doc: d.clone(),
        })
        .collect();
    inner.options.persistence.persist_new_state(&records);

    let num_affected = new_docs.len();
    let updated = if opts.return_updated_docs {
        if opts.multi {
            UpdatedDocs::Many(new_docs)
        } else {
            UpdatedDocs::One(new_docs.into_iter().next().expect("matched is non-empty here"))
        }
    } else {
        UpdatedDocs::None
    };

    Ok(UpdateReport {
        num_affected,
        upsert: false,
        updated,
    })
}

fn remove_locked(inner: &Arc<Inner>, executor: &Arc<Executor>, query: &Value, multi: bool) -> Result<usize> {
    let ids = get_candidates(inner, executor, query, true);
    let query_obj = Query::new(query.clone());
    let mut matched: Vec<(String, Value)> = {
        let documents = inner.documents.read();
        ids.iter()
            .filter_map(|id| documents.get(id).map(|d| (id.clone(), d.value().clone())))
            .filter(|(_, v)| query_obj.matches(v))
            .collect()
    };
    if !multi {
        matched.truncate(1);
    }

    for (id, value) in &matched {
        remove_document_everywhere(inner, id, value);
    }

    let records: Vec<ChangeRecord> = matched
        .iter()
        .map(|(id, _)| ChangeRecord::Remove { id: id.clone() })
        .collect();
    inner.options.persistence.persist_new_state(&records);

    Ok(matched.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(&j)
    }

    #[test]
    fn unique_violation_leaves_single_document() {
        let store = Store::new();
        store.ensure_index("a", true, false).unwrap();
        store.insert(v(json!({"a": 1}))).unwrap();
        let err = store.insert(v(json!({"a": 1})));
        assert!(err.is_err());
        assert_eq!(store.count(v(json!({}))).unwrap(), 1);
    }

    #[test]
    fn sort_skip_limit_scenario() {
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
    }

    #[test]
    fn array_indexed_field_dedups_by_document() {
        let store = Store::new();
        store.ensure_index("tags", false, false).unwrap();
        store
            .insert(v(json!({"_id": "a", "tags": ["x", "y", "x"]})))
            .unwrap();
        let result = store.find(v(json!({"tags": "x"}))).unwrap().exec().unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn upsert_inserts_when_nothing_matches() {
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
        assert_eq!(store.count(v(json!({}))).unwrap(), 1);
    }

    #[test]
    fn inconsistent_projection_errors() {
        let store = Store::new();
        store.insert(v(json!({"a": 1, "b": 2}))).unwrap();
        let err = store
            .find(v(json!({})))
            .unwrap()
            .project(&v(json!({"a": 1, "b": 0})));
        assert!(err.is_err());
    }

    #[test]
    fn batch_insert_rolls_back_to_empty() {
        let store = Store::new();
        let err = store.insert_many(vec![
            v(json!({"_id": "1"})),
            v(json!({"_id": "2"})),
            v(json!({"_id": "1"})),
        ]);
        assert!(err.is_err());
        assert_eq!(store.count(v(json!({}))).unwrap(), 0);
    }

    #[test]
    fn batch_insert_rollback_leaves_no_phantom_persistence_records() {
        use crate::persistence::VecPersistence;

        let sink = Arc::new(VecPersistence::default());
        let store = Store::with_options(
            StoreOptionsBuilder::new().persistence(sink.clone()).build(),
        );
        let err = store.insert_many(vec![
            v(json!({"_id": "1"})),
            v(json!({"_id": "2"})),
            v(json!({"_id": "1"})),
        ]);
        assert!(err.is_err());
        assert_eq!(store.count(v(json!({}))).unwrap(), 0);
        let records = sink.records();
        assert!(
            !records.iter().any(|r| matches!(r, ChangeRecord::Insert { .. })),
            "a rolled-back batch must not leave Insert records behind: {records:?}"
        );
    }

    #[test]
    fn load_database_on_buffered_store_does_not_deadlock() {
        let store = Store::with_options_buffered(StoreOptionsBuilder::new().build());
        store
            .load_database(vec![ChangeRecord::Insert { doc: v(json!({"_id": "1", "n": 1})) }])
            .unwrap();
        assert_eq!(store.count(v(json!({}))).unwrap(), 1);
        // The executor must also be ready afterward: a plain op shouldn't block.
        store.insert(v(json!({"_id": "2", "n": 2}))).unwrap();
        assert_eq!(store.count(v(json!({}))).unwrap(), 2);
    }
}
