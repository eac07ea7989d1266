//! Update modifiers: apply a MongoDB-flavoured update document to a
//! document, producing the result (`$set`, `$inc`, `$push`, and friends),
//! or fall back to whole-document replacement when no modifier keys are
//! present.

use crate::error::{Result, StoreError};
use crate::value::{get_dot_value, set_dot_value, unset_dot_value, Value};
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Apply an update document to `old`, producing a fresh deep copy. `old`
/// is never mutated.
pub fn modify(old: &Value, upd: &Value) -> Result<Value> {
    let upd_obj = match upd {
        Value::Object(m) => m,
        _ => {
            return Err(StoreError::InvalidUpdate {
                modifier: "<replacement>".into(),
                path: "<root>".into(),
            })
        }
    };

    let has_modifier = upd_obj.keys().any(|k| k.starts_with('$'));
    if !has_modifier {
        return replace(old, upd_obj);
    }

    let mut result = old.clone();
    for (modifier, ops) in upd_obj {
        let ops_map = match ops {
            Value::Object(m) => m,
            _ => {
                return Err(StoreError::InvalidUpdate {
                    modifier: modifier.clone(),
                    path: "<root>".into(),
                })
            }
        };
        apply_modifier(&mut result, modifier, ops_map)?;
    }
    Ok(result)
}

fn replace(old: &Value, new_obj: &IndexMap<String, Value>) -> Result<Value> {
    let old_id = old.as_object().and_then(|m| m.get("_id")).cloned();
    let mut new_map = new_obj.clone();
    if let Some(old_id) = &old_id {
        if let Some(new_id) = new_map.get("_id") {
            if !new_id.eq_value(old_id) {
                return Err(StoreError::ReplacementIdMismatch {
                    old: old_id.as_str().unwrap_or_default().to_string(),
                    new: new_id.as_str().unwrap_or_default().to_string(),
                });
            }
        }
        new_map.insert("_id".to_string(), old_id.clone());
    }
    Ok(Value::Object(new_map))
}

fn apply_modifier(doc: &mut Value, modifier: &str, ops: &IndexMap<String, Value>) -> Result<()> {
    for (path, operand) in ops {
        match modifier {
            "$set" => set_dot_value(doc, path, operand.clone()),
            "$unset" => unset_dot_value(doc, path),
            "$inc" => apply_inc(doc, path, operand, modifier)?,
            "$min" => apply_min_max(doc, path, operand, Ordering::Less),
            "$max" => apply_min_max(doc, path, operand, Ordering::Greater),
            "$push" => apply_push(doc, path, operand, modifier)?,
            "$pop" => apply_pop(doc, path, operand),
            "$addToSet" => apply_add_to_set(doc, path, operand)?,
            "$pull" => apply_pull(doc, path, operand),
            other => {
                return Err(StoreError::UnknownModifier(other.to_string()));
            }
        }
    }
    Ok(())
}

fn apply_inc(doc: &mut Value, path: &str, operand: &Value, modifier: &str) -> Result<()> {
    let delta = operand.as_f64().ok_or_else(|| StoreError::InvalidUpdate {
        modifier: modifier.to_string(),
        path: path.to_string(),
    })?;
    let current = get_dot_value(doc, path);
    let base = match current {
        Value::Undefined => 0.0,
        Value::Number(n) => n,
        _ => {
            return Err(StoreError::InvalidUpdate {
                modifier: modifier.to_string(),
                path: path.to_string(),
            })
        }
    };
    set_dot_value(doc, path, Value::Number(base + delta));
    Ok(())
}

fn apply_min_max(doc: &mut Value, path: &str, operand: &Value, keep_if: Ordering) {
    let current = get_dot_value(doc, path);
    if current.is_undefined() || current.cmp_total(operand) == keep_if {
        set_dot_value(doc, path, operand.clone());
    }
}

fn as_vec(current: Value) -> Vec<Value> {
    match current {
        Value::Array(a) => a,
        Value::Undefined => Vec::new(),
        other => vec![other],
    }
}

/// `$each` / `$slice` / `$sort` sub-operators.
struct PushSpec {
    items: Vec<Value>,
    slice: Option<i64>,
    sort: Option<SortSpec>,
}

enum SortSpec {
    Whole(i32),
    ByFields(Vec<(String, i32)>),
}

fn parse_push_operand(operand: &Value) -> PushSpec {
    if let Value::Object(m) = operand {
        if let Some(each) = m.get("$each") {
            let items = match each {
                Value::Array(a) => a.clone(),
                other => vec![other.clone()],
            };
            let slice = m.get("$slice").and_then(Value::as_f64).map(|n| n as i64);
            let sort = m.get("$sort").and_then(|s| match s {
                Value::Number(n) => Some(SortSpec::Whole(*n as i32)),
                Value::Object(fields) => Some(SortSpec::ByFields(
                    fields
                        .iter()
                        .filter_map(|(k, v)| v.as_f64().map(|d| (k.clone(), d as i32)))
                        .collect(),
                )),
                _ => None,
            });
            return PushSpec { items, slice, sort };
        }
    }
    PushSpec {
        items: vec![operand.clone()],
        slice: None,
        sort: None,
    }
}

fn apply_push(doc: &mut Value, path: &str, operand: &Value, modifier: &str) -> Result<()> {
    let current = get_dot_value(doc, path);
    if !matches!(current, Value::Array(_) | Value::Undefined) {
        return Err(StoreError::InvalidUpdate {
            modifier: modifier.to_string(),
            path: path.to_string(),
        });
    }
    let mut arr = as_vec(current);
    let spec = parse_push_operand(operand);
    arr.extend(spec.items);

    if let Some(sort) = spec.sort {
        sort_array(&mut arr, &sort);
    }
    if let Some(n) = spec.slice {
        apply_slice(&mut arr, n);
    }

    set_dot_value(doc, path, Value::Array(arr));
    Ok(())
}

fn sort_array(arr: &mut [Value], spec: &SortSpec) {
    match spec {
        SortSpec::Whole(dir) => {
            arr.sort_by(|a, b| {
                let c = a.cmp_total(b);
                if *dir < 0 {
                    c.reverse()
                } else {
                    c
                }
            });
        }
        SortSpec::ByFields(fields) => {
            arr.sort_by(|a, b| {
                for (field, dir) in fields {
                    let va = get_dot_value(a, field);
                    let vb = get_dot_value(b, field);
                    let c = va.cmp_total(&vb);
                    if c != Ordering::Equal {
                        return if *dir < 0 { c.reverse() } else { c };
                    }
                }
                Ordering::Equal
            });
        }
    }
}

fn apply_slice(arr: &mut Vec<Value>, n: i64) {
    let len = arr.len() as i64;
    if n >= 0 {
        let keep = n.min(len) as usize;
        arr.truncate(keep);
    } else {
        let keep = (-n).min(len) as usize;
        let drop = arr.len() - keep;
        arr.drain(0..drop);
    }
}

fn apply_pop(doc: &mut Value, path: &str, operand: &Value) {
    let current = get_dot_value(doc, path);
    let mut arr = match current {
        Value::Array(a) => a,
        _ => return,
    };
    if arr.is_empty() {
        return;
    }
    let from_front = matches!(operand.as_f64(), Some(n) if n < 0.0);
    if from_front {
        arr.remove(0);
    } else {
        arr.pop();
    }
    set_dot_value(doc, path, Value::Array(arr));
}

fn apply_add_to_set(doc: &mut Value, path: &str, operand: &Value) -> Result<()> {
    let current = get_dot_value(doc, path);
    if !matches!(current, Value::Array(_) | Value::Undefined) {
        return Err(StoreError::InvalidUpdate {
            modifier: "$addToSet".into(),
            path: path.to_string(),
        });
    }
    let mut arr = as_vec(current);
    let to_add = match operand {
        Value::Object(m) if m.contains_key("$each") => match m.get("$each") {
            Some(Value::Array(a)) => a.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        },
        other => vec![other.clone()],
    };
    for candidate in to_add {
        if !arr.iter().any(|existing| existing.eq_value(&candidate)) {
            arr.push(candidate);
        }
    }
    set_dot_value(doc, path, Value::Array(arr));
    Ok(())
}

fn apply_pull(doc: &mut Value, path: &str, operand: &Value) {
    let current = get_dot_value(doc, path);
    let arr = match current {
        Value::Array(a) => a,
        _ => return,
    };
    let filtered: Vec<Value> = arr
        .into_iter()
        .filter(|el| !pull_matches(el, operand))
        .collect();
    set_dot_value(doc, path, Value::Array(filtered));
}

fn pull_matches(el: &Value, operand: &Value) -> bool {
    match operand {
        Value::Object(m) if !m.is_empty() && m.keys().all(|k| k.starts_with('$')) => {
            let wrap = |v: Value| -> Value {
                let map: IndexMap<String, Value> =
                    [("$$pull".to_string(), v)].into_iter().collect();
                Value::Object(map)
            };
            crate::match_query::matches_filter(&wrap(el.clone()), &wrap(operand.clone()))
                .unwrap_or(false)
        }
        Value::Object(_) => crate::match_query::matches_filter(el, operand).unwrap_or(false),
        plain => el.eq_value(plain),
    }
}
