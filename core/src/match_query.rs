//! Query matching: evaluate a MongoDB-flavoured filter document against a
//! document, using a strategy-pattern registry of comparison operators
//! over [`Value`].

use crate::error::Result;
use crate::value::{get_dot_value, Value};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use parking_lot::Mutex;

/// A predicate supplied by the embedding application for `$where`. Since
/// a JSON-shaped [`Value`] has no function variant, it travels alongside
/// the filter instead of inside it.
pub type WherePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A query: a filter value plus an optional `$where` predicate.
#[derive(Clone)]
pub struct Query {
    pub filter: Value,
    pub where_fn: Option<WherePredicate>,
}

impl Query {
    pub fn new(filter: Value) -> Self {
        Query { filter, where_fn: None }
    }

    pub fn with_where(filter: Value, pred: WherePredicate) -> Self {
        Query { filter, where_fn: Some(pred) }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        if let Some(pred) = &self.where_fn {
            if !pred(doc) {
                return false;
            }
        }
        matches_filter(doc, &self.filter).unwrap_or(false)
    }
}

fn regex_cache() -> &'static Mutex<HashMap<String, Regex>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn compile_regex(pattern: &str) -> Option<Regex> {
    let mut cache = regex_cache().lock();
    if let Some(re) = cache.get(pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(pattern).ok()?;
    cache.insert(pattern.to_string(), re.clone());
    Some(re)
}

/// Top-level filter evaluation: walks the object's keys, dispatching
/// logical combinators and field paths.
pub fn matches_filter(doc: &Value, filter: &Value) -> Result<bool> {
    let obj = match filter {
        Value::Object(o) => o,
        _ => return Ok(false),
    };
    for (key, val) in obj {
        let ok = match key.as_str() {
            "$or" => match_combinator(doc, val, Combinator::Or)?,
            "$and" => match_combinator(doc, val, Combinator::And)?,
            "$nor" => !match_combinator(doc, val, Combinator::Or)?,
            "$where" => true, // evaluated out-of-band via Query::where_fn
            path => match_field(doc, path, val)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

enum Combinator {
    Or,
    And,
}

fn match_combinator(doc: &Value, subqueries: &Value, kind: Combinator) -> Result<bool> {
    let Value::Array(items) = subqueries else {
        return Ok(false);
    };
    match kind {
        Combinator::And => {
            for sub in items {
                if !matches_filter(doc, sub)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Combinator::Or => {
            for sub in items {
                if matches_filter(doc, sub)? {
                    return Ok(true);
                }
            }
            Ok(items.is_empty())
        }
    }
}

fn is_operator_object(map: &IndexMap<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn match_field(doc: &Value, path: &str, query_val: &Value) -> Result<bool> {
    let actual = get_dot_value(doc, path);
    match query_val {
        Value::Object(ops) if is_operator_object(ops) => {
            for (op, operand) in ops {
                if !eval_operator(op, &actual, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        plain => Ok(value_matches_plain(&actual, plain)),
    }
}

/// Equality rule with array-membership: if the actual value is an array,
/// it matches when any element equals the query value *or* the whole
/// array equals it.
fn value_matches_plain(actual: &Value, expected: &Value) -> bool {
    if actual.eq_value(expected) {
        return true;
    }
    if let Value::Array(items) = actual {
        items.iter().any(|el| el.eq_value(expected))
    } else {
        false
    }
}

fn eval_operator(op: &str, actual: &Value, operand: &Value) -> Result<bool> {
    Ok(match op {
        "$lt" => actual.cmp_total(operand) == std::cmp::Ordering::Less,
        "$lte" => actual.cmp_total(operand) != std::cmp::Ordering::Greater,
        "$gt" => actual.cmp_total(operand) == std::cmp::Ordering::Greater,
        "$gte" => actual.cmp_total(operand) != std::cmp::Ordering::Less,
        "$ne" => !value_matches_plain(actual, operand),
        "$in" => match operand {
            Value::Array(items) => items.iter().any(|v| value_matches_plain(actual, v)),
            _ => false,
        },
        "$nin" => match operand {
            Value::Array(items) => !items.iter().any(|v| value_matches_plain(actual, v)),
            _ => true,
        },
        "$exists" => {
            let want = matches!(operand, Value::Bool(true));
            want == !actual.is_undefined()
        }
        "$regex" => match (actual, operand.as_str()) {
            (Value::String(s), Some(pattern)) => {
                compile_regex(pattern).is_some_and(|re| re.is_match(s))
            }
            _ => false,
        },
        "$size" => match (actual, operand.as_f64()) {
            (Value::Array(items), Some(n)) => items.len() as f64 == n,
            _ => false,
        },
        "$elemMatch" => match actual {
            Value::Array(items) => match operand {
                Value::Object(ops) if is_operator_object(ops) => {
                    let mut any = false;
                    for item in items {
                        let mut all_ok = true;
                        for (op, sub_operand) in ops {
                            if !eval_operator(op, item, sub_operand)? {
                                all_ok = false;
                                break;
                            }
                        }
                        if all_ok {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                sub_query => {
                    let mut any = false;
                    for item in items {
                        if matches_filter(item, sub_query)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
            },
            _ => false,
        },
        _ => false,
    })
}
