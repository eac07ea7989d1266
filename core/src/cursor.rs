//! Cursors: the query pipeline after candidate documents have been
//! gathered — match filter, sort, skip/limit, projection, run as staged
//! steps over the candidate set.

use crate::error::{Result, StoreError};
use crate::match_query::Query;
use crate::value::{get_dot_value, StrCmp, Value};
use indexmap::IndexMap;
use std::cmp::Ordering;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ProjectionMode {
    Inclusion,
    Exclusion,
}

/// A field-name -> 1/0 projection spec, plus the `_id` special case: it
/// defaults to included and may be explicitly excluded in either mode
/// without being treated as a mode conflict.
pub struct Projection {
    mode: ProjectionMode,
    fields: Vec<String>,
    exclude_id: bool,
}

impl Projection {
    /// Build from a `{field: 1 | 0, ...}` spec. Errors if non-`_id` fields
    /// mix inclusion and exclusion.
    pub fn parse(spec: &Value) -> Result<Self> {
        let Value::Object(map) = spec else {
            return Err(StoreError::InconsistentProjection(
                "projection must be an object".into(),
            ));
        };
        let mut mode: Option<ProjectionMode> = None;
        let mut fields = Vec::new();
        let mut exclude_id = false;
        for (key, val) in map {
            let include = !matches!(val, Value::Number(n) if *n == 0.0) && !matches!(val, Value::Bool(false));
            if key == "_id" {
                if !include {
                    exclude_id = true;
                }
                continue;
            }
            let this_mode = if include {
                ProjectionMode::Inclusion
            } else {
                ProjectionMode::Exclusion
            };
            match mode {
                None => mode = Some(this_mode),
                Some(m) if m == this_mode => {}
                Some(_) => {
                    return Err(StoreError::InconsistentProjection(format!(
                        "cannot mix inclusion and exclusion in projection (at field {key})"
                    )))
                }
            }
            fields.push(key.clone());
        }
        Ok(Projection {
            mode: mode.unwrap_or(ProjectionMode::Exclusion),
            fields,
            exclude_id,
        })
    }

    pub fn apply(&self, doc: &Value) -> Value {
        let mut out = IndexMap::new();
        match self.mode {
            ProjectionMode::Inclusion => {
                if !self.exclude_id {
                    let id = get_dot_value(doc, "_id");
                    if !id.is_undefined() {
                        out.insert("_id".to_string(), id);
                    }
                }
                for field in &self.fields {
                    let v = get_dot_value(doc, field);
                    if !v.is_undefined() {
                        out.insert(field.clone(), v);
                    }
                }
            }
            ProjectionMode::Exclusion => {
                let Value::Object(src) = doc else {
                    return doc.clone();
                };
                for (k, v) in src {
                    if k == "_id" {
                        if !self.exclude_id {
                            out.insert(k.clone(), v.clone());
                        }
                        continue;
                    }
                    if !self.fields.contains(k) {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        Value::Object(out)
    }
}

#[derive(Clone, Copy)]
pub enum SortDirection {
    Ascending,
    Descending,
}

pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// A post-filter cursor over already-gathered candidate documents.
pub struct Cursor<'a> {
    candidates: Vec<Value>,
    query: Query,
    sort: Option<Vec<SortKey>>,
    skip: usize,
    limit: Option<usize>,
    projection: Option<Projection>,
    str_cmp: StrCmp<'a>,
}

const DEFAULT_STR_CMP: fn(&str, &str) -> Ordering = |a, b| a.cmp(b);

impl<'a> Cursor<'a> {
    pub fn new(candidates: Vec<Value>, query: Query) -> Self {
        Cursor {
            candidates,
            query,
            sort: None,
            skip: 0,
            limit: None,
            projection: None,
            str_cmp: &DEFAULT_STR_CMP,
        }
    }

    pub fn with_str_cmp(mut self, cmp: StrCmp<'a>) -> Self {
        self.str_cmp = cmp;
        self
    }

    pub fn sort(mut self, keys: Vec<SortKey>) -> Self {
        self.sort = Some(keys);
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn project(mut self, spec: &Value) -> Result<Self> {
        self.projection = Some(Projection::parse(spec)?);
        Ok(self)
    }

    /// Run the pipeline: match filter, sort, skip/limit, projection.
    pub fn exec(self) -> Result<Vec<Value>> {
        let mut matched: Vec<Value> = self
            .candidates
            .into_iter()
            .filter(|doc| self.query.matches(doc))
            .collect();

        if let Some(keys) = &self.sort {
            matched.sort_by(|a, b| {
                for key in keys {
                    let va = get_dot_value(a, &key.field);
                    let vb = get_dot_value(b, &key.field);
                    let c = va.cmp_with(&vb, self.str_cmp);
                    let c = match key.direction {
                        SortDirection::Ascending => c,
                        SortDirection::Descending => c.reverse(),
                    };
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                Ordering::Equal
            });
        }

        let skipped: Vec<Value> = matched.into_iter().skip(self.skip).collect();
        let limited: Vec<Value> = match self.limit {
            Some(n) => skipped.into_iter().take(n).collect(),
            None => skipped,
        };

        match &self.projection {
            Some(proj) => Ok(limited.iter().map(|d| proj.apply(d)).collect()),
            None => Ok(limited),
        }
    }
}
