//! Store configuration surface: the handful of knobs this store exposes,
//! assembled through a fluent builder.

use crate::persistence::{NoopPersistence, PersistenceSink};
use crate::value::StrCmp;
use std::sync::Arc;
use std::time::Duration;

/// A clock the store asks for "now" instead of calling `Utc::now()`
/// directly, so tests can control expiry without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// A pluggable string comparator, overriding the default lexicographic
/// order used by sort and the total order (see `Value::cmp_with`).
pub type StringComparator = Arc<dyn Fn(&str, &str) -> std::cmp::Ordering + Send + Sync>;

/// Per-field TTL: documents whose `field` value is older than `ttl` are
/// dropped from query results and swept on the next write.
#[derive(Clone)]
pub struct TtlEntry {
    pub field: String,
    pub ttl: Duration,
}

/// Store-wide configuration. Constructed once at [`crate::Store`]
/// creation; immutable afterward.
pub struct StoreOptions {
    pub timestamping: bool,
    pub string_comparator: Option<StringComparator>,
    pub ttls: Vec<TtlEntry>,
    pub clock: Arc<dyn Clock>,
    pub persistence: Arc<dyn PersistenceSink>,
}

fn default_str_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    a.cmp(b)
}

static DEFAULT_STR_CMP: fn(&str, &str) -> std::cmp::Ordering = default_str_cmp;

impl StoreOptions {
    pub fn str_cmp(&self) -> StrCmp<'_> {
        match &self.string_comparator {
            Some(f) => f.as_ref(),
            None => &DEFAULT_STR_CMP,
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            timestamping: false,
            string_comparator: None,
            ttls: Vec::new(),
            clock: Arc::new(SystemClock),
            persistence: Arc::new(NoopPersistence),
        }
    }
}

pub struct StoreOptionsBuilder {
    opts: StoreOptions,
}

impl StoreOptionsBuilder {
    pub fn new() -> Self {
        StoreOptionsBuilder {
            opts: StoreOptions::default(),
        }
    }

    pub fn timestamping(mut self, enabled: bool) -> Self {
        self.opts.timestamping = enabled;
        self
    }

    pub fn string_comparator(mut self, cmp: StringComparator) -> Self {
        self.opts.string_comparator = Some(cmp);
        self
    }

    pub fn ttl(mut self, field: impl Into<String>, ttl: Duration) -> Self {
        self.opts.ttls.push(TtlEntry {
            field: field.into(),
            ttl,
        });
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.opts.clock = clock;
        self
    }

    pub fn persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.opts.persistence = sink;
        self
    }

    pub fn build(self) -> StoreOptions {
        self.opts
    }
}

impl Default for StoreOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_lexicographic_string_order() {
        let opts = StoreOptions::default();
        assert_eq!((opts.str_cmp())("a", "b"), std::cmp::Ordering::Less);
    }

    #[test]
    fn builder_sets_ttl_entries() {
        let opts = StoreOptionsBuilder::new()
            .ttl("createdAt", Duration::from_secs(60))
            .build();
        assert_eq!(opts.ttls.len(), 1);
        assert_eq!(opts.ttls[0].field, "createdAt");
    }
}
