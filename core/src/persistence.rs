//! Persistence is an external collaborator: the store hands every
//! accepted state change to a [`PersistenceSink`] and never touches disk
//! itself. Durability policy (what gets recorded, when) lives here; the
//! actual write-ahead mechanism is the sink implementation's job, outside
//! this crate's scope.

use crate::value::Value;

/// One accepted mutation, handed to the sink after the in-memory state
/// (documents + indexes) has already been updated.
#[derive(Debug, Clone)]
pub enum ChangeRecord {
    Insert { doc: Value },
    Update { id: String, doc: Value },
    Remove { id: String },
    IndexCreated { field: String, unique: bool, sparse: bool },
    IndexRemoved { field: String },
}

/// Receives a durable record of every accepted mutation. Implementations
/// decide what "durable" means — appending to a file, shipping to a
/// replica, or (in tests) nothing at all.
pub trait PersistenceSink: Send + Sync {
    fn persist_new_state(&self, records: &[ChangeRecord]);
}

/// The default sink: accepts and discards every record. Used when the
/// embedding application owns persistence itself or wants a pure
/// in-memory store.
#[derive(Debug, Default)]
pub struct NoopPersistence;

impl PersistenceSink for NoopPersistence {
    fn persist_new_state(&self, _records: &[ChangeRecord]) {}
}

/// A test double that retains every record it is handed, in order, for
/// assertions.
#[derive(Debug, Default)]
pub struct VecPersistence {
    records: parking_lot::Mutex<Vec<ChangeRecord>>,
}

impl VecPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ChangeRecord> {
        self.records.lock().clone()
    }
}

impl PersistenceSink for VecPersistence {
    fn persist_new_state(&self, records: &[ChangeRecord]) {
        self.records.lock().extend_from_slice(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_persistence_retains_records_in_order() {
        let sink = VecPersistence::new();
        sink.persist_new_state(&[ChangeRecord::Insert { doc: Value::Null }]);
        sink.persist_new_state(&[ChangeRecord::Remove { id: "a".into() }]);
        assert_eq!(sink.records().len(), 2);
    }
}
