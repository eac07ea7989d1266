// core/src/lib.rs

pub mod cursor;
pub mod document;
pub mod error;
pub mod executor;
pub mod index;
pub mod key;
pub mod logging;
pub mod match_query;
pub mod modify;
pub mod options;
pub mod persistence;
pub mod store;
pub mod value;

pub use cursor::{Cursor, Projection, SortDirection, SortKey};
pub use document::{check_object, generate_id, Document};
pub use error::{Result, StoreError};
pub use executor::Executor;
pub use index::{Index, UpdatePair};
pub use key::Key;
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use match_query::{Query, WherePredicate};
pub use modify::modify;
pub use options::{Clock, StoreOptions, StoreOptionsBuilder, SystemClock};
pub use persistence::{ChangeRecord, NoopPersistence, PersistenceSink, VecPersistence};
pub use store::{Store, UpdateOptions, UpdateReport, UpdatedDocs};
pub use value::{get_dot_value, set_dot_value, unset_dot_value, Value};
