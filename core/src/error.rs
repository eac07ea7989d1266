//! Error taxonomy for the store.
//!
//! Every failure mode is a distinct variant with the context needed to act
//! on it; there is no catch-all string variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key `{0}` contains a `.` or starts with `$`, which is reserved")]
    InvalidDocument(String),

    #[error("value for field `{field}` already exists in unique index `{index}`")]
    UniqueViolation { index: String, field: String },

    #[error("projection mixes inclusion and exclusion (field `{0}` conflicts with the rest)")]
    InconsistentProjection(String),

    #[error("replacement document `_id` ({new}) does not match existing `_id` ({old})")]
    ReplacementIdMismatch { old: String, new: String },

    #[error("unknown update modifier `{0}`")]
    UnknownModifier(String),

    #[error("modifier `{modifier}` on path `{path}` is incompatible with the current value")]
    InvalidUpdate { modifier: String, path: String },

    #[error("ensureIndex requires a non-empty field name")]
    MissingField,

    #[error("no index registered on field `{0}`")]
    IndexNotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
