//! Error taxonomy surfaced to callers.
//!
//! The engine never retries: any failure rolls the current transaction
//! back and propagates a single typed error upward. Precondition
//! violations (processing before keys are set, wrong key count) are
//! programmer faults and panic instead of returning an error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Row-store or storage invariant violation: missing table, duplicate
    /// key, non-empty import target, tables-limit exceeded, malformed DBID.
    #[error("storage error: {0}")]
    Storage(String),

    /// Emitted exclusively by the manifest key check on digest mismatch.
    /// Callers translate this to "incorrect password".
    #[error("incorrect database key")]
    KeyCheck,

    /// Unknown algorithm ID, unknown field type, or malformed wrapper in
    /// a serialized algorithm tree.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Rejected algorithm parameter (size or range check).
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// Error bubbled up from the underlying row store.
    #[error("row store error: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl Error {
    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }
}
