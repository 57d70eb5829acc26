//! Storage error types.

use thiserror::Error;

/// Errors surfaced by storage backends.
///
/// The catalog forwards these verbatim; only [`StorageError::WriteConflict`]
/// is ever recovered from, by the executor's yield-and-retry loop.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A concurrent writer committed first; the operation should retry
    /// from a fresh snapshot.
    #[error("write conflict on {0}")]
    WriteConflict(String),

    /// The named record store does not exist.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// A record store with that name already exists.
    #[error("namespace exists: {0}")]
    NamespaceExists(String),

    /// The store exists but the record does not.
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// An I/O failure from the underlying medium.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk state failed an integrity check.
    #[error("storage corruption: {0}")]
    Corruption(String),
}

impl StorageError {
    /// Returns `true` if retrying after a yield may succeed.
    #[must_use]
    pub const fn is_write_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict(_))
    }
}
