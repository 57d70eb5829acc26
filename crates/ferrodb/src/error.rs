//! Error types for the FerroDB execution core.
//!
//! This module provides the [`enum@Error`] type covering every failure the
//! catalog, locking, and executor layers can surface, with a stable
//! [`ErrorCode`] for each so the command layer can report
//! `{ok: 0, code, errmsg}` documents.

use ferrodb_concurrency::LockError;
use ferrodb_core::{CoreError, ErrorCode, NamespaceError};
use ferrodb_storage::StorageError;
use thiserror::Error;

/// Errors raised and propagated by the execution core.
#[derive(Debug, Error)]
pub enum Error {
    /// A named collection or database does not exist.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// A named collection already exists.
    #[error("namespace exists: {0}")]
    NamespaceExists(String),

    /// The requested index does not exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// The operation is not allowed against this target.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// The namespace failed validation.
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    /// The database is in the middle of being dropped.
    #[error("database drop pending: {0}")]
    DatabaseDropPending(String),

    /// Implicit collection creation is disabled for this namespace.
    #[error("cannot implicitly create collection: {0}")]
    CannotImplicitlyCreateCollection(String),

    /// A unique index rejected a duplicate key.
    #[error("duplicate key for index {index}: {key}")]
    DuplicateKey { index: String, key: String },

    /// Lock acquisition timed out.
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// Lock acquisition found a deadlock cycle.
    #[error("lock deadlock: {0}")]
    LockDeadlock(String),

    /// A concurrent writer won; the executor retries after a yield.
    #[error("write conflict: {0}")]
    WriteConflict(String),

    /// The executor's catalog references vanished during a yield.
    #[error("query plan killed: {0}")]
    QueryPlanKilled(String),

    /// The operation was killed.
    #[error("operation interrupted{}", fmt_reason(.0))]
    Interrupted(Option<String>),

    /// The operation ran past its deadline.
    #[error("operation exceeded time limit")]
    ExceededTimeLimit,

    /// An invalid value was supplied.
    #[error("bad value: {0}")]
    BadValue(String),

    /// Input could not be parsed.
    #[error("failed to parse: {0}")]
    FailedToParse(String),

    /// A storage or execution failure outside the retryable set.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// An invariant was violated.
    #[error("internal error: {0}")]
    InternalError(String),
}

fn fmt_reason(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl Error {
    /// The stable numeric code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NamespaceNotFound(_) => ErrorCode::NamespaceNotFound,
            Self::NamespaceExists(_) => ErrorCode::NamespaceExists,
            Self::IndexNotFound(_) => ErrorCode::IndexNotFound,
            Self::IllegalOperation(_) => ErrorCode::IllegalOperation,
            Self::InvalidNamespace(_) => ErrorCode::InvalidNamespace,
            Self::DatabaseDropPending(_) => ErrorCode::DatabaseDropPending,
            Self::CannotImplicitlyCreateCollection(_) => {
                ErrorCode::CannotImplicitlyCreateCollection
            }
            Self::DuplicateKey { .. } => ErrorCode::DuplicateKey,
            Self::LockTimeout(_) => ErrorCode::LockTimeout,
            Self::LockDeadlock(_) => ErrorCode::LockDeadlock,
            Self::WriteConflict(_) => ErrorCode::WriteConflict,
            Self::QueryPlanKilled(_) => ErrorCode::QueryPlanKilled,
            Self::Interrupted(_) => ErrorCode::Interrupted,
            Self::ExceededTimeLimit => ErrorCode::ExceededTimeLimit,
            Self::BadValue(_) => ErrorCode::BadValue,
            Self::FailedToParse(_) => ErrorCode::FailedToParse,
            Self::OperationFailed(_) => ErrorCode::OperationFailed,
            Self::InternalError(_) => ErrorCode::InternalError,
        }
    }

    /// Returns `true` for write conflicts, which the executor loop
    /// recovers from locally.
    #[must_use]
    pub const fn is_write_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict(_))
    }

    /// Rebuild an error from a (code, message) pair carried through a
    /// working-set status member.
    #[must_use]
    pub fn from_code(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::NamespaceNotFound => Self::NamespaceNotFound(message),
            ErrorCode::NamespaceExists => Self::NamespaceExists(message),
            ErrorCode::IndexNotFound => Self::IndexNotFound(message),
            ErrorCode::IllegalOperation => Self::IllegalOperation(message),
            ErrorCode::InvalidNamespace => Self::InvalidNamespace(message),
            ErrorCode::DatabaseDropPending => Self::DatabaseDropPending(message),
            ErrorCode::CannotImplicitlyCreateCollection => {
                Self::CannotImplicitlyCreateCollection(message)
            }
            ErrorCode::DuplicateKey => Self::DuplicateKey { index: String::new(), key: message },
            ErrorCode::LockTimeout => Self::LockTimeout(message),
            ErrorCode::LockDeadlock => Self::LockDeadlock(message),
            ErrorCode::WriteConflict => Self::WriteConflict(message),
            ErrorCode::QueryPlanKilled => Self::QueryPlanKilled(message),
            ErrorCode::Interrupted => Self::Interrupted(Some(message)),
            ErrorCode::ExceededTimeLimit => Self::ExceededTimeLimit,
            ErrorCode::BadValue => Self::BadValue(message),
            ErrorCode::FailedToParse => Self::FailedToParse(message),
            ErrorCode::OperationFailed => Self::OperationFailed(message),
            ErrorCode::InternalError => Self::InternalError(message),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::WriteConflict(what) => Self::WriteConflict(what),
            StorageError::NamespaceNotFound(ns) => Self::NamespaceNotFound(ns),
            StorageError::NamespaceExists(ns) => Self::NamespaceExists(ns),
            StorageError::RecordNotFound(what) => Self::OperationFailed(what),
            StorageError::Io(e) => Self::OperationFailed(e.to_string()),
            StorageError::Corruption(what) => Self::InternalError(what),
        }
    }
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { .. } => Self::LockTimeout(err.to_string()),
            LockError::Deadlock { .. } => Self::LockDeadlock(err.to_string()),
        }
    }
}

impl From<NamespaceError> for Error {
    fn from(err: NamespaceError) -> Self {
        Self::InvalidNamespace(err.to_string())
    }
}

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidNamespace(what) => Self::InvalidNamespace(what),
            CoreError::BadValue(what) => Self::BadValue(what),
            CoreError::FailedToParse(what) => Self::FailedToParse(what),
        }
    }
}

/// A specialized `Result` for execution-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_variants() {
        assert_eq!(Error::NamespaceNotFound("x".into()).code(), ErrorCode::NamespaceNotFound);
        assert_eq!(Error::WriteConflict("x".into()).code(), ErrorCode::WriteConflict);
        assert_eq!(Error::ExceededTimeLimit.code(), ErrorCode::ExceededTimeLimit);
    }

    #[test]
    fn storage_errors_map_through() {
        let err: Error = StorageError::WriteConflict("RecordId(3)".into()).into();
        assert!(err.is_write_conflict());

        let err: Error = StorageError::NamespaceNotFound("db.c".into()).into();
        assert_eq!(err.code(), ErrorCode::NamespaceNotFound);
    }

    #[test]
    fn code_round_trip() {
        let original = Error::QueryPlanKilled("collection dropped".into());
        let rebuilt = Error::from_code(original.code(), "collection dropped".into());
        assert_eq!(rebuilt.code(), ErrorCode::QueryPlanKilled);
    }
}
