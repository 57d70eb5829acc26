//! Error types and the stable numeric code table.
//!
//! Every user-visible failure maps to a fixed [`ErrorCode`] so that the
//! command layer can report `{ok: 0, code, errmsg}` documents whose codes
//! never change between releases.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable numeric error codes observable at the command layer.
///
/// The discriminant values are part of the public wire contract and must
/// never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    InternalError = 1,
    BadValue = 2,
    FailedToParse = 9,
    IllegalOperation = 20,
    LockDeadlock = 22,
    LockTimeout = 24,
    NamespaceNotFound = 26,
    IndexNotFound = 27,
    NamespaceExists = 48,
    ExceededTimeLimit = 50,
    InvalidNamespace = 73,
    OperationFailed = 96,
    WriteConflict = 112,
    QueryPlanKilled = 175,
    DatabaseDropPending = 215,
    CannotImplicitlyCreateCollection = 264,
    DuplicateKey = 11000,
    Interrupted = 11601,
}

impl ErrorCode {
    /// The numeric value reported in command responses.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// The canonical name reported alongside the code.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InternalError => "InternalError",
            Self::BadValue => "BadValue",
            Self::FailedToParse => "FailedToParse",
            Self::IllegalOperation => "IllegalOperation",
            Self::LockDeadlock => "LockDeadlock",
            Self::LockTimeout => "LockTimeout",
            Self::NamespaceNotFound => "NamespaceNotFound",
            Self::IndexNotFound => "IndexNotFound",
            Self::NamespaceExists => "NamespaceExists",
            Self::ExceededTimeLimit => "ExceededTimeLimit",
            Self::InvalidNamespace => "InvalidNamespace",
            Self::OperationFailed => "OperationFailed",
            Self::WriteConflict => "WriteConflict",
            Self::QueryPlanKilled => "QueryPlanKilled",
            Self::DatabaseDropPending => "DatabaseDropPending",
            Self::CannotImplicitlyCreateCollection => "CannotImplicitlyCreateCollection",
            Self::DuplicateKey => "DuplicateKey",
            Self::Interrupted => "Interrupted",
        }
    }

    /// Returns `true` for errors the caller may retry after backing off.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::WriteConflict | Self::LockTimeout)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

/// Errors raised by the core type layer.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A namespace failed validation.
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    /// An options document failed validation.
    #[error("invalid options: {0}")]
    BadValue(String),

    /// An options document could not be parsed.
    #[error("failed to parse: {0}")]
    FailedToParse(String),
}

impl CoreError {
    /// The stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidNamespace(_) => ErrorCode::InvalidNamespace,
            Self::BadValue(_) => ErrorCode::BadValue,
            Self::FailedToParse(_) => ErrorCode::FailedToParse,
        }
    }
}
