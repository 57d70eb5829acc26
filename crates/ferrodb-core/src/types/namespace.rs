//! Namespace strings.
//!
//! A namespace names a collection as `"<db>.<collection>"`. The database
//! component may not contain dots; everything after the first dot is the
//! collection component. This module also owns the drop-pending naming
//! scheme used by two-phase collection drops.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::optime::{OpTime, Timestamp};

/// Longest allowed namespace for ordinary user collections.
pub const MAX_USER_NS_LEN: usize = 120;

/// Hard upper bound on any namespace, including drop-pending renames and
/// index namespaces.
pub const MAX_NS_LEN: usize = 255;

const DROP_PENDING_PREFIX: &str = "system.drop.";

/// Errors from namespace validation.
#[derive(Debug, Clone, Error)]
pub enum NamespaceError {
    #[error("namespace cannot be empty")]
    Empty,

    #[error("namespace '{0}' is missing a collection component")]
    MissingCollection(String),

    #[error("database name '{0}' contains invalid characters")]
    InvalidDatabaseName(String),

    #[error("collection component of '{0}' cannot be blank")]
    BlankCollection(String),

    #[error("namespace too long: {got} bytes (maximum {max})")]
    TooLong { got: usize, max: usize },
}

/// A validated `"db.collection"` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespaceString(String);

impl NamespaceString {
    /// Parse and validate a full namespace.
    ///
    /// # Errors
    ///
    /// Returns a [`NamespaceError`] if the database component is empty or
    /// contains invalid characters, the collection component is blank, or
    /// the namespace exceeds [`MAX_NS_LEN`].
    pub fn parse(ns: impl Into<String>) -> Result<Self, NamespaceError> {
        let ns = ns.into();
        if ns.is_empty() {
            return Err(NamespaceError::Empty);
        }
        let Some(dot) = ns.find('.') else {
            return Err(NamespaceError::MissingCollection(ns));
        };
        let (db, coll) = (&ns[..dot], &ns[dot + 1..]);
        if db.is_empty()
            || db.chars().any(|c| {
                matches!(c, '/' | '\\' | '.' | ' ' | '"' | '$' | '*' | '<' | '>' | ':' | '|' | '?')
            })
        {
            return Err(NamespaceError::InvalidDatabaseName(db.to_string()));
        }
        if coll.trim().is_empty() {
            return Err(NamespaceError::BlankCollection(ns));
        }
        if ns.len() > MAX_NS_LEN {
            return Err(NamespaceError::TooLong { got: ns.len(), max: MAX_NS_LEN });
        }
        Ok(Self(ns))
    }

    /// Build a namespace from its parts.
    ///
    /// # Errors
    ///
    /// Same rules as [`NamespaceString::parse`].
    pub fn from_parts(db: &str, coll: &str) -> Result<Self, NamespaceError> {
        Self::parse(format!("{db}.{coll}"))
    }

    /// The full `"db.collection"` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The database component.
    #[must_use]
    pub fn db(&self) -> &str {
        let dot = self.0.find('.').unwrap_or(self.0.len());
        &self.0[..dot]
    }

    /// The collection component.
    #[must_use]
    pub fn coll(&self) -> &str {
        match self.0.find('.') {
            Some(dot) => &self.0[dot + 1..],
            None => "",
        }
    }

    /// Total byte length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a parsed namespace; present for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` for `system.*` collections.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.coll().starts_with("system.")
    }

    #[must_use]
    pub fn is_system_dot_profile(&self) -> bool {
        self.coll() == "system.profile"
    }

    #[must_use]
    pub fn is_system_dot_views(&self) -> bool {
        self.coll() == "system.views"
    }

    /// Returns `true` for the replication oplog.
    #[must_use]
    pub fn is_oplog(&self) -> bool {
        self.db() == "local" && self.coll().starts_with("oplog.")
    }

    /// System collections that may be dropped like user collections.
    #[must_use]
    pub fn is_droppable_system(&self) -> bool {
        self.is_system_dot_views() || self.coll().starts_with(DROP_PENDING_PREFIX)
    }

    /// Returns `true` if this namespace uses the drop-pending scheme.
    #[must_use]
    pub fn is_drop_pending(&self) -> bool {
        self.coll().starts_with(DROP_PENDING_PREFIX)
    }

    /// Whether this namespace fits within the user-collection length limit.
    #[must_use]
    pub fn is_valid_user_length(&self) -> bool {
        self.0.len() <= MAX_USER_NS_LEN
    }

    /// The namespace this collection is renamed to by phase one of a
    /// two-phase drop: `"<db>.system.drop.<secs>i<inc>.<coll>"`.
    #[must_use]
    pub fn make_drop_pending(&self, drop_op_time: OpTime) -> NamespaceString {
        let ts = drop_op_time.timestamp;
        NamespaceString(format!(
            "{}.{}{}i{}.{}",
            self.db(),
            DROP_PENDING_PREFIX,
            ts.secs,
            ts.inc,
            self.coll()
        ))
    }

    /// Recover the drop optime's timestamp encoded in a drop-pending
    /// namespace, or `None` if this is not one.
    #[must_use]
    pub fn drop_pending_timestamp(&self) -> Option<Timestamp> {
        let rest = self.coll().strip_prefix(DROP_PENDING_PREFIX)?;
        let (stamp, _coll) = rest.split_once('.')?;
        let (secs, inc) = stamp.split_once('i')?;
        Some(Timestamp::new(secs.parse().ok()?, inc.parse().ok()?))
    }

    /// Check that appending `extra` bytes (an index name and separator,
    /// or a drop-pending prefix) keeps the namespace within [`MAX_NS_LEN`].
    ///
    /// # Errors
    ///
    /// Returns [`NamespaceError::TooLong`] when it would not.
    pub fn check_length_for_rename(&self, extra: usize) -> Result<(), NamespaceError> {
        let got = self.0.len() + extra;
        if got > MAX_NS_LEN {
            return Err(NamespaceError::TooLong { got, max: MAX_NS_LEN });
        }
        Ok(())
    }
}

impl std::fmt::Display for NamespaceString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NamespaceString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
