//! Record identifiers.

use serde::{Deserialize, Serialize};

/// Identifies a single record within a record store.
///
/// Record ids are assigned by the storage engine in insertion order and are
/// never reused within the lifetime of a store. The null id is reserved as
/// an "unset" sentinel for working-set members that carry no record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RecordId(i64);

impl RecordId {
    /// Create a record id from its raw representation.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The reserved "no record" sentinel.
    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Returns `true` if this is the null sentinel.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The raw representation.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sentinel() {
        assert!(RecordId::null().is_null());
        assert!(!RecordId::new(1).is_null());
        assert_eq!(RecordId::default(), RecordId::null());
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(RecordId::new(1) < RecordId::new(2));
        assert!(RecordId::new(-1) < RecordId::new(1));
    }
}
