//! Replication operation times.

use serde::{Deserialize, Serialize};

/// A cluster-time point: seconds since epoch plus an ordinal within the
/// second.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub secs: u32,
    pub inc: u32,
}

impl Timestamp {
    #[must_use]
    pub const fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }
}

/// The time of an operation in the replication log.
///
/// Ordered first by timestamp, then by election term. The null optime
/// (all zeros) means "no optime available" and sorts before every real
/// one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct OpTime {
    pub timestamp: Timestamp,
    pub term: i64,
}

impl OpTime {
    #[must_use]
    pub const fn new(timestamp: Timestamp, term: i64) -> Self {
        Self { timestamp, term }
    }

    /// The "no optime" sentinel.
    #[must_use]
    pub const fn null() -> Self {
        Self { timestamp: Timestamp::new(0, 0), term: 0 }
    }

    /// Returns `true` if this is the null sentinel.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.timestamp.secs == 0 && self.timestamp.inc == 0 && self.term == 0
    }
}

impl std::fmt::Display for OpTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{t: {}, i: {}, term: {}}}", self.timestamp.secs, self.timestamp.inc, self.term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_timestamp_major() {
        let a = OpTime::new(Timestamp::new(1, 5), 9);
        let b = OpTime::new(Timestamp::new(2, 0), 1);
        assert!(a < b);

        let c = OpTime::new(Timestamp::new(2, 1), 1);
        assert!(b < c);
    }

    #[test]
    fn null_sorts_first() {
        assert!(OpTime::null() < OpTime::new(Timestamp::new(1, 0), 0));
        assert!(OpTime::null().is_null());
    }
}
