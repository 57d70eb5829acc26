//! Lock modes and the compatibility lattice.
//!
//! Compatibility matrix (rows = requested, columns = held):
//!
//! ```text
//!  req\held | None | IS | IX | S | X
//!  ---------+------+----+----+---+---
//!  IS       |  +   | +  | +  | + | -
//!  IX       |  +   | +  | +  | - | -
//!  S        |  +   | +  | -  | + | -
//!  X        |  +   | -  | -  | - | -
//! ```

use serde::{Deserialize, Serialize};

/// The five points of the lock lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LockMode {
    None = 0,
    IntentShared = 1,
    IntentExclusive = 2,
    Shared = 3,
    Exclusive = 4,
}

/// Number of lattice points, for mode-indexed tables.
pub const LOCK_MODES_COUNT: usize = 5;

/// `CONFLICT_TABLE[requested]` is the bitmask of held modes that the
/// requested mode conflicts with.
const CONFLICT_TABLE: [u32; LOCK_MODES_COUNT] = [
    // None
    0,
    // IS
    mask(LockMode::Exclusive),
    // IX
    mask(LockMode::Shared) | mask(LockMode::Exclusive),
    // S
    mask(LockMode::IntentExclusive) | mask(LockMode::Exclusive),
    // X
    mask(LockMode::IntentShared)
        | mask(LockMode::IntentExclusive)
        | mask(LockMode::Shared)
        | mask(LockMode::Exclusive),
];

/// `COVERED_TABLE[held]` is the bitmask of modes whose rights holding
/// `held` implies.
const COVERED_TABLE: [u32; LOCK_MODES_COUNT] = [
    // None covers None
    mask(LockMode::None),
    // IS covers IS
    mask(LockMode::None) | mask(LockMode::IntentShared),
    // IX covers IS, IX
    mask(LockMode::None) | mask(LockMode::IntentShared) | mask(LockMode::IntentExclusive),
    // S covers IS, S
    mask(LockMode::None) | mask(LockMode::IntentShared) | mask(LockMode::Shared),
    // X covers all
    mask(LockMode::None)
        | mask(LockMode::IntentShared)
        | mask(LockMode::IntentExclusive)
        | mask(LockMode::Shared)
        | mask(LockMode::Exclusive),
];

/// Single-bit mask for a mode, used to build mode-set bitmasks.
#[must_use]
pub const fn mask(mode: LockMode) -> u32 {
    1 << (mode as u32)
}

/// Does `requested` conflict with any mode in the `held_mask` mode set?
#[must_use]
pub const fn conflicts(requested: LockMode, held_mask: u32) -> bool {
    CONFLICT_TABLE[requested as usize] & held_mask != 0
}

impl LockMode {
    /// Whether two individual modes may be held simultaneously.
    #[must_use]
    pub const fn is_compatible_with(self, held: LockMode) -> bool {
        !conflicts(self, mask(held))
    }

    /// Whether holding `self` implies the rights of `weaker`.
    #[must_use]
    pub const fn covers(self, weaker: LockMode) -> bool {
        COVERED_TABLE[self as usize] & mask(weaker) != 0
    }

    /// Shared and intent-shared modes draw from the reader ticket pool.
    #[must_use]
    pub const fn is_shared(self) -> bool {
        matches!(self, Self::Shared | Self::IntentShared)
    }

    /// The intent mode implied on a parent resource by acquiring `self`
    /// on a child.
    #[must_use]
    pub const fn intent_mode(self) -> LockMode {
        match self {
            Self::None => Self::None,
            Self::IntentShared | Self::Shared => Self::IntentShared,
            Self::IntentExclusive | Self::Exclusive => Self::IntentExclusive,
        }
    }

    /// Short mnemonic used in diagnostics: `IS`, `IX`, `S`, `X`.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::IntentShared => "IS",
            Self::IntentExclusive => "IX",
            Self::Shared => "S",
            Self::Exclusive => "X",
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [LockMode; 5] = [
        LockMode::None,
        LockMode::IntentShared,
        LockMode::IntentExclusive,
        LockMode::Shared,
        LockMode::Exclusive,
    ];

    /// The matrix from the module docs, rows = requested, cols = held.
    const EXPECTED: [[bool; 5]; 5] = [
        [true, true, true, true, true],
        [true, true, true, true, false],
        [true, true, true, false, false],
        [true, true, false, true, false],
        [true, false, false, false, false],
    ];

    #[test]
    fn compatibility_matrix_matches_specification() {
        for (i, &requested) in ALL.iter().enumerate() {
            for (j, &held) in ALL.iter().enumerate() {
                assert_eq!(
                    requested.is_compatible_with(held),
                    EXPECTED[i][j],
                    "requested {requested} vs held {held}"
                );
            }
        }
    }

    #[test]
    fn coverage_relation() {
        assert!(LockMode::Exclusive.covers(LockMode::Shared));
        assert!(LockMode::Exclusive.covers(LockMode::IntentExclusive));
        assert!(LockMode::Shared.covers(LockMode::IntentShared));
        assert!(LockMode::IntentExclusive.covers(LockMode::IntentShared));
        assert!(!LockMode::IntentShared.covers(LockMode::Shared));
        assert!(!LockMode::Shared.covers(LockMode::IntentExclusive));
    }

    #[test]
    fn intent_modes() {
        assert_eq!(LockMode::Shared.intent_mode(), LockMode::IntentShared);
        assert_eq!(LockMode::Exclusive.intent_mode(), LockMode::IntentExclusive);
        assert_eq!(LockMode::IntentShared.intent_mode(), LockMode::IntentShared);
    }

    proptest! {
        /// Compatibility is symmetric for every pair of real modes.
        #[test]
        fn compatibility_is_symmetric(a in 0usize..5, b in 0usize..5) {
            let (a, b) = (ALL[a], ALL[b]);
            prop_assert_eq!(a.is_compatible_with(b), b.is_compatible_with(a));
        }

        /// Anything a covering mode conflicts with, the covered mode
        /// cannot demand more than.
        #[test]
        fn covered_modes_conflict_less(a in 0usize..5, b in 0usize..5) {
            let (stronger, weaker) = (ALL[a], ALL[b]);
            if stronger.covers(weaker) {
                let stronger_conflicts = CONFLICT_TABLE[stronger as usize];
                let weaker_conflicts = CONFLICT_TABLE[weaker as usize];
                prop_assert_eq!(stronger_conflicts | weaker_conflicts, stronger_conflicts);
            }
        }
    }
}
