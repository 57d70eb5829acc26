//! Lockable resource identifiers.
//!
//! A [`ResourceId`] packs a resource type tag and a 61-bit hash of the
//! resource name into a single `u64`. The numeric ordering of type tags
//! follows the lock hierarchy, so sorting a set of ids ascending yields
//! an acquisition order that never violates the hierarchical protocol.

use serde::{Deserialize, Serialize};

/// The kind of entity a resource id stands for.
///
/// The discriminants participate in [`ResourceId`] ordering: parents of
/// the hierarchy sort before children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceType {
    Invalid = 0,
    /// The whole server instance.
    Global = 1,
    /// Journal flush coordination point.
    FlushSentinel = 2,
    Database = 3,
    Collection = 4,
    Metadata = 5,
    /// An arbitrary named mutex outside the hierarchy.
    Mutex = 6,
}

const RESOURCE_TYPE_COUNT: usize = 7;
const TYPE_BITS: u32 = 3;
const HASH_BITS: u32 = 64 - TYPE_BITS;
const HASH_MASK: u64 = (1 << HASH_BITS) - 1;

impl ResourceType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::Global => "Global",
            Self::FlushSentinel => "FlushSentinel",
            Self::Database => "Database",
            Self::Collection => "Collection",
            Self::Metadata => "Metadata",
            Self::Mutex => "Mutex",
        }
    }

    const fn from_tag(tag: u64) -> Self {
        match tag {
            1 => Self::Global,
            2 => Self::FlushSentinel,
            3 => Self::Database,
            4 => Self::Collection,
            5 => Self::Metadata,
            6 => Self::Mutex,
            _ => Self::Invalid,
        }
    }
}

/// Number of resource types, for type-indexed tables.
pub const RESOURCE_TYPES_COUNT: usize = RESOURCE_TYPE_COUNT;

/// An opaque identifier for a lockable resource.
///
/// Two ids compare equal iff their type and hashed name are equal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Id for a named resource.
    #[must_use]
    pub fn new(rtype: ResourceType, name: &str) -> Self {
        Self(((rtype as u64) << HASH_BITS) | (fnv1a(name.as_bytes()) & HASH_MASK))
    }

    /// Id for a singleton resource with a fixed ordinal.
    #[must_use]
    pub const fn singleton(rtype: ResourceType, ordinal: u64) -> Self {
        Self(((rtype as u64) << HASH_BITS) | (ordinal & HASH_MASK))
    }

    /// The parallel batch writer coordination point. Sorts before
    /// [`ResourceId::global`] so saved-state restore reacquires it first.
    #[must_use]
    pub const fn parallel_batch_writer() -> Self {
        Self::singleton(ResourceType::Global, 1)
    }

    /// The global instance resource.
    #[must_use]
    pub const fn global() -> Self {
        Self::singleton(ResourceType::Global, 2)
    }

    /// The journal flush sentinel.
    #[must_use]
    pub const fn flush_sentinel() -> Self {
        Self::singleton(ResourceType::FlushSentinel, 1)
    }

    /// Id for a database by name.
    #[must_use]
    pub fn for_database(db: &str) -> Self {
        Self::new(ResourceType::Database, db)
    }

    /// Id for a collection by full namespace.
    #[must_use]
    pub fn for_collection(ns: &str) -> Self {
        Self::new(ResourceType::Collection, ns)
    }

    /// The resource's type tag.
    #[must_use]
    pub const fn rtype(self) -> ResourceType {
        ResourceType::from_tag(self.0 >> HASH_BITS)
    }

    /// The raw packed representation.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_global(self) -> bool {
        self.0 == Self::global().0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}: {:#x}}}", self.rtype().name(), self.0 & HASH_MASK)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_id() {
        assert_eq!(ResourceId::for_database("app"), ResourceId::for_database("app"));
        assert_ne!(ResourceId::for_database("app"), ResourceId::for_database("app2"));
        assert_ne!(
            ResourceId::for_database("app"),
            ResourceId::new(ResourceType::Collection, "app")
        );
    }

    #[test]
    fn hierarchy_orders_ascending() {
        let global = ResourceId::global();
        let db = ResourceId::for_database("app");
        let coll = ResourceId::for_collection("app.users");
        assert!(global < db);
        assert!(db < coll);
        assert!(ResourceId::parallel_batch_writer() < global);
    }

    #[test]
    fn type_round_trips_through_packing() {
        assert_eq!(ResourceId::global().rtype(), ResourceType::Global);
        assert_eq!(ResourceId::for_database("x").rtype(), ResourceType::Database);
        assert_eq!(ResourceId::for_collection("x.y").rtype(), ResourceType::Collection);
        assert_eq!(ResourceId::flush_sentinel().rtype(), ResourceType::FlushSentinel);
        assert_eq!(
            ResourceId::new(ResourceType::Mutex, "shard-registry").rtype(),
            ResourceType::Mutex
        );
    }
}
