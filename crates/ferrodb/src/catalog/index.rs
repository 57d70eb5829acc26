//! Index descriptors and the in-memory index store.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::RwLock;

use ferrodb_core::{CollationSpec, Document, IndexKey, KeyPattern, RecordId, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current on-disk index format version.
pub const INDEX_VERSION: i32 = 2;

/// How an index organizes its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessMethod {
    BTree,
    Hashed,
    Text,
    TwoD,
    TwoDSphere,
}

impl AccessMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BTree => "btree",
            Self::Hashed => "hashed",
            Self::Text => "text",
            Self::TwoD => "2d",
            Self::TwoDSphere => "2dsphere",
        }
    }

    /// Only ordered access methods can serve range bounds.
    #[must_use]
    pub const fn supports_ranges(self) -> bool {
        matches!(self, Self::BTree)
    }
}

/// Immutable description of one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    name: String,
    key_pattern: KeyPattern,
    access_method: AccessMethod,
    unique: bool,
    sparse: bool,
    /// Filter restricting which documents are indexed.
    partial_filter: Option<Document>,
    collation: Option<CollationSpec>,
    version: i32,
}

impl IndexDescriptor {
    /// Describe a plain btree index.
    #[must_use]
    pub fn new(name: impl Into<String>, key_pattern: KeyPattern) -> Self {
        Self {
            name: name.into(),
            key_pattern,
            access_method: AccessMethod::BTree,
            unique: false,
            sparse: false,
            partial_filter: None,
            collation: None,
            version: INDEX_VERSION,
        }
    }

    /// The `_id` index every ordinary collection carries.
    #[must_use]
    pub fn id_index() -> Self {
        Self::new("_id_", KeyPattern::id_index()).with_unique(true)
    }

    #[must_use]
    pub fn with_access_method(mut self, method: AccessMethod) -> Self {
        self.access_method = method;
        self
    }

    #[must_use]
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    #[must_use]
    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    #[must_use]
    pub fn with_partial_filter(mut self, filter: Document) -> Self {
        self.partial_filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_collation(mut self, collation: CollationSpec) -> Self {
        self.collation = Some(collation);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn key_pattern(&self) -> &KeyPattern {
        &self.key_pattern
    }

    #[must_use]
    pub const fn access_method(&self) -> AccessMethod {
        self.access_method
    }

    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    #[must_use]
    pub const fn is_sparse(&self) -> bool {
        self.sparse
    }

    #[must_use]
    pub fn partial_filter(&self) -> Option<&Document> {
        self.partial_filter.as_ref()
    }

    #[must_use]
    pub fn collation(&self) -> Option<&CollationSpec> {
        self.collation.as_ref()
    }

    #[must_use]
    pub const fn version(&self) -> i32 {
        self.version
    }

    #[must_use]
    pub fn is_id_index(&self) -> bool {
        self.name == "_id_"
    }

    /// The index's own namespace: `"<db>.<coll>$<name>"`.
    #[must_use]
    pub fn index_namespace(&self, parent_ns: &str) -> String {
        format!("{parent_ns}${}", self.name)
    }

    /// Validate the spec before it reaches the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadValue`] for empty names or key patterns, and
    /// for an id index that is not `{_id: 1}` unique.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::BadValue("index name cannot be empty".into()));
        }
        if self.key_pattern.is_empty() {
            return Err(Error::BadValue(format!("index {} has an empty key pattern", self.name)));
        }
        if self.is_id_index() && (self.key_pattern != KeyPattern::id_index() || !self.unique) {
            return Err(Error::BadValue("the _id index must be {_id: 1} and unique".into()));
        }
        Ok(())
    }
}

/// Inclusive/exclusive key bounds for one index scan.
#[derive(Debug, Clone)]
pub struct IntervalBounds {
    pub low: Bound<IndexKey>,
    pub high: Bound<IndexKey>,
}

impl IntervalBounds {
    /// The full index.
    #[must_use]
    pub fn all() -> Self {
        Self { low: Bound::Unbounded, high: Bound::Unbounded }
    }

    /// Exactly one key.
    #[must_use]
    pub fn point(key: IndexKey) -> Self {
        Self { low: Bound::Included(key.clone()), high: Bound::Included(key) }
    }

    #[must_use]
    pub fn new(low: Bound<IndexKey>, high: Bound<IndexKey>) -> Self {
        Self { low, high }
    }
}

/// One (key, record) entry position inside an index scan, used to
/// resume after save/restore.
pub type IndexPosition = (IndexKey, RecordId);

/// The in-memory key container behind one ready index.
///
/// Keys map to the set of records bearing them; iteration is ordered by
/// (key, record id) so scans are restartable from any position.
#[derive(Default, Debug)]
pub struct IndexStore {
    entries: RwLock<BTreeMap<IndexKey, BTreeSet<RecordId>>>,
}

impl IndexStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. For unique indexes the caller checks
    /// [`IndexStore::conflicts_with`] first.
    pub fn insert(&self, key: IndexKey, rid: RecordId) {
        let mut entries = self.entries.write().expect("index store poisoned");
        entries.entry(key).or_default().insert(rid);
    }

    /// Remove an entry; prunes the key when its record set empties.
    pub fn remove(&self, key: &IndexKey, rid: RecordId) {
        let mut entries = self.entries.write().expect("index store poisoned");
        if let Some(set) = entries.get_mut(key) {
            set.remove(&rid);
            if set.is_empty() {
                entries.remove(key);
            }
        }
    }

    /// Would inserting `key` for `rid` violate uniqueness?
    #[must_use]
    pub fn conflicts_with(&self, key: &IndexKey, rid: RecordId) -> bool {
        let entries = self.entries.read().expect("index store poisoned");
        entries.get(key).is_some_and(|set| set.iter().any(|&existing| existing != rid))
    }

    /// Records bearing exactly `key`.
    #[must_use]
    pub fn lookup(&self, key: &IndexKey) -> Vec<RecordId> {
        let entries = self.entries.read().expect("index store poisoned");
        entries.get(key).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    /// Number of (key, record) entries.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        let entries = self.entries.read().expect("index store poisoned");
        entries.values().map(BTreeSet::len).sum()
    }

    /// The next (key, record) pair after `position` within `bounds`,
    /// in the given direction; `None` position starts from the boundary.
    #[must_use]
    pub fn next_in_range(
        &self,
        position: Option<&IndexPosition>,
        bounds: &IntervalBounds,
        forward: bool,
    ) -> Option<IndexPosition> {
        let entries = self.entries.read().expect("index store poisoned");
        let range = entries.range((bounds.low.clone(), bounds.high.clone()));

        if forward {
            for (key, rids) in range {
                match position {
                    Some((last_key, last_rid)) if key == last_key => {
                        if let Some(&rid) = rids.iter().find(|&&rid| rid > *last_rid) {
                            return Some((key.clone(), rid));
                        }
                    }
                    Some((last_key, _)) if key < last_key => continue,
                    _ => {
                        if let Some(&rid) = rids.iter().next() {
                            return Some((key.clone(), rid));
                        }
                    }
                }
            }
        } else {
            for (key, rids) in range.rev() {
                match position {
                    Some((last_key, last_rid)) if key == last_key => {
                        if let Some(&rid) = rids.iter().rev().find(|&&rid| rid < *last_rid) {
                            return Some((key.clone(), rid));
                        }
                    }
                    Some((last_key, _)) if key > last_key => continue,
                    _ => {
                        if let Some(&rid) = rids.iter().next_back() {
                            return Some((key.clone(), rid));
                        }
                    }
                }
            }
        }
        None
    }
}

/// Build an index key for `doc` under `pattern`; `None` when the sparse
/// flag excludes a document with no indexed fields.
#[must_use]
pub fn extract_for_insert(
    descriptor: &IndexDescriptor,
    doc: &Document,
) -> Option<IndexKey> {
    if descriptor.is_sparse() && descriptor.key_pattern().extracts_all_null(doc) {
        return None;
    }
    let key = descriptor.key_pattern().extract(doc);
    match descriptor.access_method() {
        AccessMethod::Hashed => Some(hash_key(&key)),
        _ => Some(key),
    }
}

/// The stored form of a probe key: hashed indexes store the digest, so
/// point lookups must hash the probe the same way.
#[must_use]
pub fn lookup_key(descriptor: &IndexDescriptor, key: IndexKey) -> IndexKey {
    match descriptor.access_method() {
        AccessMethod::Hashed => hash_key(&key),
        _ => key,
    }
}

/// Hashed indexes store a single integer component derived from the
/// extracted key, preserving equality but not order.
fn hash_key(key: &IndexKey) -> IndexKey {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    for value in key.values() {
        format!("{value}").hash(&mut hasher);
    }
    IndexKey::single(Value::Int(hasher.finish() as i64))
}
