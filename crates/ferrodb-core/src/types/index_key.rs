//! Index key patterns and extracted keys.

use serde::{Deserialize, Serialize};

use super::document::{Document, Value};

/// Direction of one component of a key pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// The `1` / `-1` convention used in key-pattern documents.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }

    /// Parse the `1` / `-1` convention.
    #[must_use]
    pub const fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::Ascending),
            -1 => Some(Self::Descending),
            _ => None,
        }
    }
}

/// An ordered field → direction mapping, e.g. `{a: 1, b: -1}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPattern {
    fields: Vec<(String, SortDirection)>,
}

impl KeyPattern {
    /// Build a pattern from `(field, direction)` pairs.
    #[must_use]
    pub fn new(fields: Vec<(String, SortDirection)>) -> Self {
        Self { fields }
    }

    /// Shorthand for a single ascending field.
    #[must_use]
    pub fn ascending(field: impl Into<String>) -> Self {
        Self { fields: vec![(field.into(), SortDirection::Ascending)] }
    }

    /// The standard `{_id: 1}` pattern.
    #[must_use]
    pub fn id_index() -> Self {
        Self::ascending("_id")
    }

    /// Parse from a key-pattern document like `{a: 1, b: -1}`.
    #[must_use]
    pub fn from_document(doc: &Document) -> Option<Self> {
        let mut fields = Vec::with_capacity(doc.len());
        for (name, value) in doc.iter() {
            let dir = SortDirection::from_i64(value.as_i64()?)?;
            fields.push((name.to_string(), dir));
        }
        if fields.is_empty() {
            return None;
        }
        Some(Self { fields })
    }

    /// Render back to the document convention.
    #[must_use]
    pub fn to_document(&self) -> Document {
        self.fields.iter().fold(Document::new(), |doc, (name, dir)| {
            doc.with_field(name.clone(), dir.as_i64())
        })
    }

    /// The pattern's fields in order.
    #[must_use]
    pub fn fields(&self) -> &[(String, SortDirection)] {
        &self.fields
    }

    /// The first field name, which drives prefix applicability.
    #[must_use]
    pub fn leading_field(&self) -> &str {
        &self.fields[0].0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Extract the index key for `doc` under this pattern. Missing fields
    /// extract as null, which is how sparse-index filtering recognizes
    /// absent values.
    #[must_use]
    pub fn extract(&self, doc: &Document) -> IndexKey {
        let values = self
            .fields
            .iter()
            .map(|(name, _)| doc.get_path(name).cloned().unwrap_or(Value::Null))
            .collect();
        IndexKey::new(values)
    }

    /// Whether every extracted component would be null (sparse indexes
    /// skip such documents).
    #[must_use]
    pub fn extracts_all_null(&self, doc: &Document) -> bool {
        self.fields.iter().all(|(name, _)| doc.get_path(name).is_none())
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_document())
    }
}

/// A key extracted from a document under some [`KeyPattern`].
///
/// Ordering is component-wise over the [`Value`] total order; descending
/// components are handled at scan time by iterating the interval in
/// reverse, so the stored key is always in pattern field order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexKey(Vec<Value>);

impl IndexKey {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Single-component key.
    #[must_use]
    pub fn single(value: Value) -> Self {
        Self(vec![value])
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Reassemble a document `{field: value, ...}` for RID_AND_IDX
    /// working-set members.
    #[must_use]
    pub fn to_document(&self, pattern: &KeyPattern) -> Document {
        pattern
            .fields()
            .iter()
            .zip(&self.0)
            .fold(Document::new(), |doc, ((name, _), value)| {
                doc.with_field(name.clone(), value.clone())
            })
    }
}
