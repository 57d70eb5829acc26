//! Collection options.
//!
//! Options are parsed from and rendered to JSON documents with the
//! round-trip guarantee that parsing the rendered form of any valid
//! options yields the same value after default population.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::document::Document;

/// Whether the `_id` index is created automatically with a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoIndexMode {
    /// Yes for ordinary collections, no for some system namespaces.
    #[default]
    Default,
    Yes,
    No,
}

/// Collation selector stored on collections and indexes.
///
/// Comparison semantics beyond binary order are supplied by an external
/// collator; the catalog only stores and propagates the selector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollationSpec {
    /// ICU-style locale tag; "simple" selects binary comparison.
    pub locale: String,
}

impl CollationSpec {
    #[must_use]
    pub fn simple() -> Self {
        Self { locale: "simple".to_string() }
    }

    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.locale.is_empty() || self.locale == "simple"
    }
}

/// Defaults applied to indexes created on the collection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexOptionDefaults {
    /// Engine-specific configuration passed through to index builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_engine: Option<Document>,
}

/// Options supplied at collection creation and persisted with the
/// catalog entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionOptions {
    /// Fixed-size collection with insertion-order eviction.
    pub capped: bool,

    /// Maximum total document bytes for a capped collection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capped_size: Option<i64>,

    /// Maximum document count for a capped collection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capped_max_docs: Option<i64>,

    /// Dropped on clean shutdown.
    pub temp: bool,

    /// `_id` index provisioning mode.
    pub auto_index_id: AutoIndexMode,

    /// Filter documents must satisfy to be inserted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<Document>,

    /// Default collation for the collection and its indexes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collation: Option<CollationSpec>,

    /// Defaults applied to new indexes.
    #[serde(skip_serializing_if = "IndexOptionDefaults::is_default")]
    pub index_option_defaults: IndexOptionDefaults,

    /// Source namespace when this entry defines a view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_on: Option<String>,

    /// Aggregation pipeline applied by the view.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pipeline: Vec<Document>,
}

impl IndexOptionDefaults {
    fn is_default(&self) -> bool {
        self.storage_engine.is_none()
    }
}

impl CollectionOptions {
    /// Options for a capped collection of the given byte size.
    #[must_use]
    pub fn capped(size: i64) -> Self {
        Self { capped: true, capped_size: Some(size), ..Self::default() }
    }

    /// Returns `true` if this entry defines a view rather than a
    /// collection.
    #[must_use]
    pub fn is_view(&self) -> bool {
        self.view_on.is_some()
    }

    /// Validate the combination of options before they reach storage.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadValue`] for inconsistent combinations:
    /// capped without a positive size, capped limits on an uncapped
    /// collection, a pipeline without a view source, or out-of-range
    /// bounds.
    pub fn validate_for_storage(&self) -> Result<(), CoreError> {
        if self.capped {
            match self.capped_size {
                Some(size) if size > 0 => {}
                _ => {
                    return Err(CoreError::BadValue(
                        "capped collections require a positive size".to_string(),
                    ))
                }
            }
            if let Some(max) = self.capped_max_docs {
                if max <= 0 {
                    return Err(CoreError::BadValue(
                        "capped max document count must be positive".to_string(),
                    ));
                }
            }
        } else if self.capped_size.is_some() || self.capped_max_docs.is_some() {
            return Err(CoreError::BadValue(
                "size and max are only allowed on capped collections".to_string(),
            ));
        }

        if !self.pipeline.is_empty() && self.view_on.is_none() {
            return Err(CoreError::BadValue("pipeline requires viewOn".to_string()));
        }
        if self.is_view() && self.capped {
            return Err(CoreError::BadValue("views cannot be capped".to_string()));
        }
        Ok(())
    }

    /// Parse from a JSON document, applying defaults for absent fields.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FailedToParse`] on malformed input.
    pub fn parse_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(json.clone()).map_err(|e| CoreError::FailedToParse(e.to_string()))
    }

    /// Render to a JSON document that [`Self::parse_json`] round-trips.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
