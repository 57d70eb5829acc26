//! The per-collection index catalog.
//!
//! Owns every ready index on one collection and keeps the index stores
//! in step with the collection's write paths. The `_id` index is
//! special-cased: it is created with the collection, is always unique,
//! and can only be dropped together with the collection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use ferrodb_core::{Document, KeyPattern, RecordId};
use tracing::debug;

use crate::error::{Error, Result};
use crate::exec::expression::Expression;

use super::index::{extract_for_insert, IndexDescriptor, IndexStore};

/// One ready index: its descriptor, its key container, and the parsed
/// partial filter, if any.
#[derive(Debug)]
pub struct IndexEntry {
    descriptor: IndexDescriptor,
    store: IndexStore,
    partial_filter: Option<Expression>,
}

impl IndexEntry {
    #[must_use]
    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Whether `doc` belongs in this index at all.
    #[must_use]
    pub fn covers_document(&self, doc: &Document) -> bool {
        self.partial_filter.as_ref().map_or(true, |filter| filter.matches(doc))
    }
}

/// The set of indexes on one collection.
#[derive(Default)]
pub struct IndexCatalog {
    ready: RwLock<Vec<Arc<IndexEntry>>>,
    builds_in_progress: AtomicUsize,
}

impl IndexCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index and backfill it from `existing_docs`.
    ///
    /// Re-declaring an identical index is a no-op returning the existing
    /// entry; the same name with a different pattern is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] on a conflicting name,
    /// [`Error::DuplicateKey`] when backfill violates uniqueness, or a
    /// validation error from the descriptor.
    pub fn create_index(
        &self,
        descriptor: IndexDescriptor,
        existing_docs: &[(RecordId, Document)],
    ) -> Result<Arc<IndexEntry>> {
        descriptor.validate()?;

        let partial_filter = match descriptor.partial_filter() {
            Some(spec) => Some(Expression::parse(spec)?),
            None => None,
        };

        {
            let ready = self.ready.read().expect("index catalog poisoned");
            if let Some(existing) =
                ready.iter().find(|entry| entry.descriptor.name() == descriptor.name())
            {
                if existing.descriptor == descriptor {
                    return Ok(Arc::clone(existing));
                }
                return Err(Error::IllegalOperation(format!(
                    "an index named {} already exists with a different definition",
                    descriptor.name()
                )));
            }
        }

        self.builds_in_progress.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(IndexEntry { descriptor, store: IndexStore::new(), partial_filter });
        let backfill = (|| -> Result<()> {
            for (rid, doc) in existing_docs {
                if !entry.covers_document(doc) {
                    continue;
                }
                let Some(key) = extract_for_insert(&entry.descriptor, doc) else {
                    continue;
                };
                if entry.descriptor.is_unique() && entry.store.conflicts_with(&key, *rid) {
                    return Err(Error::DuplicateKey {
                        index: entry.descriptor.name().to_string(),
                        key: format!("{key:?}"),
                    });
                }
                entry.store.insert(key, *rid);
            }
            Ok(())
        })();
        self.builds_in_progress.fetch_sub(1, Ordering::SeqCst);
        backfill?;

        debug!(index = entry.descriptor.name(), "index ready");
        self.ready.write().expect("index catalog poisoned").push(Arc::clone(&entry));
        Ok(entry)
    }

    /// Drop a non-id index by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexNotFound`] for unknown names and
    /// [`Error::IllegalOperation`] for the id index.
    pub fn drop_index(&self, name: &str) -> Result<()> {
        let mut ready = self.ready.write().expect("index catalog poisoned");
        let Some(pos) = ready.iter().position(|entry| entry.descriptor.name() == name) else {
            return Err(Error::IndexNotFound(name.to_string()));
        };
        if ready[pos].descriptor.is_id_index() {
            return Err(Error::IllegalOperation("cannot drop the _id index".into()));
        }
        ready.remove(pos);
        Ok(())
    }

    /// Drop every index; `include_id` is set when the collection itself
    /// is going away.
    pub fn drop_all_indexes(&self, include_id: bool) {
        let mut ready = self.ready.write().expect("index catalog poisoned");
        if include_id {
            ready.clear();
        } else {
            ready.retain(|entry| entry.descriptor.is_id_index());
        }
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Arc<IndexEntry>> {
        let ready = self.ready.read().expect("index catalog poisoned");
        ready.iter().find(|entry| entry.descriptor.name() == name).map(Arc::clone)
    }

    #[must_use]
    pub fn find_by_key_pattern(&self, pattern: &KeyPattern) -> Option<Arc<IndexEntry>> {
        let ready = self.ready.read().expect("index catalog poisoned");
        ready.iter().find(|entry| entry.descriptor.key_pattern() == pattern).map(Arc::clone)
    }

    #[must_use]
    pub fn id_index(&self) -> Option<Arc<IndexEntry>> {
        self.find_by_name("_id_")
    }

    /// Every ready index, in creation order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<IndexEntry>> {
        self.ready.read().expect("index catalog poisoned").clone()
    }

    #[must_use]
    pub fn index_count(&self) -> usize {
        self.ready.read().expect("index catalog poisoned").len()
    }

    #[must_use]
    pub fn builds_in_progress(&self) -> usize {
        self.builds_in_progress.load(Ordering::SeqCst)
    }

    /// Reject a document that would violate a unique index before any
    /// store mutation happens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateKey`] naming the offending index.
    pub fn check_unique(&self, doc: &Document, rid: RecordId) -> Result<()> {
        let ready = self.ready.read().expect("index catalog poisoned");
        for entry in ready.iter().filter(|e| e.descriptor.is_unique()) {
            if !entry.covers_document(doc) {
                continue;
            }
            if let Some(key) = extract_for_insert(&entry.descriptor, doc) {
                if entry.store.conflicts_with(&key, rid) {
                    return Err(Error::DuplicateKey {
                        index: entry.descriptor.name().to_string(),
                        key: format!("{key:?}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Maintain every index for a fresh insert.
    pub fn on_insert(&self, doc: &Document, rid: RecordId) {
        let ready = self.ready.read().expect("index catalog poisoned");
        for entry in ready.iter() {
            if !entry.covers_document(doc) {
                continue;
            }
            if let Some(key) = extract_for_insert(&entry.descriptor, doc) {
                entry.store.insert(key, rid);
            }
        }
    }

    /// Maintain every index for an in-place update.
    pub fn on_update(&self, old_doc: &Document, new_doc: &Document, rid: RecordId) {
        let ready = self.ready.read().expect("index catalog poisoned");
        for entry in ready.iter() {
            let old_key = entry
                .covers_document(old_doc)
                .then(|| extract_for_insert(&entry.descriptor, old_doc))
                .flatten();
            let new_key = entry
                .covers_document(new_doc)
                .then(|| extract_for_insert(&entry.descriptor, new_doc))
                .flatten();
            if old_key == new_key {
                continue;
            }
            if let Some(key) = old_key {
                entry.store.remove(&key, rid);
            }
            if let Some(key) = new_key {
                entry.store.insert(key, rid);
            }
        }
    }

    /// Maintain every index for a delete.
    pub fn on_delete(&self, doc: &Document, rid: RecordId) {
        let ready = self.ready.read().expect("index catalog poisoned");
        for entry in ready.iter() {
            if !entry.covers_document(doc) {
                continue;
            }
            if let Some(key) = extract_for_insert(&entry.descriptor, doc) {
                entry.store.remove(&key, rid);
            }
        }
    }
}
