//! Collection descriptors.
//!
//! A descriptor is the in-memory identity of one collection: its UUID,
//! current namespace, options, index catalog, executor registry, and
//! capped-insert notifier. The catalog exclusively owns descriptors;
//! executors and stages hold shared references and are invalidated
//! through the cursor manager before a descriptor is retired.

use std::sync::{Arc, Mutex, RwLock};

use ferrodb_core::{
    CollectionOptions, CollectionUuid, Document, NamespaceString, RecordId, Value,
};
use ferrodb_storage::RecordStore;
use tracing::debug;

use crate::error::{Error, Result};
use crate::exec::expression::Expression;
use crate::exec::plan_cache::PlanCache;
use crate::operation::OperationContext;

use super::capped_notifier::CappedInsertNotifier;
use super::cursor_manager::CursorManager;
use super::index::IndexDescriptor;
use super::index_catalog::IndexCatalog;

/// The externally visible lifecycle of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    /// Created inside a still-open write unit of work.
    Creating,
    Active,
    /// Renamed to a drop-pending namespace; storage not yet reclaimed.
    DropPending,
    Gone,
}

/// One collection's catalog entry.
pub struct CollectionDescriptor {
    uuid: CollectionUuid,
    ns: RwLock<NamespaceString>,
    options: RwLock<CollectionOptions>,
    record_store: Arc<dyn RecordStore>,
    index_catalog: IndexCatalog,
    cursor_manager: CursorManager,
    capped_notifier: Arc<CappedInsertNotifier>,
    plan_cache: PlanCache,
    state: Mutex<CollectionState>,
}

impl CollectionDescriptor {
    #[must_use]
    pub fn new(
        uuid: CollectionUuid,
        ns: NamespaceString,
        options: CollectionOptions,
        record_store: Arc<dyn RecordStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            ns: RwLock::new(ns),
            options: RwLock::new(options),
            record_store,
            index_catalog: IndexCatalog::new(),
            cursor_manager: CursorManager::new(),
            capped_notifier: Arc::new(CappedInsertNotifier::new()),
            plan_cache: PlanCache::new(),
            state: Mutex::new(CollectionState::Creating),
        })
    }

    #[must_use]
    pub fn uuid(&self) -> CollectionUuid {
        self.uuid
    }

    #[must_use]
    pub fn ns(&self) -> NamespaceString {
        self.ns.read().expect("descriptor poisoned").clone()
    }

    /// Swap the namespace during a rename; UUID is untouched.
    pub fn set_ns(&self, ns: NamespaceString) {
        *self.ns.write().expect("descriptor poisoned") = ns;
    }

    #[must_use]
    pub fn options(&self) -> CollectionOptions {
        self.options.read().expect("descriptor poisoned").clone()
    }

    /// Clear the temp flag, used when a rename keeps the target.
    pub fn clear_temp(&self) {
        self.options.write().expect("descriptor poisoned").temp = false;
    }

    #[must_use]
    pub fn is_capped(&self) -> bool {
        self.record_store.is_capped()
    }

    #[must_use]
    pub fn record_store(&self) -> &Arc<dyn RecordStore> {
        &self.record_store
    }

    #[must_use]
    pub fn index_catalog(&self) -> &IndexCatalog {
        &self.index_catalog
    }

    #[must_use]
    pub fn cursor_manager(&self) -> &CursorManager {
        &self.cursor_manager
    }

    #[must_use]
    pub fn capped_notifier(&self) -> Arc<CappedInsertNotifier> {
        Arc::clone(&self.capped_notifier)
    }

    #[must_use]
    pub fn plan_cache(&self) -> &PlanCache {
        &self.plan_cache
    }

    #[must_use]
    pub fn state(&self) -> CollectionState {
        *self.state.lock().expect("descriptor poisoned")
    }

    pub fn set_state(&self, state: CollectionState) {
        *self.state.lock().expect("descriptor poisoned") = state;
    }

    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self.state(), CollectionState::Creating | CollectionState::Active)
    }

    #[must_use]
    pub fn num_records(&self) -> usize {
        self.record_store.num_records()
    }

    /// Decode a stored record payload. Payloads are self-describing
    /// JSON bytes, so documents with arbitrary field shapes round-trip
    /// without a schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InternalError`] on a corrupt payload.
    pub fn decode_document(bytes: &[u8]) -> Result<Document> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::InternalError(format!("corrupt document payload: {e}")))
    }

    fn encode_document(doc: &Document) -> Result<Vec<u8>> {
        serde_json::to_vec(doc)
            .map_err(|e| Error::InternalError(format!("failed to encode document: {e}")))
    }

    /// Point-read a document with its storage version.
    #[must_use]
    pub fn find_document(&self, rid: RecordId) -> Option<(Document, u64)> {
        let record = self.record_store.seek_exact(rid)?;
        Self::decode_document(&record.data).ok().map(|doc| (doc, record.version))
    }

    fn check_validator(&self, doc: &Document) -> Result<()> {
        let validator = self.options.read().expect("descriptor poisoned").validator.clone();
        if let Some(spec) = validator {
            let expr = Expression::parse(&spec)?;
            if !expr.matches(doc) {
                return Err(Error::BadValue("document failed collection validation".into()));
            }
        }
        Ok(())
    }

    /// Insert a document, maintaining every ready index and waking
    /// tailable readers on capped stores. Registers a rollback hook
    /// that undoes the insert if the enclosing unit of work aborts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateKey`] on unique violations,
    /// [`Error::BadValue`] on validator failure, or a storage error.
    pub fn insert_document(
        &self,
        opctx: &mut OperationContext,
        doc: &Document,
    ) -> Result<RecordId> {
        self.check_validator(doc)?;
        self.index_catalog.check_unique(doc, RecordId::null())?;

        let bytes = Self::encode_document(doc)?;
        let rid = self.record_store.insert(bytes)?;
        self.index_catalog.on_insert(doc, rid);

        if opctx.in_write_unit_of_work() {
            let store = Arc::clone(&self.record_store);
            let rollback_doc = doc.clone();
            let indexes = self.index_catalog.list();
            opctx.recovery_unit().register_change(
                || {},
                move || {
                    let _ = store.remove(rid);
                    for entry in &indexes {
                        if entry.covers_document(&rollback_doc) {
                            if let Some(key) =
                                super::index::extract_for_insert(entry.descriptor(), &rollback_doc)
                            {
                                entry.store().remove(&key, rid);
                            }
                        }
                    }
                },
            );
        }

        if self.is_capped() {
            self.capped_notifier.notify_all();
        }
        Ok(rid)
    }

    /// Replace a document if its storage version is still current.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteConflict`] when a concurrent writer got
    /// there first; the executor retries after a yield.
    pub fn update_document(
        &self,
        _opctx: &mut OperationContext,
        rid: RecordId,
        expected_version: u64,
        new_doc: &Document,
    ) -> Result<u64> {
        self.check_validator(new_doc)?;
        self.index_catalog.check_unique(new_doc, rid)?;

        let Some((old_doc, _)) = self.find_document(rid) else {
            return Err(Error::WriteConflict(format!("{rid} vanished before update")));
        };
        let bytes = Self::encode_document(new_doc)?;
        let new_version = self.record_store.update(rid, bytes, expected_version)?;
        self.index_catalog.on_update(&old_doc, new_doc, rid);
        Ok(new_version)
    }

    /// Delete a document, maintain indexes, and invalidate buffered
    /// references in every registered executor.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the removal fails.
    pub fn delete_document(&self, _opctx: &mut OperationContext, rid: RecordId) -> Result<bool> {
        let Some((doc, _)) = self.find_document(rid) else {
            return Ok(false);
        };
        self.record_store.remove(rid)?;
        self.index_catalog.on_delete(&doc, rid);
        self.cursor_manager.invalidate_record(rid);
        Ok(true)
    }

    /// Create an index on this collection, backfilling from the current
    /// contents. Clears the plan cache.
    ///
    /// # Errors
    ///
    /// See [`IndexCatalog::create_index`].
    pub fn create_index(&self, descriptor: IndexDescriptor) -> Result<()> {
        let ns = self.ns();
        NamespaceString::parse(descriptor.index_namespace(ns.as_str()))
            .map_err(|e| Error::InvalidNamespace(e.to_string()))?;

        let docs = self.all_documents()?;
        self.index_catalog.create_index(descriptor, &docs)?;
        self.plan_cache.clear();
        debug!(ns = %ns, "index created");
        Ok(())
    }

    /// Drop a named index. Clears the plan cache.
    ///
    /// # Errors
    ///
    /// See [`IndexCatalog::drop_index`].
    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.index_catalog.drop_index(name)?;
        self.plan_cache.clear();
        Ok(())
    }

    /// Every (record id, document) pair, in record-id order. Index
    /// backfill and tests use this; queries go through the executor.
    pub fn all_documents(&self) -> Result<Vec<(RecordId, Document)>> {
        let mut cursor = self.record_store.cursor(ferrodb_storage::ScanDirection::Forward);
        let mut docs = Vec::new();
        while let Some(record) = cursor.next() {
            docs.push((record.id, Self::decode_document(&record.data)?));
        }
        Ok(docs)
    }

    /// Look up a document by its `_id` through the id index.
    #[must_use]
    pub fn find_by_id(&self, id: &Value) -> Option<(RecordId, Document)> {
        let id_index = self.index_catalog.id_index()?;
        let key = ferrodb_core::IndexKey::single(id.clone());
        let rid = id_index.store().lookup(&key).into_iter().next()?;
        self.find_document(rid).map(|(doc, _)| (rid, doc))
    }
}

impl std::fmt::Debug for CollectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionDescriptor")
            .field("uuid", &self.uuid)
            .field("ns", &self.ns().as_str())
            .field("state", &self.state())
            .field("indexes", &self.index_catalog.index_count())
            .finish()
    }
}
