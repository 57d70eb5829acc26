//! The catalog.
//!
//! Name lookup, stable identity, and lifecycle for databases,
//! collections, and indexes. The catalog exclusively owns
//! [`collection::CollectionDescriptor`]s; executors hold non-owning
//! slots registered with each collection's cursor manager so the
//! catalog can invalidate them on mutation.
//!
//! Structural changes require the owning database's X lock. Collection
//! drops are two-phase while replication is active: phase one renames
//! to a drop-pending namespace and registers with the reaper; phase two
//! reclaims storage once the commit point passes the drop optime.

pub mod capped_notifier;
pub mod collection;
pub mod cursor_manager;
pub mod database;
pub mod drop_pending;
pub mod index;
pub mod index_catalog;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use ferrodb_concurrency::LockMode;
use ferrodb_core::{
    CollectionOptions, CollectionUuid, NamespaceString, OpTime, Timestamp,
};
use ferrodb_storage::{RecordStoreOptions, StorageEngine};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::operation::OperationContext;

use collection::{CollectionDescriptor, CollectionState};
use database::DatabaseCatalog;
use drop_pending::DropPendingReaper;
use index::IndexDescriptor;

/// The catalog payload persisted through the storage engine per
/// collection.
#[derive(Debug, Serialize, Deserialize)]
struct CollectionMetadata {
    uuid: CollectionUuid,
    options: CollectionOptions,
    indexes: Vec<IndexDescriptor>,
}

/// One entry of the node's sharding version map.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionVersion {
    pub uuid: CollectionUuid,
    pub version: Timestamp,
}

/// The process-wide catalog.
pub struct Catalog {
    engine: Arc<dyn StorageEngine>,
    databases: RwLock<HashMap<String, Arc<DatabaseCatalog>>>,
    /// Shared so create-collection rollback hooks can unregister after
    /// the catalog borrow ends.
    uuids: Arc<RwLock<HashMap<CollectionUuid, NamespaceString>>>,
    /// Namespace-to-UUID cache refreshed on every successful lookup.
    ns_uuid_cache: RwLock<HashMap<String, CollectionUuid>>,
    reaper: DropPendingReaper,
    versions: RwLock<HashMap<String, CollectionVersion>>,
    version_counter: AtomicU32,
    replication_active: AtomicBool,
}

impl Catalog {
    #[must_use]
    pub fn new(engine: Arc<dyn StorageEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            databases: RwLock::new(HashMap::new()),
            uuids: Arc::new(RwLock::new(HashMap::new())),
            ns_uuid_cache: RwLock::new(HashMap::new()),
            reaper: DropPendingReaper::new(),
            versions: RwLock::new(HashMap::new()),
            version_counter: AtomicU32::new(1),
            replication_active: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Whether drops must go through the two-phase protocol.
    #[must_use]
    pub fn is_replication_active(&self) -> bool {
        self.replication_active.load(Ordering::SeqCst)
    }

    pub fn set_replication_active(&self, active: bool) {
        self.replication_active.store(active, Ordering::SeqCst);
    }

    #[must_use]
    pub fn reaper(&self) -> &DropPendingReaper {
        &self.reaper
    }

    /// Open (or return) a database, loading every collection descriptor
    /// recorded in storage-engine metadata.
    ///
    /// # Errors
    ///
    /// Propagates interrupt checks and corrupt-metadata failures.
    pub fn open_database(
        &self,
        opctx: &OperationContext,
        name: &str,
    ) -> Result<Arc<DatabaseCatalog>> {
        opctx.check_for_interrupt()?;
        if let Some(db) = self.databases.read().expect("database map poisoned").get(name) {
            return Ok(Arc::clone(db));
        }

        let db = DatabaseCatalog::new(name);
        let prefix = format!("{name}.");
        for ns_str in self.engine.list_namespaces() {
            if !ns_str.starts_with(&prefix) || ns_str.contains('$') {
                continue;
            }
            let ns = NamespaceString::parse(ns_str.clone())?;
            let Some(metadata_bytes) = self.engine.get_metadata(&ns_str) else {
                warn!(ns = %ns_str, "record store has no catalog metadata; skipping");
                continue;
            };
            let metadata: CollectionMetadata = serde_json::from_slice(&metadata_bytes)
                .map_err(|e| {
                    Error::InternalError(format!("corrupt catalog metadata for {ns_str}: {e}"))
                })?;
            let Some(store) = self.engine.get_record_store(&ns_str) else {
                continue;
            };

            let descriptor =
                CollectionDescriptor::new(metadata.uuid, ns.clone(), metadata.options, store);
            let docs = descriptor.all_documents()?;
            for index in metadata.indexes {
                descriptor.index_catalog().create_index(index, &docs)?;
            }

            if let Some(ts) = ns.drop_pending_timestamp() {
                descriptor.set_state(CollectionState::DropPending);
                self.reaper.add_drop_pending(OpTime::new(ts, 0), ns.clone());
            } else {
                descriptor.set_state(CollectionState::Active);
            }
            self.register_uuid(metadata.uuid, &ns)?;
            db.insert_collection(descriptor);
        }

        info!(db = name, collections = db.collection_count(), "database opened");
        self.databases.write().expect("database map poisoned").insert(name.to_string(), Arc::clone(&db));
        Ok(db)
    }

    /// Close a database: kill every open executor, wake every tailable
    /// waiter, and release the descriptors.
    pub fn close_database(&self, name: &str) {
        let Some(db) = self.databases.write().expect("database map poisoned").remove(name) else {
            return;
        };
        let mut uuids = self.uuids.write().expect("uuid map poisoned");
        let mut cache = self.ns_uuid_cache.write().expect("uuid cache poisoned");
        for descriptor in db.list_collections() {
            descriptor.cursor_manager().kill_all("database closed");
            descriptor.capped_notifier().kill();
            uuids.remove(&descriptor.uuid());
            cache.remove(descriptor.ns().as_str());
        }
        info!(db = name, "database closed");
    }

    #[must_use]
    pub fn get_database(&self, name: &str) -> Option<Arc<DatabaseCatalog>> {
        self.databases.read().expect("database map poisoned").get(name).map(Arc::clone)
    }

    /// O(1) lookup across databases by full namespace. Drop-pending and
    /// gone collections do not resolve. A hit refreshes the
    /// namespace-to-UUID cache.
    #[must_use]
    pub fn get_collection(&self, ns: &str) -> Option<Arc<CollectionDescriptor>> {
        let db_name = ns.split('.').next()?;
        let db = self.get_database(db_name)?;
        let descriptor = db.get_collection(ns)?;
        if !descriptor.is_usable() {
            return None;
        }
        self.ns_uuid_cache
            .write()
            .expect("uuid cache poisoned")
            .insert(ns.to_string(), descriptor.uuid());
        Some(descriptor)
    }

    /// The cached UUID for a namespace, if a lookup has seen it.
    #[must_use]
    pub fn cached_uuid(&self, ns: &str) -> Option<CollectionUuid> {
        self.ns_uuid_cache.read().expect("uuid cache poisoned").get(ns).copied()
    }

    /// Resolve a collection by its stable UUID.
    #[must_use]
    pub fn lookup_by_uuid(&self, uuid: CollectionUuid) -> Option<Arc<CollectionDescriptor>> {
        let ns = self.uuids.read().expect("uuid map poisoned").get(&uuid)?.clone();
        let db = self.get_database(ns.db())?;
        db.get_collection(ns.as_str())
    }

    fn register_uuid(&self, uuid: CollectionUuid, ns: &NamespaceString) -> Result<()> {
        let mut uuids = self.uuids.write().expect("uuid map poisoned");
        if let Some(existing) = uuids.get(&uuid) {
            if existing != ns {
                return Err(Error::InternalError(format!(
                    "uuid {uuid} already maps to {existing}"
                )));
            }
        }
        uuids.insert(uuid, ns.clone());
        Ok(())
    }

    fn bump_version(&self, ns: &str, uuid: CollectionUuid) {
        let counter = self.version_counter.fetch_add(1, Ordering::SeqCst);
        self.versions.write().expect("version map poisoned").insert(
            ns.to_string(),
            CollectionVersion { uuid, version: Timestamp::new(counter, 0) },
        );
    }

    /// The node's known collection versions, for the `shardingState`
    /// command.
    #[must_use]
    pub fn collection_versions(&self) -> HashMap<String, CollectionVersion> {
        self.versions.read().expect("version map poisoned").clone()
    }

    fn persist_metadata(&self, descriptor: &CollectionDescriptor) -> Result<()> {
        let metadata = CollectionMetadata {
            uuid: descriptor.uuid(),
            options: descriptor.options(),
            indexes: descriptor
                .index_catalog()
                .list()
                .iter()
                .map(|entry| entry.descriptor().clone())
                .collect(),
        };
        let bytes = serde_json::to_vec(&metadata)
            .map_err(|e| Error::InternalError(format!("failed to encode catalog metadata: {e}")))?;
        self.engine.put_metadata(descriptor.ns().as_str(), bytes)?;
        Ok(())
    }

    /// Create a collection.
    ///
    /// Requires the database X lock. Registers a rollback hook with the
    /// operation's recovery unit when called inside a write unit of
    /// work; on abort the descriptor and the storage entry disappear.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceExists`], [`Error::InvalidNamespace`],
    /// [`Error::DatabaseDropPending`], [`Error::IllegalOperation`]
    /// (views, uncapped oplog), or storage failures.
    pub fn create_collection(
        &self,
        opctx: &mut OperationContext,
        ns: &NamespaceString,
        options: CollectionOptions,
    ) -> Result<Arc<CollectionDescriptor>> {
        opctx.check_for_interrupt()?;
        debug_assert!(
            opctx.locker_ref().is_db_locked_for_mode(ns.db(), LockMode::Exclusive),
            "createCollection requires the database X lock"
        );

        options.validate_for_storage()?;
        if !ns.is_valid_user_length() && !ns.is_drop_pending() {
            return Err(Error::InvalidNamespace(format!(
                "namespace {ns} exceeds the user length limit"
            )));
        }
        if ns.is_oplog() && !options.capped {
            return Err(Error::BadValue("the oplog must be capped".into()));
        }
        if options.is_view() {
            return Err(Error::IllegalOperation(
                "view definitions are handled outside the execution core".into(),
            ));
        }

        let db = self.open_database(opctx, ns.db())?;
        if db.is_drop_pending() {
            return Err(Error::DatabaseDropPending(format!(
                "cannot create {ns} while the database is being dropped"
            )));
        }
        if db.get_collection(ns.as_str()).is_some() {
            return Err(Error::NamespaceExists(ns.as_str().to_string()));
        }

        let uuid = CollectionUuid::generate();
        let store_options = RecordStoreOptions {
            capped: options.capped,
            capped_size: options.capped_size,
            capped_max_docs: options.capped_max_docs,
        };
        let store = self.engine.create_record_store(ns.as_str(), store_options)?;
        let auto_index_id = options.auto_index_id;
        let descriptor = CollectionDescriptor::new(uuid, ns.clone(), options, store);

        db.insert_collection(Arc::clone(&descriptor));
        self.register_uuid(uuid, ns)?;
        self.bump_version(ns.as_str(), uuid);

        if opctx.in_write_unit_of_work() {
            let db = Arc::clone(&db);
            let engine = Arc::clone(&self.engine);
            let uuids = Arc::clone(&self.uuids);
            let rollback_descriptor = Arc::clone(&descriptor);
            let commit_descriptor = Arc::clone(&descriptor);
            let ns_owned = ns.clone();
            opctx.recovery_unit().register_change(
                move || commit_descriptor.set_state(CollectionState::Active),
                move || {
                    rollback_descriptor.set_state(CollectionState::Gone);
                    db.remove_collection(ns_owned.as_str());
                    uuids.write().expect("uuid map poisoned").remove(&rollback_descriptor.uuid());
                    let _ = engine.drop_record_store(ns_owned.as_str());
                },
            );
        } else {
            descriptor.set_state(CollectionState::Active);
        }

        let wants_id_index = !matches!(auto_index_id, ferrodb_core::AutoIndexMode::No)
            && !ns.is_oplog()
            && !ns.is_system_dot_profile();
        if wants_id_index {
            descriptor.index_catalog().create_index(IndexDescriptor::id_index(), &[])?;
        }
        self.persist_metadata(&descriptor)?;

        info!(ns = %ns, %uuid, "collection created");
        Ok(descriptor)
    }

    /// Drop a collection.
    ///
    /// With replication inactive or no drop optime available the drop
    /// is immediate. Otherwise phase one renames to a drop-pending
    /// namespace, drops any index whose renamed namespace would be too
    /// long, and registers with the reaper; storage survives until
    /// [`Catalog::notify_commit_point`] passes the drop optime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] for protected system
    /// collections, profiled `system.profile`, or in-progress index
    /// builds. A missing collection is not an error.
    pub fn drop_collection(
        &self,
        opctx: &mut OperationContext,
        ns: &NamespaceString,
        drop_op_time: OpTime,
    ) -> Result<()> {
        opctx.check_for_interrupt()?;
        debug_assert!(
            opctx.locker_ref().is_db_locked_for_mode(ns.db(), LockMode::Exclusive),
            "dropCollection requires the database X lock"
        );

        let Some(db) = self.get_database(ns.db()) else {
            return Ok(());
        };
        let Some(descriptor) = db.get_collection(ns.as_str()) else {
            return Ok(());
        };

        if ns.is_system() && !ns.is_droppable_system() {
            if ns.is_system_dot_profile() {
                if db.profile_level() != 0 {
                    return Err(Error::IllegalOperation(
                        "turn off profiling before dropping system.profile".into(),
                    ));
                }
            } else {
                return Err(Error::IllegalOperation(format!(
                    "cannot drop system collection {ns}"
                )));
            }
        }
        let builds = descriptor.index_catalog().builds_in_progress();
        if builds != 0 {
            return Err(Error::IllegalOperation(format!(
                "cannot drop {ns} with {builds} index builds in progress"
            )));
        }

        let two_phase = self.is_replication_active() && !drop_op_time.is_null();
        if !two_phase {
            return self.finish_drop(&db, &descriptor, ns);
        }

        // Phase one: shed indexes whose drop-pending namespace would not
        // fit, then rename out of the way.
        let dpns = ns.make_drop_pending(drop_op_time);
        for entry in descriptor.index_catalog().list() {
            let index_ns_len = dpns.len() + 1 + entry.descriptor().name().len();
            if index_ns_len > ferrodb_core::types::namespace::MAX_NS_LEN {
                info!(
                    ns = %ns,
                    index = entry.descriptor().name(),
                    "index namespace too long after drop-pending rename; dropping immediately"
                );
                descriptor.index_catalog().drop_index(entry.descriptor().name())?;
            }
        }

        descriptor.cursor_manager().kill_all("collection dropped");
        descriptor.plan_cache().clear();
        self.engine.rename_record_store(ns.as_str(), dpns.as_str())?;
        db.remove_collection(ns.as_str());
        self.ns_uuid_cache.write().expect("uuid cache poisoned").remove(ns.as_str());
        descriptor.set_ns(dpns.clone());
        descriptor.set_state(CollectionState::DropPending);
        db.insert_collection(Arc::clone(&descriptor));
        self.uuids.write().expect("uuid map poisoned").insert(descriptor.uuid(), dpns.clone());
        self.versions.write().expect("version map poisoned").remove(ns.as_str());
        self.reaper.add_drop_pending(drop_op_time, dpns.clone());

        info!(ns = %ns, dpns = %dpns, op_time = %drop_op_time, "collection renamed to drop-pending");
        Ok(())
    }

    fn finish_drop(
        &self,
        db: &Arc<DatabaseCatalog>,
        descriptor: &Arc<CollectionDescriptor>,
        ns: &NamespaceString,
    ) -> Result<()> {
        descriptor.cursor_manager().kill_all("collection dropped");
        descriptor.capped_notifier().kill();
        descriptor.plan_cache().clear();
        descriptor.index_catalog().drop_all_indexes(true);
        descriptor.set_state(CollectionState::Gone);
        db.remove_collection(ns.as_str());
        self.ns_uuid_cache.write().expect("uuid cache poisoned").remove(ns.as_str());
        self.uuids.write().expect("uuid map poisoned").remove(&descriptor.uuid());
        self.versions.write().expect("version map poisoned").remove(ns.as_str());
        self.engine.drop_record_store(ns.as_str())?;
        info!(ns = %ns, uuid = %descriptor.uuid(), "collection dropped");
        Ok(())
    }

    /// Advance the replication commit point: physically reclaim every
    /// drop-pending collection whose drop optime is now durable.
    pub fn notify_commit_point(&self, commit_point: OpTime) {
        for (op_time, dpns) in self.reaper.take_due(commit_point) {
            debug!(ns = %dpns, op_time = %op_time, "reaping drop-pending collection");
            let Some(db) = self.get_database(dpns.db()) else {
                continue;
            };
            if let Some(descriptor) = db.remove_collection(dpns.as_str()) {
                descriptor.cursor_manager().kill_all("collection dropped");
                descriptor.capped_notifier().kill();
                descriptor.index_catalog().drop_all_indexes(true);
                descriptor.set_state(CollectionState::Gone);
                self.uuids.write().expect("uuid map poisoned").remove(&descriptor.uuid());
            }
            if let Err(err) = self.engine.drop_record_store(dpns.as_str()) {
                warn!(ns = %dpns, %err, "failed to reap drop-pending storage");
            }
        }
    }

    /// Rename a collection within one database. The UUID is preserved;
    /// every open cursor on the source is killed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalOperation`] for cross-database renames,
    /// [`Error::NamespaceNotFound`] / [`Error::NamespaceExists`] for
    /// missing source or occupied target.
    pub fn rename_collection(
        &self,
        opctx: &mut OperationContext,
        from: &NamespaceString,
        to: &NamespaceString,
        stay_temp: bool,
    ) -> Result<()> {
        opctx.check_for_interrupt()?;
        debug_assert!(
            opctx.locker_ref().is_db_locked_for_mode(from.db(), LockMode::Exclusive),
            "renameCollection requires the database X lock"
        );

        if from.db() != to.db() {
            return Err(Error::IllegalOperation(
                "rename across databases is handled by a copy at a higher layer".into(),
            ));
        }
        let db = self
            .get_database(from.db())
            .ok_or_else(|| Error::NamespaceNotFound(from.as_str().to_string()))?;
        if db.get_collection(to.as_str()).is_some() {
            return Err(Error::NamespaceExists(to.as_str().to_string()));
        }
        let Some(descriptor) = db.get_collection(from.as_str()) else {
            return Err(Error::NamespaceNotFound(from.as_str().to_string()));
        };

        descriptor.cursor_manager().kill_all("collection renamed");
        descriptor.plan_cache().clear();
        self.engine.rename_record_store(from.as_str(), to.as_str())?;
        db.remove_collection(from.as_str());
        self.ns_uuid_cache.write().expect("uuid cache poisoned").remove(from.as_str());
        descriptor.set_ns(to.clone());
        if !stay_temp {
            descriptor.clear_temp();
        }
        db.insert_collection(Arc::clone(&descriptor));
        self.uuids.write().expect("uuid map poisoned").insert(descriptor.uuid(), to.clone());
        self.versions.write().expect("version map poisoned").remove(from.as_str());
        self.bump_version(to.as_str(), descriptor.uuid());
        self.persist_metadata(&descriptor)?;

        info!(from = %from, to = %to, uuid = %descriptor.uuid(), "collection renamed");
        Ok(())
    }

    /// Create an index on a collection, backfilling and persisting the
    /// new metadata. Requires the collection X lock.
    ///
    /// # Errors
    ///
    /// See [`index_catalog::IndexCatalog::create_index`].
    pub fn create_index(
        &self,
        opctx: &mut OperationContext,
        ns: &NamespaceString,
        descriptor_spec: IndexDescriptor,
    ) -> Result<()> {
        opctx.check_for_interrupt()?;
        debug_assert!(
            opctx
                .locker_ref()
                .is_collection_locked_for_mode(ns.as_str(), LockMode::Exclusive),
            "createIndexes requires the collection X lock"
        );
        let descriptor = self
            .get_collection(ns.as_str())
            .ok_or_else(|| Error::NamespaceNotFound(ns.as_str().to_string()))?;
        descriptor.create_index(descriptor_spec)?;
        self.persist_metadata(&descriptor)
    }

    /// Drop a named index. Requires the collection X lock.
    ///
    /// # Errors
    ///
    /// See [`index_catalog::IndexCatalog::drop_index`].
    pub fn drop_index(
        &self,
        opctx: &mut OperationContext,
        ns: &NamespaceString,
        index_name: &str,
    ) -> Result<()> {
        opctx.check_for_interrupt()?;
        debug_assert!(
            opctx
                .locker_ref()
                .is_collection_locked_for_mode(ns.as_str(), LockMode::Exclusive),
            "dropIndexes requires the collection X lock"
        );
        let descriptor = self
            .get_collection(ns.as_str())
            .ok_or_else(|| Error::NamespaceNotFound(ns.as_str().to_string()))?;
        descriptor.drop_index(index_name)?;
        descriptor.cursor_manager().kill_all("index dropped");
        self.persist_metadata(&descriptor)
    }
}
