//! FerroDB execution core.
//!
//! The substrate a document database server runs on: the catalog that
//! names collections and indexes, the hierarchical lock manager that
//! serializes access to them, and the pull-based plan executor that
//! drives read and write stages against the storage engine.
//!
//! An operation's life: construct an [`OperationContext`] (one locker,
//! one recovery unit), acquire a global ticket and lock, descend
//! through database and collection locks, resolve the collection
//! through the [`Catalog`], build a stage tree, and iterate it with a
//! [`PlanExecutor`], which yields locks back periodically and retries
//! write conflicts after backoff.
//!
//! # Example
//!
//! ```
//! use ferrodb::{ServerEnv, QueryRequest};
//! use ferrodb::exec::build_find_executor;
//! use ferrodb_core::{Document, NamespaceString};
//!
//! let env = ServerEnv::in_memory();
//! let mut opctx = env.new_operation();
//!
//! let ns = NamespaceString::parse("app.users").unwrap();
//! ferrodb::operation::with_write_unit_of_work(&mut opctx, |opctx| {
//!     opctx.locker().lock_global(ferrodb_concurrency::LockMode::IntentExclusive)?;
//!     opctx.locker().lock(
//!         ferrodb_concurrency::ResourceId::for_database("app"),
//!         ferrodb_concurrency::LockMode::Exclusive,
//!         None,
//!         false,
//!     )?;
//!     let coll = env.catalog.create_collection(opctx, &ns, Default::default())?;
//!     coll.insert_document(opctx, &Document::new().with_field("_id", 1i64))?;
//!     Ok(())
//! }).unwrap();
//! opctx.locker().unlock_global();
//!
//! let coll = env.catalog.get_collection("app.users").unwrap();
//! let mut exec = build_find_executor(&mut opctx, &coll, QueryRequest::default()).unwrap();
//! let produced = exec.execute_plan(&mut opctx).unwrap();
//! assert_eq!(produced, 1);
//! ```

pub mod catalog;
pub mod commands;
pub mod error;
pub mod exec;
pub mod operation;

use std::path::Path;
use std::sync::Arc;

use ferrodb_concurrency::ConcurrencyContext;
use ferrodb_storage::{MemoryEngine, StorageEngine, StorageEngineMetadata};

pub use catalog::collection::{CollectionDescriptor, CollectionState};
pub use catalog::database::DatabaseCatalog;
pub use catalog::index::{AccessMethod, IndexDescriptor};
pub use catalog::Catalog;
pub use error::{Error, Result};
pub use exec::{
    build_delete_executor, build_find_executor, build_update_executor, ExecResult, PlanExecutor,
    ProjectionSpec, QueryRequest, UpdateSpec,
};
pub use operation::{ClientDescriptor, OperationContext, OperationRegistry};

/// The long-lived collaborators an operation is constructed over.
///
/// A convenience bundle for embedding and tests; the components are
/// ordinary values that callers may also wire up individually.
pub struct ServerEnv {
    pub concurrency: Arc<ConcurrencyContext>,
    pub catalog: Arc<Catalog>,
    pub registry: Arc<OperationRegistry>,
}

impl std::fmt::Debug for ServerEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerEnv").finish_non_exhaustive()
    }
}

impl ServerEnv {
    /// A fresh environment over the in-memory engine.
    #[must_use]
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            concurrency: ConcurrencyContext::new(),
            catalog: Catalog::new(Arc::new(MemoryEngine::new())),
            registry: OperationRegistry::new(),
        })
    }

    /// Open an environment over a data directory, enforcing the
    /// persisted-metadata exit conditions: a recorded engine name that
    /// differs from `engine_name` refuses startup, and a missing
    /// metadata file is written for the next boot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InternalError`] on engine mismatch or a corrupt
    /// metadata file.
    pub fn open(
        dbpath: &Path,
        engine_name: &str,
        engine: Arc<dyn StorageEngine>,
    ) -> Result<Arc<Self>> {
        match StorageEngineMetadata::for_path(dbpath)? {
            Some(metadata) => metadata.validate_engine(engine_name)?,
            None => StorageEngineMetadata::new(dbpath, engine_name).write()?,
        }
        Ok(Arc::new(Self {
            concurrency: ConcurrencyContext::new(),
            catalog: Catalog::new(engine),
            registry: OperationRegistry::new(),
        }))
    }

    /// Construct an operation context over this environment.
    #[must_use]
    pub fn new_operation(&self) -> OperationContext {
        OperationContext::new(Arc::clone(&self.concurrency))
    }

    /// Construct an operation context with a client identity visible to
    /// `lockInfo`.
    #[must_use]
    pub fn new_operation_for_client(&self, client: ClientDescriptor) -> OperationContext {
        OperationContext::with_client(
            Arc::clone(&self.concurrency),
            Arc::clone(&self.registry),
            client,
        )
    }
}
