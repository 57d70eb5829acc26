//! FerroDB Storage
//!
//! The narrow interface through which the execution core consults the
//! storage engine, together with an in-memory reference backend and the
//! persisted engine-metadata file.
//!
//! The core never sees a storage engine's physical layout: it creates and
//! drops [`RecordStore`]s by namespace, reads and writes opaque metadata
//! blobs, iterates records through owned [`RecordCursor`]s, and brackets
//! writes with a [`RecoveryUnit`] whose registered changes fire exactly
//! one of their commit/rollback hooks.

pub mod backends;
pub mod engine;
pub mod metadata;
pub mod recovery;

pub use backends::memory::MemoryEngine;
pub use engine::error::StorageError;
pub use engine::traits::{
    Record, RecordCursor, RecordStore, RecordStoreOptions, RestoreOutcome, ScanDirection,
    StorageEngine,
};
pub use metadata::StorageEngineMetadata;
pub use recovery::RecoveryUnit;
