//! Core storage engine traits.
//!
//! This module defines the traits the execution core consumes:
//!
//! - [`StorageEngine`] - namespace-keyed record-store lifecycle and
//!   opaque catalog metadata
//! - [`RecordStore`] - versioned record CRUD with capped semantics
//! - [`RecordCursor`] - owned, position-based iteration with
//!   save/restore
//!
//! All traits are object-safe; the core holds engines and stores behind
//! `Arc<dyn ...>` so backends can be swapped without recompiling the
//! catalog or executor.

use std::sync::Arc;

use ferrodb_core::RecordId;

use super::error::StorageError;

/// Direction of a record scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

/// A stored record: its id, payload bytes, and the version stamped by the
/// last write. Versions drive optimistic conflict detection on update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub data: Vec<u8>,
    pub version: u64,
}

/// Physical options fixed at record-store creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStoreOptions {
    /// Fixed-size store with insertion-order eviction.
    pub capped: bool,
    /// Byte budget for a capped store.
    pub capped_size: Option<i64>,
    /// Document budget for a capped store.
    pub capped_max_docs: Option<i64>,
}

/// Result of restoring a saved cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// The cursor is usable again at its logical position.
    pub ok: bool,
    /// The caller must retry the operation that produced the cursor's
    /// current record (e.g. the snapshot moved under a write).
    pub needs_retry: bool,
}

impl RestoreOutcome {
    #[must_use]
    pub const fn ok() -> Self {
        Self { ok: true, needs_retry: false }
    }

    #[must_use]
    pub const fn failed() -> Self {
        Self { ok: false, needs_retry: false }
    }
}

/// A storage engine keyed by namespace.
///
/// Implementations must be thread-safe; the catalog shares one engine
/// across every in-flight operation.
pub trait StorageEngine: Send + Sync {
    /// Create a record store for `ns`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NamespaceExists`] if the namespace is
    /// already in use.
    fn create_record_store(
        &self,
        ns: &str,
        options: RecordStoreOptions,
    ) -> Result<Arc<dyn RecordStore>, StorageError>;

    /// Look up an existing record store.
    fn get_record_store(&self, ns: &str) -> Option<Arc<dyn RecordStore>>;

    /// Drop the record store and its metadata. Outstanding cursors
    /// observe the store as detached and fail to restore.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NamespaceNotFound`] if absent.
    fn drop_record_store(&self, ns: &str) -> Result<(), StorageError>;

    /// Rename a record store, carrying its metadata along.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NamespaceNotFound`] / [`StorageError::NamespaceExists`]
    /// when the source is missing or the target is taken.
    fn rename_record_store(&self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Every namespace with a record store, in unspecified order.
    fn list_namespaces(&self) -> Vec<String>;

    /// Opaque catalog metadata stored alongside the record store.
    fn get_metadata(&self, ns: &str) -> Option<Vec<u8>>;

    /// Store catalog metadata for `ns`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put_metadata(&self, ns: &str, bytes: Vec<u8>) -> Result<(), StorageError>;
}

/// A versioned record container.
pub trait RecordStore: Send + Sync {
    /// Append a record, returning its id.
    ///
    /// Capped stores evict oldest records past their budgets and bump the
    /// insert version observed by tailable readers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot accept the record.
    fn insert(&self, data: Vec<u8>) -> Result<RecordId, StorageError>;

    /// Point lookup by id.
    fn seek_exact(&self, id: RecordId) -> Option<Record>;

    /// Replace a record's payload if its version still matches.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriteConflict`] when `expected_version`
    /// is stale and [`StorageError::RecordNotFound`] when the record is
    /// gone.
    fn update(
        &self,
        id: RecordId,
        data: Vec<u8>,
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Delete a record. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn remove(&self, id: RecordId) -> Result<bool, StorageError>;

    /// Current record count.
    fn num_records(&self) -> usize;

    /// Monotone counter bumped on every insert; tailable cursors compare
    /// it against the value seen at EOF to detect new data.
    fn insert_version(&self) -> u64;

    /// Open a cursor positioned before the first (or after the last)
    /// record.
    fn cursor(&self, direction: ScanDirection) -> Box<dyn RecordCursor>;

    /// Whether this store was created capped.
    fn is_capped(&self) -> bool;

    /// `true` once the store has been dropped from its engine.
    fn is_detached(&self) -> bool;
}

/// Owned, position-based iteration over a record store.
///
/// Cursors remember the last id they returned rather than borrowing
/// into the store, so saving is cheap and restoring re-seeks to the
/// logical position even across concurrent mutation.
pub trait RecordCursor: Send {
    /// Advance and return the next record in the cursor's direction.
    fn next(&mut self) -> Option<Record>;

    /// Position the cursor on `id` and return its record.
    fn seek_exact(&mut self, id: RecordId) -> Option<Record>;

    /// Detach from storage resources ahead of a yield.
    fn save(&mut self);

    /// Reattach after a yield.
    fn restore(&mut self) -> RestoreOutcome;
}
