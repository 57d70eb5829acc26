//! In-memory storage backend.
//!
//! The reference backend: `BTreeMap`-backed record stores with
//! per-record versions for optimistic conflict detection, capped
//! eviction, and a namespace-keyed metadata table. Every test in the
//! workspace runs against this engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use ferrodb_core::RecordId;

use crate::engine::error::StorageError;
use crate::engine::traits::{
    Record, RecordCursor, RecordStore, RecordStoreOptions, RestoreOutcome, ScanDirection,
    StorageEngine,
};

/// In-memory storage engine.
#[derive(Default)]
pub struct MemoryEngine {
    stores: RwLock<HashMap<String, Arc<MemoryRecordStore>>>,
    metadata: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for MemoryEngine {
    fn create_record_store(
        &self,
        ns: &str,
        options: RecordStoreOptions,
    ) -> Result<Arc<dyn RecordStore>, StorageError> {
        let mut stores = self.stores.write().expect("store map poisoned");
        if stores.contains_key(ns) {
            return Err(StorageError::NamespaceExists(ns.to_string()));
        }
        let store = Arc::new(MemoryRecordStore::new(options));
        stores.insert(ns.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn get_record_store(&self, ns: &str) -> Option<Arc<dyn RecordStore>> {
        let stores = self.stores.read().expect("store map poisoned");
        stores.get(ns).map(|s| Arc::clone(s) as Arc<dyn RecordStore>)
    }

    fn drop_record_store(&self, ns: &str) -> Result<(), StorageError> {
        let store = {
            let mut stores = self.stores.write().expect("store map poisoned");
            stores.remove(ns).ok_or_else(|| StorageError::NamespaceNotFound(ns.to_string()))?
        };
        store.shared.detached.store(true, Ordering::SeqCst);
        self.metadata.write().expect("metadata poisoned").remove(ns);
        Ok(())
    }

    fn rename_record_store(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let mut stores = self.stores.write().expect("store map poisoned");
        if stores.contains_key(to) {
            return Err(StorageError::NamespaceExists(to.to_string()));
        }
        let store =
            stores.remove(from).ok_or_else(|| StorageError::NamespaceNotFound(from.to_string()))?;
        stores.insert(to.to_string(), store);
        drop(stores);

        let mut metadata = self.metadata.write().expect("metadata poisoned");
        if let Some(bytes) = metadata.remove(from) {
            metadata.insert(to.to_string(), bytes);
        }
        Ok(())
    }

    fn list_namespaces(&self) -> Vec<String> {
        self.stores.read().expect("store map poisoned").keys().cloned().collect()
    }

    fn get_metadata(&self, ns: &str) -> Option<Vec<u8>> {
        self.metadata.read().expect("metadata poisoned").get(ns).cloned()
    }

    fn put_metadata(&self, ns: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.metadata.write().expect("metadata poisoned").insert(ns.to_string(), bytes);
        Ok(())
    }
}

struct StoreInner {
    records: BTreeMap<i64, (Vec<u8>, u64)>,
    total_bytes: i64,
}

struct StoreShared {
    inner: RwLock<StoreInner>,
    options: RecordStoreOptions,
    next_id: AtomicI64,
    next_version: AtomicU64,
    insert_counter: AtomicU64,
    detached: AtomicBool,
}

impl StoreShared {
    fn evict_capped(&self, inner: &mut StoreInner) {
        if !self.options.capped {
            return;
        }
        let size_budget = self.options.capped_size.unwrap_or(i64::MAX);
        let doc_budget =
            self.options.capped_max_docs.map_or(usize::MAX, |m| usize::try_from(m).unwrap_or(0));
        while inner.total_bytes > size_budget || inner.records.len() > doc_budget {
            let Some((&oldest, _)) = inner.records.iter().next() else {
                break;
            };
            if let Some((data, _)) = inner.records.remove(&oldest) {
                inner.total_bytes -= data.len() as i64;
            }
        }
    }
}

/// A single in-memory record store.
pub struct MemoryRecordStore {
    shared: Arc<StoreShared>,
}

impl MemoryRecordStore {
    fn new(options: RecordStoreOptions) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                inner: RwLock::new(StoreInner { records: BTreeMap::new(), total_bytes: 0 }),
                options,
                next_id: AtomicI64::new(1),
                next_version: AtomicU64::new(1),
                insert_counter: AtomicU64::new(0),
                detached: AtomicBool::new(false),
            }),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn insert(&self, data: Vec<u8>) -> Result<RecordId, StorageError> {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
        let version = shared.next_version.fetch_add(1, Ordering::SeqCst);
        let mut inner = shared.inner.write().expect("store poisoned");
        inner.total_bytes += data.len() as i64;
        inner.records.insert(id, (data, version));
        shared.evict_capped(&mut inner);
        drop(inner);
        shared.insert_counter.fetch_add(1, Ordering::SeqCst);
        Ok(RecordId::new(id))
    }

    fn seek_exact(&self, id: RecordId) -> Option<Record> {
        let inner = self.shared.inner.read().expect("store poisoned");
        inner
            .records
            .get(&id.as_i64())
            .map(|(data, version)| Record { id, data: data.clone(), version: *version })
    }

    fn update(
        &self,
        id: RecordId,
        data: Vec<u8>,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let mut inner = self.shared.inner.write().expect("store poisoned");
        let slot = inner
            .records
            .get_mut(&id.as_i64())
            .ok_or_else(|| StorageError::RecordNotFound(id.to_string()))?;
        if slot.1 != expected_version {
            return Err(StorageError::WriteConflict(id.to_string()));
        }
        let version = self.shared.next_version.fetch_add(1, Ordering::SeqCst);
        let old_len = slot.0.len() as i64;
        *slot = (data, version);
        let new_len = slot.0.len() as i64;
        inner.total_bytes += new_len - old_len;
        Ok(version)
    }

    fn remove(&self, id: RecordId) -> Result<bool, StorageError> {
        let mut inner = self.shared.inner.write().expect("store poisoned");
        match inner.records.remove(&id.as_i64()) {
            Some((data, _)) => {
                inner.total_bytes -= data.len() as i64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn num_records(&self) -> usize {
        self.shared.inner.read().expect("store poisoned").records.len()
    }

    fn insert_version(&self) -> u64 {
        self.shared.insert_counter.load(Ordering::SeqCst)
    }

    fn cursor(&self, direction: ScanDirection) -> Box<dyn RecordCursor> {
        Box::new(MemoryCursor {
            shared: Arc::clone(&self.shared),
            direction,
            last: None,
            saved: false,
        })
    }

    fn is_capped(&self) -> bool {
        self.shared.options.capped
    }

    fn is_detached(&self) -> bool {
        self.shared.detached.load(Ordering::SeqCst)
    }
}

struct MemoryCursor {
    shared: Arc<StoreShared>,
    direction: ScanDirection,
    last: Option<i64>,
    saved: bool,
}

impl RecordCursor for MemoryCursor {
    fn next(&mut self) -> Option<Record> {
        debug_assert!(!self.saved, "cursor used while saved");
        let inner = self.shared.inner.read().expect("store poisoned");
        let found = match self.direction {
            ScanDirection::Forward => match self.last {
                Some(last) => {
                    inner.records.range((last + 1)..).next().map(|(&id, rec)| (id, rec.clone()))
                }
                None => inner.records.iter().next().map(|(&id, rec)| (id, rec.clone())),
            },
            ScanDirection::Backward => match self.last {
                Some(last) => {
                    inner.records.range(..last).next_back().map(|(&id, rec)| (id, rec.clone()))
                }
                None => inner.records.iter().next_back().map(|(&id, rec)| (id, rec.clone())),
            },
        };
        drop(inner);
        let (id, (data, version)) = found?;
        self.last = Some(id);
        Some(Record { id: RecordId::new(id), data, version })
    }

    fn seek_exact(&mut self, id: RecordId) -> Option<Record> {
        let inner = self.shared.inner.read().expect("store poisoned");
        let record = inner
            .records
            .get(&id.as_i64())
            .map(|(data, version)| Record { id, data: data.clone(), version: *version })?;
        drop(inner);
        self.last = Some(id.as_i64());
        Some(record)
    }

    fn save(&mut self) {
        self.saved = true;
    }

    fn restore(&mut self) -> RestoreOutcome {
        self.saved = false;
        if self.shared.detached.load(Ordering::SeqCst) {
            return RestoreOutcome::failed();
        }
        RestoreOutcome::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_store(ns: &str) -> (MemoryEngine, Arc<dyn RecordStore>) {
        let engine = MemoryEngine::new();
        let store = engine.create_record_store(ns, RecordStoreOptions::default()).expect("create");
        (engine, store)
    }

    #[test]
    fn insert_and_seek() {
        let (_engine, store) = engine_with_store("db.c");
        let id = store.insert(b"hello".to_vec()).expect("insert");
        let record = store.seek_exact(id).expect("present");
        assert_eq!(record.data, b"hello");
        assert_eq!(store.num_records(), 1);
    }

    #[test]
    fn update_checks_version() {
        let (_engine, store) = engine_with_store("db.c");
        let id = store.insert(b"v1".to_vec()).expect("insert");
        let v1 = store.seek_exact(id).expect("present").version;

        let v2 = store.update(id, b"v2".to_vec(), v1).expect("first update wins");
        let err = store.update(id, b"v3".to_vec(), v1).expect_err("stale version");
        assert!(err.is_write_conflict());
        assert!(store.update(id, b"v3".to_vec(), v2).is_ok());
    }

    #[test]
    fn capped_store_evicts_oldest() {
        let engine = MemoryEngine::new();
        let store = engine
            .create_record_store(
                "db.capped",
                RecordStoreOptions { capped: true, capped_size: None, capped_max_docs: Some(3) },
            )
            .expect("create");
        let first = store.insert(b"a".to_vec()).expect("insert");
        for payload in [b"b".to_vec(), b"c".to_vec(), b"d".to_vec()] {
            store.insert(payload).expect("insert");
        }
        assert_eq!(store.num_records(), 3);
        assert!(store.seek_exact(first).is_none());
        assert_eq!(store.insert_version(), 4);
    }

    #[test]
    fn cursor_scans_both_directions() {
        let (_engine, store) = engine_with_store("db.c");
        let ids: Vec<_> = (0..3).map(|i| store.insert(vec![i]).expect("insert")).collect();

        let mut forward = store.cursor(ScanDirection::Forward);
        let mut seen = Vec::new();
        while let Some(record) = forward.next() {
            seen.push(record.id);
        }
        assert_eq!(seen, ids);

        let mut backward = store.cursor(ScanDirection::Backward);
        let mut seen_back = Vec::new();
        while let Some(record) = backward.next() {
            seen_back.push(record.id);
        }
        assert_eq!(seen_back, ids.iter().rev().copied().collect::<Vec<_>>());
    }

    #[test]
    fn cursor_position_survives_concurrent_delete() {
        let (_engine, store) = engine_with_store("db.c");
        let ids: Vec<_> = (0..4).map(|i| store.insert(vec![i]).expect("insert")).collect();

        let mut cursor = store.cursor(ScanDirection::Forward);
        assert_eq!(cursor.next().map(|r| r.id), Some(ids[0]));

        cursor.save();
        store.remove(ids[1]).expect("remove");
        assert!(cursor.restore().ok);

        assert_eq!(cursor.next().map(|r| r.id), Some(ids[2]));
    }

    #[test]
    fn dropped_store_fails_restore() {
        let engine = MemoryEngine::new();
        let store =
            engine.create_record_store("db.c", RecordStoreOptions::default()).expect("create");
        let mut cursor = store.cursor(ScanDirection::Forward);
        cursor.save();
        engine.drop_record_store("db.c").expect("drop");
        assert!(!cursor.restore().ok);
    }

    #[test]
    fn rename_carries_metadata() {
        let engine = MemoryEngine::new();
        engine.create_record_store("db.a", RecordStoreOptions::default()).expect("create");
        engine.put_metadata("db.a", b"opts".to_vec()).expect("put");

        engine.rename_record_store("db.a", "db.b").expect("rename");
        assert!(engine.get_record_store("db.a").is_none());
        assert!(engine.get_record_store("db.b").is_some());
        assert_eq!(engine.get_metadata("db.b"), Some(b"opts".to_vec()));
        assert_eq!(engine.get_metadata("db.a"), None);
    }
}
