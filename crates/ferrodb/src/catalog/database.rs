//! Per-database catalog state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ferrodb_core::NamespaceString;

use crate::error::{Error, Result};

use super::collection::CollectionDescriptor;

const TEMP_NAME_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// One database's collection map and bookkeeping.
///
/// The map itself is guarded by a short internal lock; structural
/// mutation additionally requires the database's X lock, which callers
/// hold per the hierarchical protocol. Descriptors are immutable while
/// referenced, so readers under IS/IX only need the map lock.
pub struct DatabaseCatalog {
    name: String,
    collections: RwLock<HashMap<String, Arc<CollectionDescriptor>>>,
    profile_level: AtomicI32,
    drop_pending: AtomicBool,
    temp_rng: Mutex<Option<StdRng>>,
}

impl DatabaseCatalog {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
            profile_level: AtomicI32::new(0),
            drop_pending: AtomicBool::new(false),
            temp_rng: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// O(1) descriptor lookup by full namespace.
    #[must_use]
    pub fn get_collection(&self, ns: &str) -> Option<Arc<CollectionDescriptor>> {
        self.collections.read().expect("collection map poisoned").get(ns).map(Arc::clone)
    }

    /// Every descriptor, in unspecified order.
    #[must_use]
    pub fn list_collections(&self) -> Vec<Arc<CollectionDescriptor>> {
        self.collections.read().expect("collection map poisoned").values().map(Arc::clone).collect()
    }

    #[must_use]
    pub fn collection_count(&self) -> usize {
        self.collections.read().expect("collection map poisoned").len()
    }

    pub(crate) fn insert_collection(&self, descriptor: Arc<CollectionDescriptor>) {
        let ns = descriptor.ns().as_str().to_string();
        self.collections.write().expect("collection map poisoned").insert(ns, descriptor);
    }

    pub(crate) fn remove_collection(&self, ns: &str) -> Option<Arc<CollectionDescriptor>> {
        self.collections.write().expect("collection map poisoned").remove(ns)
    }

    /// Profiling level; dropping `system.profile` is refused while this
    /// is non-zero.
    #[must_use]
    pub fn profile_level(&self) -> i32 {
        self.profile_level.load(Ordering::SeqCst)
    }

    pub fn set_profile_level(&self, level: i32) {
        self.profile_level.store(level, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_drop_pending(&self) -> bool {
        self.drop_pending.load(Ordering::SeqCst)
    }

    pub fn set_drop_pending(&self, pending: bool) {
        self.drop_pending.store(pending, Ordering::SeqCst);
    }

    /// Generate a namespace from `model` by substituting each `%` with
    /// a random alphanumeric, retrying on collisions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FailedToParse`] when the model carries no `%`
    /// within the usable length, and [`Error::NamespaceExists`] after
    /// exhausting `percents * 62 * 100` attempts.
    pub fn make_unique_temporary_namespace(&self, model: &str) -> Result<NamespaceString> {
        let max_model_len =
            ferrodb_core::types::namespace::MAX_USER_NS_LEN.saturating_sub(self.name.len() + 1);
        let model = &model[..model.len().min(max_model_len)];
        let percents = model.bytes().filter(|&b| b == b'%').count();
        if percents == 0 {
            return Err(Error::FailedToParse(format!(
                "collection name model '{model}' must contain at least one percent sign \
                 within the first {max_model_len} characters"
            )));
        }

        let mut rng_slot = self.temp_rng.lock().expect("rng poisoned");
        let rng = rng_slot.get_or_insert_with(|| {
            let seed = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            StdRng::seed_from_u64(seed)
        });

        let attempts = percents * TEMP_NAME_CHARS.len() * 100;
        for _ in 0..attempts {
            let candidate: String = model
                .bytes()
                .map(|b| {
                    if b == b'%' {
                        TEMP_NAME_CHARS[rng.gen_range(0..TEMP_NAME_CHARS.len())] as char
                    } else {
                        b as char
                    }
                })
                .collect();
            let ns = NamespaceString::from_parts(&self.name, &candidate)?;
            if self.get_collection(ns.as_str()).is_none() {
                return Ok(ns);
            }
        }
        Err(Error::NamespaceExists(format!(
            "cannot generate a collection name from model '{model}' after {attempts} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use ferrodb_core::{CollectionOptions, CollectionUuid};
    use ferrodb_storage::{MemoryEngine, RecordStoreOptions, StorageEngine};

    use super::*;

    fn descriptor(ns: &str) -> Arc<CollectionDescriptor> {
        let engine = MemoryEngine::new();
        let store = engine.create_record_store(ns, RecordStoreOptions::default()).expect("store");
        CollectionDescriptor::new(
            CollectionUuid::generate(),
            NamespaceString::parse(ns).unwrap(),
            CollectionOptions::default(),
            store,
        )
    }

    #[test]
    fn insert_lookup_remove() {
        let db = DatabaseCatalog::new("app");
        db.insert_collection(descriptor("app.users"));
        assert!(db.get_collection("app.users").is_some());
        assert_eq!(db.collection_count(), 1);

        db.remove_collection("app.users");
        assert!(db.get_collection("app.users").is_none());
    }

    #[test]
    fn temp_namespace_generation() {
        let db = DatabaseCatalog::new("app");
        let ns = db.make_unique_temporary_namespace("tmp.agg_out.%%%%%").expect("generate");
        assert_eq!(ns.db(), "app");
        assert!(ns.coll().starts_with("tmp.agg_out."));
        assert_eq!(ns.coll().len(), "tmp.agg_out.".len() + 5);

        let again = db.make_unique_temporary_namespace("tmp.agg_out.%%%%%").expect("generate");
        assert_ne!(ns, again);
    }

    #[test]
    fn temp_namespace_requires_percent() {
        let db = DatabaseCatalog::new("app");
        assert!(matches!(
            db.make_unique_temporary_namespace("fixed_name"),
            Err(Error::FailedToParse(_))
        ));
    }

    #[test]
    fn temp_namespace_exhaustion_reports_exists() {
        let db = DatabaseCatalog::new("app");
        // One percent sign means only 62 possible names; occupy them all.
        for c in TEMP_NAME_CHARS {
            db.insert_collection(descriptor(&format!("app.t{}", *c as char)));
        }
        assert!(matches!(
            db.make_unique_temporary_namespace("t%"),
            Err(Error::NamespaceExists(_))
        ));
    }
}
