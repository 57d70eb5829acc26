//! The plan cache.
//!
//! Winning plans from multi-plan trials are cached keyed by the
//! canonical query shape (filter shape plus scan direction), so later
//! executions of the same shape skip the trial. Entries record the
//! number of works the winner needed during its trial; the cached-plan
//! stage uses that as its replanning budget. Catalog changes clear the
//! cache; eviction beyond correctness is out of scope here.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::exec::expression::Expression;
use crate::exec::planner::QuerySolution;

/// Canonical query shape: the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryShape(String);

impl QueryShape {
    #[must_use]
    pub fn of(filter: Option<&Expression>, reverse: bool) -> Self {
        let filter_shape = filter.map_or_else(|| "{}".to_string(), Expression::shape);
        Self(format!("find|{filter_shape}|rev:{reverse}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One cached decision.
#[derive(Debug, Clone)]
pub struct PlanCacheEntry {
    pub solution: QuerySolution,
    /// Works the winner spent during its trial; replanning triggers at a
    /// multiple of this.
    pub decision_works: u64,
}

/// Shape-keyed cache of winning plans for one collection.
#[derive(Default)]
pub struct PlanCache {
    entries: Mutex<HashMap<QueryShape, PlanCacheEntry>>,
}

impl PlanCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, shape: &QueryShape) -> Option<PlanCacheEntry> {
        self.entries.lock().expect("plan cache poisoned").get(shape).cloned()
    }

    pub fn put(&self, shape: QueryShape, entry: PlanCacheEntry) {
        self.entries.lock().expect("plan cache poisoned").insert(shape, entry);
    }

    /// Evict one shape, e.g. after a failed cached-plan trial.
    pub fn remove(&self, shape: &QueryShape) {
        self.entries.lock().expect("plan cache poisoned").remove(shape);
    }

    /// Drop everything; called on any catalog change that could change
    /// plan validity.
    pub fn clear(&self) {
        self.entries.lock().expect("plan cache poisoned").clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("plan cache poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
