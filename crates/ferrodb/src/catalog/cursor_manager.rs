//! Executor registration and invalidation.
//!
//! The catalog owns collection descriptors; executors borrow them for
//! their lifetime. To let the catalog invalidate executors on mutation
//! without reference cycles, each executor registers a slot here and
//! keeps an `Arc` to it: the catalog writes kill reasons and pending
//! record invalidations into the slot, and the executor drains them at
//! the top of every `work` tick. A generation counter stands in for
//! weak references: a slot registered before the last `kill_all` call
//! observes the generation mismatch and refuses to restore.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ferrodb_core::RecordId;

/// One registered executor's mailbox.
pub struct ExecutorSlot {
    generation: u64,
    kill_reason: Mutex<Option<String>>,
    pending_invalidations: Mutex<Vec<RecordId>>,
}

impl ExecutorSlot {
    /// The catalog generation this slot was registered under.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Set once by the catalog; terminal.
    pub fn kill(&self, reason: impl Into<String>) {
        let mut slot = self.kill_reason.lock().expect("slot poisoned");
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    #[must_use]
    pub fn kill_reason(&self) -> Option<String> {
        self.kill_reason.lock().expect("slot poisoned").clone()
    }

    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.kill_reason.lock().expect("slot poisoned").is_some()
    }

    fn push_invalidation(&self, rid: RecordId) {
        self.pending_invalidations.lock().expect("slot poisoned").push(rid);
    }

    /// Drain the record ids invalidated since the last call.
    #[must_use]
    pub fn take_invalidations(&self) -> Vec<RecordId> {
        std::mem::take(&mut *self.pending_invalidations.lock().expect("slot poisoned"))
    }
}

/// Registry of live executors for one collection.
#[derive(Default)]
pub struct CursorManager {
    slots: Mutex<Vec<Arc<ExecutorSlot>>>,
    generation: AtomicU64,
}

impl CursorManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current catalog generation for this collection.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Register a new executor; the returned slot is the executor's end
    /// of the channel.
    #[must_use]
    pub fn register_executor(&self) -> Arc<ExecutorSlot> {
        let slot = Arc::new(ExecutorSlot {
            generation: self.generation(),
            kill_reason: Mutex::new(None),
            pending_invalidations: Mutex::new(Vec::new()),
        });
        self.slots.lock().expect("cursor manager poisoned").push(Arc::clone(&slot));
        slot
    }

    /// Drop the catalog's reference to a finished executor.
    pub fn deregister_executor(&self, slot: &Arc<ExecutorSlot>) {
        let mut slots = self.slots.lock().expect("cursor manager poisoned");
        slots.retain(|s| !Arc::ptr_eq(s, slot));
    }

    /// Number of currently registered executors.
    #[must_use]
    pub fn open_executors(&self) -> usize {
        self.slots.lock().expect("cursor manager poisoned").len()
    }

    /// Kill every registered executor and advance the generation so
    /// stale registrations cannot restore.
    pub fn kill_all(&self, reason: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut slots = self.slots.lock().expect("cursor manager poisoned");
        for slot in slots.drain(..) {
            slot.kill(reason);
        }
    }

    /// Forward a deleted/moved record id to every registered executor.
    pub fn invalidate_record(&self, rid: RecordId) {
        let slots = self.slots.lock().expect("cursor manager poisoned");
        for slot in slots.iter() {
            slot.push_invalidation(rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_all_marks_and_clears_slots() {
        let manager = CursorManager::new();
        let slot = manager.register_executor();
        assert_eq!(manager.open_executors(), 1);
        assert!(!slot.is_killed());

        manager.kill_all("collection dropped");
        assert_eq!(slot.kill_reason().as_deref(), Some("collection dropped"));
        assert_eq!(manager.open_executors(), 0);
        assert!(manager.generation() > slot.generation());
    }

    #[test]
    fn invalidations_are_drained_once() {
        let manager = CursorManager::new();
        let slot = manager.register_executor();
        manager.invalidate_record(RecordId::new(5));
        manager.invalidate_record(RecordId::new(9));

        assert_eq!(slot.take_invalidations(), vec![RecordId::new(5), RecordId::new(9)]);
        assert!(slot.take_invalidations().is_empty());
    }

    #[test]
    fn deregistered_executors_see_no_invalidations() {
        let manager = CursorManager::new();
        let slot = manager.register_executor();
        manager.deregister_executor(&slot);
        manager.invalidate_record(RecordId::new(1));
        assert!(slot.take_invalidations().is_empty());
    }
}
