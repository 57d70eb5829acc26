//! Recovery units.
//!
//! A recovery unit accumulates change hooks registered by catalog
//! writers during a write unit of work. Exactly one of the two hooks of
//! every registered change fires: commit hooks run in registration order
//! on commit, rollback hooks run in reverse order on abandon, and a unit
//! dropped with pending changes abandons them.

type Hook = Box<dyn FnOnce() + Send>;

struct Change {
    on_commit: Option<Hook>,
    on_rollback: Option<Hook>,
}

/// Collects per-operation change hooks until the enclosing write unit of
/// work resolves.
#[derive(Default)]
pub struct RecoveryUnit {
    changes: Vec<Change>,
}

impl RecoveryUnit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a commit/rollback hook pair.
    pub fn register_change(
        &mut self,
        on_commit: impl FnOnce() + Send + 'static,
        on_rollback: impl FnOnce() + Send + 'static,
    ) {
        self.changes.push(Change {
            on_commit: Some(Box::new(on_commit)),
            on_rollback: Some(Box::new(on_rollback)),
        });
    }

    /// Number of changes awaiting resolution.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    /// Commit: run every commit hook in registration order.
    pub fn commit(&mut self) {
        for mut change in self.changes.drain(..) {
            if let Some(hook) = change.on_commit.take() {
                hook();
            }
        }
    }

    /// Abandon: run every rollback hook in reverse registration order.
    pub fn abandon(&mut self) {
        for mut change in self.changes.drain(..).rev() {
            if let Some(hook) = change.on_rollback.take() {
                hook();
            }
        }
    }
}

impl Drop for RecoveryUnit {
    fn drop(&mut self) {
        if !self.changes.is_empty() {
            self.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn commit_runs_commit_hooks_in_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut unit = RecoveryUnit::new();
        for i in 0..3 {
            let log = Arc::clone(&log);
            unit.register_change(move || log.lock().unwrap().push(i), || panic!("rolled back"));
        }
        unit.commit();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(unit.pending_changes(), 0);
    }

    #[test]
    fn abandon_runs_rollback_hooks_in_reverse() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut unit = RecoveryUnit::new();
        for i in 0..3 {
            let log = Arc::clone(&log);
            unit.register_change(|| panic!("committed"), move || log.lock().unwrap().push(i));
        }
        unit.abandon();
        assert_eq!(*log.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn drop_abandons_pending_changes() {
        let rolled_back = Arc::new(AtomicUsize::new(0));
        {
            let mut unit = RecoveryUnit::new();
            let counter = Arc::clone(&rolled_back);
            unit.register_change(
                || panic!("committed"),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            );
        }
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exactly_one_hook_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut unit = RecoveryUnit::new();
        let a = Arc::clone(&fired);
        let b = Arc::clone(&fired);
        unit.register_change(
            move || {
                a.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                b.fetch_add(1, Ordering::SeqCst);
            },
        );
        unit.commit();
        unit.abandon();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
