//! The drop-pending namespace reaper.
//!
//! Phase one of a two-phase drop renames the collection to a
//! drop-pending namespace and records it here keyed by the drop optime.
//! The catalog physically drops storage for an entry only once the
//! replication commit point has advanced past that optime.

use std::collections::BTreeMap;
use std::sync::Mutex;

use ferrodb_core::{NamespaceString, OpTime};

/// Ordered registry of namespaces awaiting physical reclamation.
#[derive(Default)]
pub struct DropPendingReaper {
    pending: Mutex<BTreeMap<OpTime, Vec<NamespaceString>>>,
}

impl DropPendingReaper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a drop-pending namespace under its drop optime.
    pub fn add_drop_pending(&self, op_time: OpTime, ns: NamespaceString) {
        debug_assert!(ns.is_drop_pending());
        let mut pending = self.pending.lock().expect("reaper poisoned");
        pending.entry(op_time).or_default().push(ns);
    }

    /// The oldest optime still awaiting reclamation.
    #[must_use]
    pub fn earliest_drop_op_time(&self) -> Option<OpTime> {
        let pending = self.pending.lock().expect("reaper poisoned");
        pending.keys().next().copied()
    }

    /// Remove a specific entry, e.g. when a drop was rolled back.
    pub fn remove(&self, op_time: OpTime, ns: &NamespaceString) {
        let mut pending = self.pending.lock().expect("reaper poisoned");
        if let Some(list) = pending.get_mut(&op_time) {
            list.retain(|candidate| candidate != ns);
            if list.is_empty() {
                pending.remove(&op_time);
            }
        }
    }

    /// Take every entry whose drop optime is at or below `commit_point`.
    #[must_use]
    pub fn take_due(&self, commit_point: OpTime) -> Vec<(OpTime, NamespaceString)> {
        let mut pending = self.pending.lock().expect("reaper poisoned");
        let still_pending = pending.split_off(&next_after(commit_point));
        let due = std::mem::replace(&mut *pending, still_pending);
        due.into_iter()
            .flat_map(|(op_time, namespaces)| {
                namespaces.into_iter().map(move |ns| (op_time, ns))
            })
            .collect()
    }

    /// Number of namespaces awaiting reclamation.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let pending = self.pending.lock().expect("reaper poisoned");
        pending.values().map(Vec::len).sum()
    }
}

/// The smallest optime strictly greater than `op_time` in the
/// (timestamp, term) order, used as a `split_off` pivot so `take_due`
/// is inclusive.
fn next_after(op_time: OpTime) -> OpTime {
    let mut next = op_time;
    match next.term.checked_add(1) {
        Some(term) => next.term = term,
        None => {
            next.timestamp.inc = next.timestamp.inc.saturating_add(1);
            next.term = i64::MIN;
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use ferrodb_core::Timestamp;

    use super::*;

    fn op_time(secs: u32) -> OpTime {
        OpTime::new(Timestamp::new(secs, 0), 1)
    }

    fn dpns(secs: u32, coll: &str) -> NamespaceString {
        NamespaceString::parse(format!("db.{coll}"))
            .unwrap()
            .make_drop_pending(op_time(secs))
    }

    #[test]
    fn take_due_is_inclusive_and_ordered() {
        let reaper = DropPendingReaper::new();
        reaper.add_drop_pending(op_time(10), dpns(10, "a"));
        reaper.add_drop_pending(op_time(20), dpns(20, "b"));
        reaper.add_drop_pending(op_time(30), dpns(30, "c"));

        let due = reaper.take_due(op_time(20));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].0, op_time(10));
        assert_eq!(due[1].0, op_time(20));
        assert_eq!(reaper.pending_count(), 1);
        assert_eq!(reaper.earliest_drop_op_time(), Some(op_time(30)));
    }

    #[test]
    fn commit_point_before_everything_reaps_nothing() {
        let reaper = DropPendingReaper::new();
        reaper.add_drop_pending(op_time(10), dpns(10, "a"));
        assert!(reaper.take_due(op_time(9)).is_empty());
        assert_eq!(reaper.pending_count(), 1);
    }

    #[test]
    fn remove_discards_single_entry() {
        let reaper = DropPendingReaper::new();
        let ns = dpns(10, "a");
        reaper.add_drop_pending(op_time(10), ns.clone());
        reaper.remove(op_time(10), &ns);
        assert_eq!(reaper.pending_count(), 0);
        assert_eq!(reaper.earliest_drop_op_time(), None);
    }
}
