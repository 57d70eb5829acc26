//! The process-wide lock manager.
//!
//! Lock heads are sharded by resource-id hash across a fixed number of
//! buckets, each behind its own mutex. Within one head, the grant list
//! and the FIFO conflict queue hold shared references to the requests
//! the lockers own; the effective granted mode is the supremum of the
//! individual grants, tracked as per-mode counts plus a bitmask.
//!
//! Granting discipline on every head re-evaluation:
//!
//! 1. Complete any pending conversion whose target mode is compatible
//!    with everyone else's grants.
//! 2. Walk the conflict queue from the front, promoting every waiter
//!    compatible with the current supremum.
//! 3. Stop at the first incompatible waiter - unless that waiter is
//!    flagged `compatible_first`, in which case later waiters may still
//!    be promoted when compatible with both the supremum and the blocked
//!    waiter's mode.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::mode::{conflicts, mask, LockMode, LOCK_MODES_COUNT};
use crate::request::{LockRequest, LockRequestStatus, LockResult};
use crate::resource::ResourceId;

const NUM_BUCKETS: usize = 32;

/// Per-resource lock state.
#[derive(Default)]
struct LockHead {
    granted: Vec<Arc<LockRequest>>,
    granted_counts: [u32; LOCK_MODES_COUNT],
    granted_mask: u32,
    conflict: VecDeque<Arc<LockRequest>>,
    conflict_counts: [u32; LOCK_MODES_COUNT],
    conflict_mask: u32,
    /// Granted requests carrying the `compatible_first` flag.
    compatible_first_count: u32,
}

impl LockHead {
    fn inc_granted(&mut self, mode: LockMode) {
        self.granted_counts[mode as usize] += 1;
        self.granted_mask |= mask(mode);
    }

    fn dec_granted(&mut self, mode: LockMode) {
        debug_assert!(self.granted_counts[mode as usize] > 0);
        self.granted_counts[mode as usize] -= 1;
        if self.granted_counts[mode as usize] == 0 {
            self.granted_mask &= !mask(mode);
        }
    }

    fn inc_conflict(&mut self, mode: LockMode) {
        self.conflict_counts[mode as usize] += 1;
        self.conflict_mask |= mask(mode);
    }

    fn dec_conflict(&mut self, mode: LockMode) {
        debug_assert!(self.conflict_counts[mode as usize] > 0);
        self.conflict_counts[mode as usize] -= 1;
        if self.conflict_counts[mode as usize] == 0 {
            self.conflict_mask &= !mask(mode);
        }
    }

    /// The granted mask with one request's contributions removed, used
    /// for self-compatibility checks during conversion.
    fn mask_without(&self, first: LockMode, second: LockMode) -> u32 {
        let mut counts = self.granted_counts;
        for mode in [first, second] {
            if mode != LockMode::None {
                debug_assert!(counts[mode as usize] > 0);
                counts[mode as usize] -= 1;
            }
        }
        counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .fold(0, |acc, (idx, _)| acc | (1 << idx))
    }

    fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.conflict.is_empty()
    }

    fn remove_granted(&mut self, request: &Arc<LockRequest>) {
        if let Some(pos) = self.granted.iter().position(|r| Arc::ptr_eq(r, request)) {
            self.granted.swap_remove(pos);
        }
    }

    fn remove_waiting(&mut self, request: &Arc<LockRequest>) {
        if let Some(pos) = self.conflict.iter().position(|r| Arc::ptr_eq(r, request)) {
            self.conflict.remove(pos);
        }
    }
}

/// A granted or pending request, as reported by [`LockManager::snapshot`].
#[derive(Debug, Clone)]
pub struct LockRequestInfo {
    pub locker_id: u64,
    pub mode: LockMode,
    pub status: LockRequestStatus,
    pub convert_mode: LockMode,
}

/// One lock head, as reported by [`LockManager::snapshot`].
#[derive(Debug, Clone)]
pub struct LockHeadInfo {
    pub resource: ResourceId,
    pub granted: Vec<LockRequestInfo>,
    pub pending: Vec<LockRequestInfo>,
}

/// Arbitrates multi-mode access to named resources.
pub struct LockManager {
    buckets: Vec<Mutex<HashMap<ResourceId, LockHead>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self { buckets: (0..NUM_BUCKETS).map(|_| Mutex::new(HashMap::new())).collect() }
    }

    fn bucket(&self, resource: ResourceId) -> MutexGuard<'_, HashMap<ResourceId, LockHead>> {
        let idx = (resource.raw() as usize) % NUM_BUCKETS;
        self.buckets[idx].lock().expect("lock bucket poisoned")
    }

    /// Present a new request for `resource` in `mode`.
    ///
    /// Returns [`LockResult::Granted`] when the request joined the grant
    /// list, or [`LockResult::Waiting`] after enqueueing it; the
    /// request's notification fires when a later re-evaluation grants
    /// it. This call itself never fails.
    pub fn lock(
        &self,
        resource: ResourceId,
        request: &Arc<LockRequest>,
        mode: LockMode,
    ) -> LockResult {
        debug_assert!(mode != LockMode::None);
        let mut bucket = self.bucket(resource);
        let head = bucket.entry(resource).or_default();

        let mut state = request.state();
        debug_assert_eq!(state.status, LockRequestStatus::New, "lock() requires a fresh request");
        debug_assert_eq!(state.recursive_count, 0);
        state.recursive_count = 1;
        state.mode = mode;

        let grantable = !conflicts(mode, head.granted_mask)
            && (head.compatible_first_count > 0 || !conflicts(mode, head.conflict_mask));
        if grantable {
            state.status = LockRequestStatus::Granted;
            drop(state);
            head.inc_granted(mode);
            if request.is_compatible_first() {
                head.compatible_first_count += 1;
            }
            head.granted.push(Arc::clone(request));
            LockResult::Granted
        } else {
            state.status = LockRequestStatus::Waiting;
            drop(state);
            head.inc_conflict(mode);
            if request.is_enqueue_at_front() {
                head.conflict.push_front(Arc::clone(request));
            } else {
                head.conflict.push_back(Arc::clone(request));
            }
            LockResult::Waiting
        }
    }

    /// Re-acquire or upgrade an already-presented request.
    ///
    /// A repeat acquisition in a covered mode only bumps the recursive
    /// count. An upgrade completes immediately when the target mode is
    /// compatible with every other grant; otherwise the request is
    /// marked converting and its target mode is reserved in the granted
    /// supremum so new compatible arrivals cannot starve it.
    pub fn convert(
        &self,
        resource: ResourceId,
        request: &Arc<LockRequest>,
        mode: LockMode,
    ) -> LockResult {
        let mut bucket = self.bucket(resource);
        let head = bucket.get_mut(&resource).expect("convert on unknown resource");

        let mut state = request.state();
        debug_assert!(
            state.status == LockRequestStatus::Granted
                || state.status == LockRequestStatus::Converting,
            "convert() requires a granted request"
        );
        state.recursive_count += 1;

        let held = if state.status == LockRequestStatus::Converting {
            state.convert_mode
        } else {
            state.mode
        };
        if held.covers(mode) {
            return LockResult::Granted;
        }
        debug_assert_eq!(
            state.status,
            LockRequestStatus::Granted,
            "upgrade while a conversion is pending"
        );

        let others = head.mask_without(state.mode, LockMode::None);
        if !conflicts(mode, others) {
            let old = state.mode;
            state.mode = mode;
            drop(state);
            head.dec_granted(old);
            head.inc_granted(mode);
            LockResult::Granted
        } else {
            state.status = LockRequestStatus::Converting;
            state.convert_mode = mode;
            drop(state);
            // Reserve the target mode so new arrivals queue behind the
            // conversion; the prior mode stays counted as well.
            head.inc_granted(mode);
            request.notify.clear();
            LockResult::Waiting
        }
    }

    /// Release one acquisition of `request`.
    ///
    /// Returns `true` when the recursive count reached zero and the
    /// request was detached from its head, after which the conflict
    /// queue is re-evaluated.
    pub fn unlock(&self, resource: ResourceId, request: &Arc<LockRequest>) -> bool {
        let mut bucket = self.bucket(resource);
        let head = bucket.get_mut(&resource).expect("unlock on unknown resource");

        let mut state = request.state();
        debug_assert!(state.recursive_count > 0, "unbalanced unlock");
        state.recursive_count -= 1;
        if state.recursive_count > 0 {
            return false;
        }

        match state.status {
            LockRequestStatus::Granted => {
                let mode = state.mode;
                state.status = LockRequestStatus::New;
                state.mode = LockMode::None;
                drop(state);
                head.remove_granted(request);
                head.dec_granted(mode);
                if request.is_compatible_first() {
                    debug_assert!(head.compatible_first_count > 0);
                    head.compatible_first_count -= 1;
                }
            }
            LockRequestStatus::Converting => {
                let (mode, convert_mode) = (state.mode, state.convert_mode);
                state.status = LockRequestStatus::New;
                state.mode = LockMode::None;
                state.convert_mode = LockMode::None;
                drop(state);
                head.remove_granted(request);
                head.dec_granted(mode);
                head.dec_granted(convert_mode);
                if request.is_compatible_first() {
                    debug_assert!(head.compatible_first_count > 0);
                    head.compatible_first_count -= 1;
                }
            }
            LockRequestStatus::Waiting => {
                let mode = state.mode;
                state.status = LockRequestStatus::New;
                state.mode = LockMode::None;
                drop(state);
                head.remove_waiting(request);
                head.dec_conflict(mode);
            }
            LockRequestStatus::New => unreachable!("unlock of an unpresented request"),
        }

        Self::grant_waiters(head);
        if head.is_empty() {
            bucket.remove(&resource);
        }
        true
    }

    /// Replace a granted request's mode with a weaker one and let any
    /// newly-compatible waiters through. Cannot fail.
    pub fn downgrade(&self, resource: ResourceId, request: &Arc<LockRequest>, new_mode: LockMode) {
        let mut bucket = self.bucket(resource);
        let head = bucket.get_mut(&resource).expect("downgrade on unknown resource");

        let mut state = request.state();
        debug_assert_eq!(state.status, LockRequestStatus::Granted);
        debug_assert!(state.mode.covers(new_mode), "downgrade must weaken the mode");
        let old = state.mode;
        state.mode = new_mode;
        drop(state);
        head.dec_granted(old);
        head.inc_granted(new_mode);
        Self::grant_waiters(head);
    }

    fn grant_waiters(head: &mut LockHead) {
        // Pending conversions are served before the conflict queue.
        let granted_list: Vec<_> = head.granted.to_vec();
        for request in granted_list {
            let mut state = request.state();
            if state.status != LockRequestStatus::Converting {
                continue;
            }
            let others = head.mask_without(state.mode, state.convert_mode);
            if !conflicts(state.convert_mode, others) {
                let old = state.mode;
                state.mode = state.convert_mode;
                state.convert_mode = LockMode::None;
                state.status = LockRequestStatus::Granted;
                drop(state);
                head.dec_granted(old);
                request.notify.notify(LockResult::Granted);
            }
        }

        let mut remaining = VecDeque::with_capacity(head.conflict.len());
        let mut blocked_mode: Option<LockMode> = None;
        let mut stopped = false;
        while let Some(waiter) = head.conflict.pop_front() {
            if stopped {
                remaining.push_back(waiter);
                continue;
            }
            let w_mode = waiter.state().mode;
            let ok_supremum = !conflicts(w_mode, head.granted_mask);
            let ok_blocker = blocked_mode.map_or(true, |b| w_mode.is_compatible_with(b));
            if ok_supremum && ok_blocker {
                head.dec_conflict(w_mode);
                waiter.state().status = LockRequestStatus::Granted;
                head.inc_granted(w_mode);
                if waiter.is_compatible_first() {
                    head.compatible_first_count += 1;
                }
                waiter.notify.notify(LockResult::Granted);
                head.granted.push(waiter);
            } else if blocked_mode.is_none() {
                if waiter.is_compatible_first() {
                    blocked_mode = Some(w_mode);
                } else {
                    stopped = true;
                }
                remaining.push_back(waiter);
            } else {
                remaining.push_back(waiter);
            }
        }
        head.conflict = remaining;
    }

    /// Locker ids currently granted (or converting) on `resource`: the
    /// targets of a waiter's wait-for edges.
    #[must_use]
    pub fn owners_of(&self, resource: ResourceId) -> Vec<u64> {
        let bucket = self.bucket(resource);
        bucket
            .get(&resource)
            .map(|head| head.granted.iter().map(|r| r.locker_id).collect())
            .unwrap_or_default()
    }

    /// The resource `locker_id` is blocked on, if any: either queued in
    /// a conflict queue or stalled in a pending conversion.
    #[must_use]
    pub fn waits_for(&self, locker_id: u64) -> Option<ResourceId> {
        for bucket in &self.buckets {
            let bucket = bucket.lock().expect("lock bucket poisoned");
            for (resource, head) in bucket.iter() {
                if head.conflict.iter().any(|r| r.locker_id == locker_id) {
                    return Some(*resource);
                }
                if head
                    .granted
                    .iter()
                    .any(|r| r.locker_id == locker_id && r.status() == LockRequestStatus::Converting)
                {
                    return Some(*resource);
                }
            }
        }
        None
    }

    /// A point-in-time dump of every lock head, for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LockHeadInfo> {
        let mut out = Vec::new();
        for bucket in &self.buckets {
            let bucket = bucket.lock().expect("lock bucket poisoned");
            for (resource, head) in bucket.iter() {
                let describe = |request: &Arc<LockRequest>| {
                    let state = request.state();
                    LockRequestInfo {
                        locker_id: request.locker_id,
                        mode: state.mode,
                        status: state.status,
                        convert_mode: state.convert_mode,
                    }
                };
                out.push(LockHeadInfo {
                    resource: *resource,
                    granted: head.granted.iter().map(describe).collect(),
                    pending: head.conflict.iter().map(describe).collect(),
                });
            }
        }
        out.sort_by_key(|info| info.resource);
        out
    }

    /// Invariant check used by tests: every pair of granted modes on
    /// every head is compatible.
    #[must_use]
    pub fn granted_sets_are_pairwise_compatible(&self) -> bool {
        for bucket in &self.buckets {
            let bucket = bucket.lock().expect("lock bucket poisoned");
            for head in bucket.values() {
                let modes: Vec<LockMode> = head
                    .granted
                    .iter()
                    .filter(|r| r.status() == LockRequestStatus::Granted)
                    .map(|r| r.mode())
                    .collect();
                for (i, &a) in modes.iter().enumerate() {
                    for &b in &modes[i + 1..] {
                        if !a.is_compatible_with(b) {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LockGrantNotification;
    use std::time::Duration;

    fn request(locker_id: u64) -> Arc<LockRequest> {
        LockRequest::new(locker_id, Arc::new(LockGrantNotification::new()))
    }

    fn res() -> ResourceId {
        ResourceId::for_collection("db.widgets")
    }

    #[test]
    fn compatible_requests_grant_immediately() {
        let manager = LockManager::new();
        let (a, b) = (request(1), request(2));
        assert_eq!(manager.lock(res(), &a, LockMode::IntentShared), LockResult::Granted);
        assert_eq!(manager.lock(res(), &b, LockMode::IntentExclusive), LockResult::Granted);
        assert!(manager.granted_sets_are_pairwise_compatible());
    }

    #[test]
    fn conflicting_request_waits_then_grants_on_unlock() {
        let manager = LockManager::new();
        let (a, b) = (request(1), request(2));
        assert_eq!(manager.lock(res(), &a, LockMode::Exclusive), LockResult::Granted);
        assert_eq!(manager.lock(res(), &b, LockMode::Shared), LockResult::Waiting);

        assert!(manager.unlock(res(), &a));
        assert_eq!(b.notify.wait_for(Duration::from_secs(1)), LockResult::Granted);
        assert_eq!(b.status(), LockRequestStatus::Granted);
        assert!(manager.unlock(res(), &b));
    }

    #[test]
    fn recursive_acquisition_counts() {
        let manager = LockManager::new();
        let a = request(1);
        assert_eq!(manager.lock(res(), &a, LockMode::Shared), LockResult::Granted);
        assert_eq!(manager.convert(res(), &a, LockMode::Shared), LockResult::Granted);
        assert_eq!(a.recursive_count(), 2);

        assert!(!manager.unlock(res(), &a));
        assert!(manager.unlock(res(), &a));
        assert_eq!(a.recursive_count(), 0);
    }

    #[test]
    fn covered_convert_keeps_existing_mode() {
        let manager = LockManager::new();
        let a = request(1);
        assert_eq!(manager.lock(res(), &a, LockMode::Exclusive), LockResult::Granted);
        assert_eq!(manager.convert(res(), &a, LockMode::Shared), LockResult::Granted);
        assert_eq!(a.mode(), LockMode::Exclusive);
    }

    #[test]
    fn conversion_waits_for_other_grants_to_clear() {
        let manager = LockManager::new();
        let (a, b) = (request(1), request(2));
        assert_eq!(manager.lock(res(), &a, LockMode::Shared), LockResult::Granted);
        assert_eq!(manager.lock(res(), &b, LockMode::Shared), LockResult::Granted);

        // Upgrade S -> X must wait for the other reader.
        assert_eq!(manager.convert(res(), &a, LockMode::Exclusive), LockResult::Waiting);
        assert_eq!(a.status(), LockRequestStatus::Converting);

        // New shared arrivals conflict with the reserved X.
        let c = request(3);
        assert_eq!(manager.lock(res(), &c, LockMode::Shared), LockResult::Waiting);

        assert!(manager.unlock(res(), &b));
        assert_eq!(a.notify.wait_for(Duration::from_secs(1)), LockResult::Granted);
        assert_eq!(a.mode(), LockMode::Exclusive);
    }

    #[test]
    fn downgrade_releases_waiters() {
        let manager = LockManager::new();
        let (a, b) = (request(1), request(2));
        assert_eq!(manager.lock(res(), &a, LockMode::Exclusive), LockResult::Granted);
        assert_eq!(manager.lock(res(), &b, LockMode::Shared), LockResult::Waiting);

        manager.downgrade(res(), &a, LockMode::Shared);
        assert_eq!(b.notify.wait_for(Duration::from_secs(1)), LockResult::Granted);
        assert!(manager.granted_sets_are_pairwise_compatible());
    }

    #[test]
    fn fifo_order_is_respected() {
        let manager = LockManager::new();
        let (a, b, c) = (request(1), request(2), request(3));
        assert_eq!(manager.lock(res(), &a, LockMode::Exclusive), LockResult::Granted);
        assert_eq!(manager.lock(res(), &b, LockMode::Exclusive), LockResult::Waiting);
        assert_eq!(manager.lock(res(), &c, LockMode::Exclusive), LockResult::Waiting);

        assert!(manager.unlock(res(), &a));
        assert_eq!(b.status(), LockRequestStatus::Granted);
        assert_eq!(c.status(), LockRequestStatus::Waiting);

        assert!(manager.unlock(res(), &b));
        assert_eq!(c.status(), LockRequestStatus::Granted);
    }

    #[test]
    fn new_request_queues_behind_waiters_of_conflicting_mode() {
        let manager = LockManager::new();
        let (holder, writer, reader) = (request(1), request(2), request(3));
        assert_eq!(manager.lock(res(), &holder, LockMode::Shared), LockResult::Granted);
        assert_eq!(manager.lock(res(), &writer, LockMode::Exclusive), LockResult::Waiting);

        // S is compatible with the granted S, but conflicts with the
        // queued X and there is no compatible-first holder: it queues.
        assert_eq!(manager.lock(res(), &reader, LockMode::Shared), LockResult::Waiting);
    }

    #[test]
    fn snapshot_reports_granted_and_pending() {
        let manager = LockManager::new();
        let (a, b) = (request(1), request(2));
        manager.lock(res(), &a, LockMode::Exclusive);
        manager.lock(res(), &b, LockMode::Shared);

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].granted.len(), 1);
        assert_eq!(snapshot[0].pending.len(), 1);
        assert_eq!(snapshot[0].granted[0].locker_id, 1);
        assert_eq!(snapshot[0].pending[0].mode, LockMode::Shared);
    }

    #[test]
    fn head_is_cleaned_up_when_empty() {
        let manager = LockManager::new();
        let a = request(1);
        manager.lock(res(), &a, LockMode::Exclusive);
        manager.unlock(res(), &a);
        assert!(manager.snapshot().is_empty());
    }
}
