//! The per-operation locker.
//!
//! One `Locker` exists per in-flight operation. It owns the operation's
//! lock requests, enforces the hierarchical protocol, draws admission
//! tickets for global acquisition, defers X/IX releases inside a write
//! unit of work, and can save and restore its entire footprint around a
//! yield.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::deadlock::DeadlockDetector;
use crate::manager::LockManager;
use crate::mode::LockMode;
use crate::notify::LockGrantNotification;
use crate::request::{LockRequest, LockRequestStatus, LockResult};
use crate::resource::{ResourceId, ResourceType};
use crate::stats::{LockStats, LockStatsSnapshot, PartitionedLockStats};
use crate::ticket::{TicketPool, DEFAULT_TICKETS};

/// How long a waiter sleeps between deadlock checks while blocked.
pub const DEADLOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors surfaced by blocking lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("timed out waiting for {resource} in mode {mode}")]
    Timeout { resource: ResourceId, mode: LockMode },

    #[error("deadlock detected waiting for {resource} in mode {mode}")]
    Deadlock { resource: ResourceId, mode: LockMode },
}

/// Where an operation stands relative to the ticket pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not holding and not waiting for a ticket.
    Inactive,
    /// Blocked on the reader pool or on the global lock in a shared mode.
    QueuedReader,
    /// Blocked on the writer pool or on the global lock in a write mode.
    QueuedWriter,
    ActiveReader,
    ActiveWriter,
}

/// The reader/writer admission pools.
pub struct TicketHolders {
    pub readers: TicketPool,
    pub writers: TicketPool,
}

impl TicketHolders {
    #[must_use]
    pub fn new(reader_capacity: u32, writer_capacity: u32) -> Self {
        Self {
            readers: TicketPool::new(reader_capacity),
            writers: TicketPool::new(writer_capacity),
        }
    }

    /// The pool a global acquisition in `mode` draws from. Exclusive
    /// mode bypasses admission control entirely.
    #[must_use]
    pub fn pool_for(&self, mode: LockMode) -> Option<&TicketPool> {
        match mode {
            LockMode::Shared | LockMode::IntentShared => Some(&self.readers),
            LockMode::IntentExclusive => Some(&self.writers),
            LockMode::Exclusive | LockMode::None => None,
        }
    }
}

impl Default for TicketHolders {
    fn default() -> Self {
        Self::new(DEFAULT_TICKETS, DEFAULT_TICKETS)
    }
}

/// The long-lived collaborators every locker is constructed over.
///
/// There is no process-global instance inside this crate; whoever
/// bootstraps the server owns one of these and hands it to each
/// operation.
#[derive(Default)]
pub struct ConcurrencyContext {
    pub manager: LockManager,
    pub tickets: TicketHolders,
    pub stats: PartitionedLockStats,
    next_locker_id: AtomicU64,
}

impl ConcurrencyContext {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Context with custom ticket pool capacities.
    #[must_use]
    pub fn with_tickets(reader_capacity: u32, writer_capacity: u32) -> Arc<Self> {
        Arc::new(Self {
            tickets: TicketHolders::new(reader_capacity, writer_capacity),
            ..Self::default()
        })
    }

    fn next_id(&self) -> u64 {
        self.next_locker_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A recorded lock footprint, produced by [`Locker::save_state`].
#[derive(Debug, Clone)]
pub struct LockSnapshot {
    pub global_mode: LockMode,
    /// Non-global locks, sorted ascending by resource id.
    pub locks: Vec<(ResourceId, LockMode)>,
}

/// Aggregates one operation's lock acquisitions.
pub struct Locker {
    id: u64,
    ctx: Arc<ConcurrencyContext>,
    requests: HashMap<ResourceId, Arc<LockRequest>>,
    notify: Arc<LockGrantNotification>,
    client_state: ClientState,
    /// Mode the held ticket was drawn for; `None` when no ticket.
    ticket_mode: LockMode,
    wuow_nesting: u32,
    /// Releases deferred to the end of the write unit of work.
    deferred_unlocks: Vec<ResourceId>,
    stats: LockStats,
}

impl Locker {
    #[must_use]
    pub fn new(ctx: Arc<ConcurrencyContext>) -> Self {
        Self {
            id: ctx.next_id(),
            ctx,
            requests: HashMap::new(),
            notify: Arc::new(LockGrantNotification::new()),
            client_state: ClientState::Inactive,
            ticket_mode: LockMode::None,
            wuow_nesting: 0,
            deferred_unlocks: Vec::new(),
            stats: LockStats::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current admission state; held-but-blocked lockers report as
    /// queued.
    #[must_use]
    pub fn client_state(&self) -> ClientState {
        match self.client_state {
            ClientState::ActiveReader if self.has_lock_pending() => ClientState::QueuedReader,
            ClientState::ActiveWriter if self.has_lock_pending() => ClientState::QueuedWriter,
            other => other,
        }
    }

    /// Acquire the global resource, ticket first.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] when the ticket pool or the lock
    /// wait exceeds `deadline`, and [`LockError::Deadlock`] when the
    /// wait discovered a cycle.
    pub fn lock_global(&mut self, mode: LockMode) -> Result<(), LockError> {
        self.lock_global_with_deadline(mode, None)
    }

    /// [`Locker::lock_global`] with an explicit deadline.
    ///
    /// # Errors
    ///
    /// See [`Locker::lock_global`].
    pub fn lock_global_with_deadline(
        &mut self,
        mode: LockMode,
        deadline: Option<Instant>,
    ) -> Result<(), LockError> {
        debug_assert!(mode != LockMode::None);
        if self.ticket_mode == LockMode::None {
            let reader = mode.is_shared();
            if let Some(pool) = self.ctx.tickets.pool_for(mode) {
                self.client_state =
                    if reader { ClientState::QueuedReader } else { ClientState::QueuedWriter };
                match deadline {
                    None => pool.wait_for_ticket(),
                    Some(deadline) => {
                        if !pool.wait_for_ticket_until(deadline) {
                            self.client_state = ClientState::Inactive;
                            return Err(LockError::Timeout {
                                resource: ResourceId::global(),
                                mode,
                            });
                        }
                    }
                }
            }
            self.client_state =
                if mode.is_shared() { ClientState::ActiveReader } else { ClientState::ActiveWriter };
            self.ticket_mode = mode;
        }
        self.lock(ResourceId::global(), mode, deadline, false)
    }

    /// Acquire `resource` in `mode`, blocking until granted, the
    /// deadline passes, or (when `check_deadlock` is set) a cycle is
    /// found.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] or [`LockError::Deadlock`]; in
    /// both cases the queued request has been detached.
    pub fn lock(
        &mut self,
        resource: ResourceId,
        mode: LockMode,
        deadline: Option<Instant>,
        check_deadlock: bool,
    ) -> Result<(), LockError> {
        match self.lock_begin(resource, mode) {
            LockResult::Granted => Ok(()),
            LockResult::Waiting => self.lock_complete(resource, mode, deadline, check_deadlock),
            _ => unreachable!("lock_begin returns Granted or Waiting"),
        }
    }

    /// Present the request to the manager without blocking.
    pub fn lock_begin(&mut self, resource: ResourceId, mode: LockMode) -> LockResult {
        let rtype = resource.rtype();
        let (request, is_new) = match self.requests.get(&resource) {
            Some(existing) => (Arc::clone(existing), false),
            None => {
                let request = LockRequest::new(self.id, Arc::clone(&self.notify));
                self.requests.insert(resource, Arc::clone(&request));
                (request, true)
            }
        };

        self.ctx.stats.record_acquisition(self.id, resource, mode);
        self.stats.record_acquisition(resource, mode);

        if is_new {
            match rtype {
                ResourceType::Global | ResourceType::FlushSentinel => {
                    // High-priority singleton requests jump the queue and
                    // fence later arrivals behind themselves.
                    if matches!(mode, LockMode::Shared | LockMode::Exclusive) {
                        request.enqueue_at_front.store(true, Ordering::Relaxed);
                        request.compatible_first.store(true, Ordering::Relaxed);
                    }
                }
                ResourceType::Mutex | ResourceType::Invalid => {}
                ResourceType::Database | ResourceType::Collection | ResourceType::Metadata => {
                    debug_assert!(
                        self.is_locked(),
                        "hierarchy violation: {resource} acquired without the global lock"
                    );
                }
            }
        }

        self.notify.clear();
        let result = if is_new {
            self.ctx.manager.lock(resource, &request, mode)
        } else {
            self.ctx.manager.convert(resource, &request, mode)
        };

        if result == LockResult::Waiting {
            self.ctx.stats.record_wait(self.id, resource, mode);
            self.stats.record_wait(resource, mode);
        }
        result
    }

    /// Block on the notification until the pending request resolves.
    ///
    /// # Errors
    ///
    /// See [`Locker::lock`].
    pub fn lock_complete(
        &mut self,
        resource: ResourceId,
        mode: LockMode,
        deadline: Option<Instant>,
        check_deadlock: bool,
    ) -> Result<(), LockError> {
        loop {
            let wait = match deadline {
                None => DEADLOCK_TIMEOUT,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.detach_failed_request(resource);
                        return Err(LockError::Timeout { resource, mode });
                    }
                    (deadline - now).min(DEADLOCK_TIMEOUT)
                }
            };

            let started = Instant::now();
            let result = self.notify.wait_for(wait);
            let waited = started.elapsed().as_micros() as u64;
            self.ctx.stats.record_wait_time(self.id, resource, mode, waited);
            self.stats.record_wait_time(resource, mode, waited);

            match result {
                LockResult::Granted => return Ok(()),
                LockResult::Timeout => {
                    if check_deadlock {
                        let cycle = DeadlockDetector::new(&self.ctx.manager, self.id).check();
                        if !cycle.is_empty() {
                            warn!(
                                locker = self.id,
                                resource = %resource,
                                ?cycle,
                                "deadlock detected; abandoning lock request"
                            );
                            self.ctx.stats.record_deadlock(self.id, resource, mode);
                            self.stats.record_deadlock(resource, mode);
                            self.detach_failed_request(resource);
                            return Err(LockError::Deadlock { resource, mode });
                        }
                    }
                }
                LockResult::Waiting | LockResult::Deadlock => {
                    unreachable!("notification carries a terminal result")
                }
            }
        }
    }

    /// Release one acquisition of `resource`.
    ///
    /// Inside a write unit of work, X/IX releases of transactional
    /// resources are deferred to the unit's end; the call then returns
    /// `false`. Otherwise returns `true` when the resource was fully
    /// released.
    pub fn unlock(&mut self, resource: ResourceId) -> bool {
        if self.wuow_nesting > 0 && self.should_delay_unlock(resource) {
            self.deferred_unlocks.push(resource);
            return false;
        }
        self.unlock_impl(resource)
    }

    fn should_delay_unlock(&self, resource: ResourceId) -> bool {
        let transactional = matches!(
            resource.rtype(),
            ResourceType::Database | ResourceType::Collection | ResourceType::Metadata
        );
        if !transactional {
            return false;
        }
        let mode = self.requests.get(&resource).map_or(LockMode::None, |r| r.mode());
        matches!(mode, LockMode::Exclusive | LockMode::IntentExclusive)
    }

    fn unlock_impl(&mut self, resource: ResourceId) -> bool {
        let Some(request) = self.requests.get(&resource).map(Arc::clone) else {
            debug_assert!(false, "unlock of unheld resource {resource}");
            return false;
        };
        if self.ctx.manager.unlock(resource, &request) {
            if resource.is_global() && self.ticket_mode != LockMode::None {
                if let Some(pool) = self.ctx.tickets.pool_for(self.ticket_mode) {
                    pool.release();
                }
                self.ticket_mode = LockMode::None;
                self.client_state = ClientState::Inactive;
            }
            self.requests.remove(&resource);
            true
        } else {
            false
        }
    }

    /// Detach a request whose wait failed; used by timeout and deadlock
    /// paths.
    fn detach_failed_request(&mut self, resource: ResourceId) {
        self.unlock_impl(resource);
    }

    /// Release the global lock and everything below it. Returns `false`
    /// when the global lock is still held recursively.
    pub fn unlock_global(&mut self) -> bool {
        if !self.unlock(ResourceId::global()) {
            return false;
        }
        debug_assert_eq!(self.wuow_nesting, 0);
        let resources: Vec<ResourceId> = self
            .requests
            .keys()
            .filter(|res| !matches!(res.rtype(), ResourceType::Global | ResourceType::Mutex))
            .copied()
            .collect();
        for resource in resources {
            let released = self.unlock_impl(resource);
            debug_assert!(released);
        }
        true
    }

    /// Enter a write unit of work. Nests.
    pub fn begin_write_unit_of_work(&mut self) {
        self.wuow_nesting += 1;
    }

    /// Leave a write unit of work; at the outermost level every deferred
    /// release fires.
    pub fn end_write_unit_of_work(&mut self) {
        debug_assert!(self.wuow_nesting > 0, "unbalanced write unit of work");
        self.wuow_nesting -= 1;
        if self.wuow_nesting > 0 {
            return;
        }
        let deferred = std::mem::take(&mut self.deferred_unlocks);
        for resource in deferred {
            self.unlock_impl(resource);
        }
    }

    #[must_use]
    pub fn in_write_unit_of_work(&self) -> bool {
        self.wuow_nesting > 0
    }

    /// Atomically release every non-mutex lock, recording what was held.
    ///
    /// Returns `None` (and releases nothing) when the locker holds no
    /// global lock, or holds it recursively, since a partial snapshot
    /// could not be restored faithfully.
    pub fn save_state(&mut self) -> Option<LockSnapshot> {
        debug_assert!(!self.in_write_unit_of_work(), "cannot yield inside a write unit of work");

        let global = self.requests.get(&ResourceId::global())?;
        if global.recursive_count() > 1 {
            return None;
        }
        let global_mode = global.mode();

        let mut entries: Vec<(ResourceId, LockMode)> = self
            .requests
            .iter()
            .filter(|(res, _)| res.rtype() != ResourceType::Mutex && !res.is_global())
            .map(|(res, req)| (*res, req.mode()))
            .collect();

        let released = self.unlock_impl(ResourceId::global());
        debug_assert!(released);
        for (resource, _) in &entries {
            let released = self.unlock_impl(*resource);
            debug_assert!(released, "saved lock {resource} was held recursively");
        }
        debug_assert!(!self.is_locked());

        entries.sort_unstable_by_key(|(res, _)| *res);
        Some(LockSnapshot { global_mode, locks: entries })
    }

    /// Reacquire a saved footprint: parallel-batch-writer first, then
    /// the global lock, then everything else ascending by resource id,
    /// so concurrent restorers cannot introduce new cycles.
    ///
    /// # Errors
    ///
    /// Propagates lock errors from reacquisition.
    pub fn restore_state(&mut self, snapshot: &LockSnapshot) -> Result<(), LockError> {
        debug_assert!(!self.in_write_unit_of_work());
        debug_assert_eq!(self.ticket_mode, LockMode::None);

        let mut locks = snapshot.locks.iter().peekable();
        if let Some(&&(resource, mode)) = locks.peek() {
            if resource == ResourceId::parallel_batch_writer() {
                self.lock(resource, mode, None, false)?;
                locks.next();
            }
        }
        self.lock_global(snapshot.global_mode)?;
        for &(resource, mode) in locks {
            self.lock(resource, mode, None, false)?;
        }
        Ok(())
    }

    /// The mode held on `resource`, or `None`.
    #[must_use]
    pub fn lock_mode(&self, resource: ResourceId) -> LockMode {
        self.requests.get(&resource).map_or(LockMode::None, |r| r.mode())
    }

    /// Whether the held mode on `resource` covers `mode`.
    #[must_use]
    pub fn is_lock_held_for_mode(&self, resource: ResourceId, mode: LockMode) -> bool {
        self.lock_mode(resource).covers(mode)
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_mode(ResourceId::global()) != LockMode::None
    }

    /// Global exclusive.
    #[must_use]
    pub fn is_w(&self) -> bool {
        self.lock_mode(ResourceId::global()) == LockMode::Exclusive
    }

    /// Global shared.
    #[must_use]
    pub fn is_r(&self) -> bool {
        self.lock_mode(ResourceId::global()) == LockMode::Shared
    }

    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.is_lock_held_for_mode(ResourceId::global(), LockMode::IntentExclusive)
    }

    #[must_use]
    pub fn is_read_locked(&self) -> bool {
        self.is_lock_held_for_mode(ResourceId::global(), LockMode::IntentShared)
    }

    /// Hierarchy-aware database lock check: a global S/X subsumes every
    /// database.
    #[must_use]
    pub fn is_db_locked_for_mode(&self, db: &str, mode: LockMode) -> bool {
        if self.is_w() {
            return true;
        }
        if self.is_r() && mode.is_shared() {
            return true;
        }
        self.is_lock_held_for_mode(ResourceId::for_database(db), mode)
    }

    /// Hierarchy-aware collection lock check.
    #[must_use]
    pub fn is_collection_locked_for_mode(&self, ns: &str, mode: LockMode) -> bool {
        if self.is_w() {
            return true;
        }
        if self.is_r() && mode.is_shared() {
            return true;
        }
        let db = ns.split('.').next().unwrap_or(ns);
        match self.lock_mode(ResourceId::for_database(db)) {
            LockMode::None => false,
            LockMode::Exclusive => true,
            LockMode::Shared => mode.is_shared(),
            LockMode::IntentShared | LockMode::IntentExclusive => {
                self.is_lock_held_for_mode(ResourceId::for_collection(ns), mode)
            }
        }
    }

    /// The resource this locker is currently blocked on, if any.
    #[must_use]
    pub fn waiting_resource(&self) -> Option<ResourceId> {
        self.requests.iter().find_map(|(res, req)| {
            matches!(
                req.status(),
                LockRequestStatus::Waiting | LockRequestStatus::Converting
            )
            .then_some(*res)
        })
    }

    fn has_lock_pending(&self) -> bool {
        self.waiting_resource().is_some()
    }

    /// This operation's own lock statistics.
    #[must_use]
    pub fn stats(&self) -> LockStatsSnapshot {
        self.stats.snapshot()
    }

    /// Held (resource, mode) pairs, for diagnostics.
    #[must_use]
    pub fn held_locks(&self) -> Vec<(ResourceId, LockMode)> {
        let mut held: Vec<(ResourceId, LockMode)> =
            self.requests.iter().map(|(res, req)| (*res, req.mode())).collect();
        held.sort_unstable_by_key(|(res, _)| *res);
        held
    }
}

impl Drop for Locker {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        // The manager would otherwise keep references to requests whose
        // owner is gone.
        debug_assert!(!self.in_write_unit_of_work(), "locker dropped inside a write unit of work");
        debug_assert!(self.deferred_unlocks.is_empty());
        debug_assert!(
            self.requests.is_empty(),
            "locker dropped with outstanding requests: {:?}",
            self.requests.keys().collect::<Vec<_>>()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Arc<ConcurrencyContext> {
        ConcurrencyContext::new()
    }

    #[test]
    fn global_then_hierarchy() {
        let ctx = context();
        let mut locker = Locker::new(Arc::clone(&ctx));

        locker.lock_global(LockMode::IntentExclusive).expect("global");
        assert_eq!(locker.client_state(), ClientState::ActiveWriter);
        assert_eq!(ctx.tickets.writers.used(), 1);

        let db = ResourceId::for_database("app");
        let coll = ResourceId::for_collection("app.users");
        locker.lock(db, LockMode::IntentExclusive, None, false).expect("db");
        locker.lock(coll, LockMode::Exclusive, None, false).expect("coll");

        assert!(locker.is_db_locked_for_mode("app", LockMode::IntentExclusive));
        assert!(locker.is_collection_locked_for_mode("app.users", LockMode::Exclusive));

        assert!(locker.unlock(coll));
        assert!(locker.unlock(db));
        assert!(locker.unlock_global());
        assert_eq!(ctx.tickets.writers.used(), 0);
        assert_eq!(locker.client_state(), ClientState::Inactive);
    }

    #[test]
    fn recursive_global_releases_on_last_unlock() {
        let ctx = context();
        let mut locker = Locker::new(ctx);
        locker.lock_global(LockMode::IntentShared).expect("first");
        locker.lock_global(LockMode::IntentShared).expect("second");

        assert!(!locker.unlock(ResourceId::global()));
        assert!(locker.unlock(ResourceId::global()));
        assert!(!locker.is_locked());
    }

    #[test]
    fn wuow_defers_exclusive_releases() {
        let ctx = context();
        let mut locker = Locker::new(ctx);
        locker.lock_global(LockMode::IntentExclusive).expect("global");
        let db = ResourceId::for_database("app");
        locker.lock(db, LockMode::Exclusive, None, false).expect("db");

        locker.begin_write_unit_of_work();
        assert!(!locker.unlock(db));
        // Still held: the release is parked until the unit ends.
        assert_eq!(locker.lock_mode(db), LockMode::Exclusive);

        locker.begin_write_unit_of_work();
        locker.end_write_unit_of_work();
        assert_eq!(locker.lock_mode(db), LockMode::Exclusive);

        locker.end_write_unit_of_work();
        assert_eq!(locker.lock_mode(db), LockMode::None);

        locker.unlock_global();
    }

    #[test]
    fn shared_releases_are_not_deferred() {
        let ctx = context();
        let mut locker = Locker::new(ctx);
        locker.lock_global(LockMode::IntentShared).expect("global");
        let db = ResourceId::for_database("app");
        locker.lock(db, LockMode::IntentShared, None, false).expect("db");

        locker.begin_write_unit_of_work();
        assert!(locker.unlock(db));
        locker.end_write_unit_of_work();
        locker.unlock_global();
    }

    #[test]
    fn save_and_restore_round_trips() {
        let ctx = context();
        let mut locker = Locker::new(Arc::clone(&ctx));
        locker.lock_global(LockMode::IntentShared).expect("global");
        let db = ResourceId::for_database("app");
        let coll = ResourceId::for_collection("app.users");
        locker.lock(db, LockMode::IntentShared, None, false).expect("db");
        locker.lock(coll, LockMode::IntentShared, None, false).expect("coll");

        let snapshot = locker.save_state().expect("saveable");
        assert!(!locker.is_locked());
        assert_eq!(ctx.tickets.readers.used(), 0);
        assert_eq!(snapshot.global_mode, LockMode::IntentShared);
        assert_eq!(snapshot.locks, vec![(db, LockMode::IntentShared), (coll, LockMode::IntentShared)]);

        locker.restore_state(&snapshot).expect("restore");
        assert_eq!(locker.lock_mode(coll), LockMode::IntentShared);
        assert_eq!(ctx.tickets.readers.used(), 1);

        locker.unlock_global();
    }

    #[test]
    fn save_state_refuses_recursive_global() {
        let ctx = context();
        let mut locker = Locker::new(ctx);
        locker.lock_global(LockMode::IntentShared).expect("first");
        locker.lock_global(LockMode::IntentShared).expect("second");
        assert!(locker.save_state().is_none());

        locker.unlock(ResourceId::global());
        locker.unlock(ResourceId::global());
    }

    #[test]
    fn lock_timeout_detaches_request() {
        let ctx = context();
        let mut holder = Locker::new(Arc::clone(&ctx));
        holder.lock_global(LockMode::Exclusive).expect("holder");

        let mut waiter = Locker::new(Arc::clone(&ctx));
        let deadline = Instant::now() + Duration::from_millis(50);
        let err = waiter
            .lock_global_with_deadline(LockMode::IntentShared, Some(deadline))
            .expect_err("must time out");
        assert!(matches!(err, LockError::Timeout { .. }));
        // The failed waiter left no residue in the manager.
        assert!(waiter.held_locks().is_empty());
        // Its ticket went back to the pool.
        assert_eq!(ctx.tickets.readers.used(), 0);

        holder.unlock_global();
    }
}
