//! Operation contexts and write units of work.
//!
//! Every in-flight operation owns one [`OperationContext`]: its locker,
//! its recovery unit, a deadline, and a kill token other threads can
//! trip. Catalog writers and mutation stages bracket their changes with
//! a write unit of work, inside which X/IX lock releases are deferred
//! and registered change hooks resolve atomically on commit or
//! rollback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use ferrodb_concurrency::{ConcurrencyContext, Locker};
use ferrodb_storage::RecoveryUnit;
use serde::Serialize;

use crate::error::{Error, Result};

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Cross-thread kill switch for one operation.
#[derive(Default)]
pub struct KillToken {
    killed: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl KillToken {
    /// Trip the switch. The first reason wins.
    pub fn kill(&self, reason: impl Into<String>) {
        let mut slot = self.reason.lock().expect("kill token poisoned");
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        self.killed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().expect("kill token poisoned").clone()
    }
}

/// Client identity attached to an operation for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientDescriptor {
    pub desc: String,
    pub connection_id: u64,
    pub client_address: String,
}

/// Registry mapping locker ids to operation/client identity, consulted
/// by the `lockInfo` command.
#[derive(Default)]
pub struct OperationRegistry {
    entries: RwLock<std::collections::HashMap<u64, (u64, ClientDescriptor)>>,
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, locker_id: u64, op_id: u64, client: ClientDescriptor) {
        self.entries.write().expect("registry poisoned").insert(locker_id, (op_id, client));
    }

    fn deregister(&self, locker_id: u64) {
        self.entries.write().expect("registry poisoned").remove(&locker_id);
    }

    /// The (operation id, client) pair for a locker, if registered.
    #[must_use]
    pub fn lookup(&self, locker_id: u64) -> Option<(u64, ClientDescriptor)> {
        self.entries.read().expect("registry poisoned").get(&locker_id).cloned()
    }
}

/// Per-operation execution state.
pub struct OperationContext {
    op_id: u64,
    locker: Locker,
    recovery: RecoveryUnit,
    deadline: Option<Instant>,
    kill_token: Arc<KillToken>,
    registry: Option<Arc<OperationRegistry>>,
    wuow_depth: u32,
}

impl OperationContext {
    #[must_use]
    pub fn new(concurrency: Arc<ConcurrencyContext>) -> Self {
        Self {
            op_id: NEXT_OP_ID.fetch_add(1, Ordering::Relaxed),
            locker: Locker::new(concurrency),
            recovery: RecoveryUnit::new(),
            deadline: None,
            kill_token: Arc::new(KillToken::default()),
            registry: None,
            wuow_depth: 0,
        }
    }

    /// Construct with a client identity recorded in `registry` for the
    /// lifetime of the operation.
    #[must_use]
    pub fn with_client(
        concurrency: Arc<ConcurrencyContext>,
        registry: Arc<OperationRegistry>,
        client: ClientDescriptor,
    ) -> Self {
        let mut opctx = Self::new(concurrency);
        registry.register(opctx.locker.id(), opctx.op_id, client);
        opctx.registry = Some(registry);
        opctx
    }

    #[must_use]
    pub fn op_id(&self) -> u64 {
        self.op_id
    }

    #[must_use]
    pub fn locker(&mut self) -> &mut Locker {
        &mut self.locker
    }

    #[must_use]
    pub fn locker_ref(&self) -> &Locker {
        &self.locker
    }

    #[must_use]
    pub fn recovery_unit(&mut self) -> &mut RecoveryUnit {
        &mut self.recovery
    }

    /// Limit the operation's total runtime.
    pub fn set_deadline_after(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    #[must_use]
    pub fn remaining_time(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// A handle other threads may use to kill this operation.
    #[must_use]
    pub fn kill_token(&self) -> Arc<KillToken> {
        Arc::clone(&self.kill_token)
    }

    /// Cooperative cancellation point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] when killed and
    /// [`Error::ExceededTimeLimit`] when past the deadline.
    pub fn check_for_interrupt(&self) -> Result<()> {
        if self.kill_token.is_killed() {
            return Err(Error::Interrupted(self.kill_token.reason()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::ExceededTimeLimit);
            }
        }
        Ok(())
    }

    /// Enter a write unit of work. Nests.
    pub fn begin_write_unit_of_work(&mut self) {
        self.wuow_depth += 1;
        self.locker.begin_write_unit_of_work();
    }

    /// Commit the unit: at the outermost level, run every registered
    /// commit hook, then release the deferred locks.
    pub fn commit_write_unit_of_work(&mut self) {
        debug_assert!(self.wuow_depth > 0, "unbalanced write unit of work");
        self.wuow_depth -= 1;
        if self.wuow_depth == 0 {
            self.recovery.commit();
        }
        self.locker.end_write_unit_of_work();
    }

    /// Abort the unit: at the outermost level, run every registered
    /// rollback hook, then release the deferred locks.
    pub fn abort_write_unit_of_work(&mut self) {
        debug_assert!(self.wuow_depth > 0, "unbalanced write unit of work");
        self.wuow_depth -= 1;
        if self.wuow_depth == 0 {
            self.recovery.abandon();
        }
        self.locker.end_write_unit_of_work();
    }

    #[must_use]
    pub fn in_write_unit_of_work(&self) -> bool {
        self.wuow_depth > 0
    }
}

impl Drop for OperationContext {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            registry.deregister(self.locker.id());
        }
    }
}

/// Run `f` inside a write unit of work, committing on `Ok` and rolling
/// back on `Err`.
///
/// # Errors
///
/// Propagates whatever `f` returns.
pub fn with_write_unit_of_work<T>(
    opctx: &mut OperationContext,
    f: impl FnOnce(&mut OperationContext) -> Result<T>,
) -> Result<T> {
    opctx.begin_write_unit_of_work();
    match f(opctx) {
        Ok(value) => {
            opctx.commit_write_unit_of_work();
            Ok(value)
        }
        Err(err) => {
            opctx.abort_write_unit_of_work();
            Err(err)
        }
    }
}
