//! Lock requests.
//!
//! One [`LockRequest`] exists per (locker, resource) pair. The locker
//! creates it on first acquisition and holds it in its request map; the
//! lock manager links clones of the same `Arc` into the resource's lock
//! head while the request is granted or queued. The request dies when
//! its recursive count returns to zero through unlock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::mode::LockMode;
use crate::notify::LockGrantNotification;

/// Outcome of a lock call or a wait on its notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// The request is on the grant list.
    Granted,
    /// The request is queued; the notification fires on grant.
    Waiting,
    /// The wait deadline expired.
    Timeout,
    /// The waiter detected a cycle and gave up.
    Deadlock,
}

/// Where a request currently stands with the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRequestStatus {
    /// Created but not yet presented to the manager.
    New,
    Granted,
    /// Granted in one mode while an upgrade to a stronger one waits.
    Converting,
    Waiting,
}

impl LockRequestStatus {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Granted => "granted",
            Self::Converting => "converting",
            Self::Waiting => "waiting",
        }
    }
}

/// Mutable request state, guarded by one mutex so the locker and the
/// manager observe it consistently.
#[derive(Debug)]
pub struct RequestState {
    pub status: LockRequestStatus,
    /// Mode currently held (or requested, while waiting).
    pub mode: LockMode,
    /// Target mode of a pending conversion.
    pub convert_mode: LockMode,
    /// Net count of acquisitions since the request was created.
    pub recursive_count: u32,
}

/// A single locker's request against a single resource.
pub struct LockRequest {
    /// Id of the owning locker, the node identity in the wait-for graph.
    pub locker_id: u64,
    /// Completion channel back to the owning locker.
    pub notify: Arc<LockGrantNotification>,
    /// Queue-jump flag for global-resource S/X requests.
    pub enqueue_at_front: AtomicBool,
    /// Starvation-avoidance flag: while this request heads the conflict
    /// queue, only requests compatible with it may bypass it.
    pub compatible_first: AtomicBool,
    state: Mutex<RequestState>,
}

impl LockRequest {
    #[must_use]
    pub fn new(locker_id: u64, notify: Arc<LockGrantNotification>) -> Arc<Self> {
        Arc::new(Self {
            locker_id,
            notify,
            enqueue_at_front: AtomicBool::new(false),
            compatible_first: AtomicBool::new(false),
            state: Mutex::new(RequestState {
                status: LockRequestStatus::New,
                mode: LockMode::None,
                convert_mode: LockMode::None,
                recursive_count: 0,
            }),
        })
    }

    /// Lock the request state for inspection or mutation.
    pub fn state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().expect("lock request poisoned")
    }

    #[must_use]
    pub fn status(&self) -> LockRequestStatus {
        self.state().status
    }

    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.state().mode
    }

    #[must_use]
    pub fn recursive_count(&self) -> u32 {
        self.state().recursive_count
    }

    #[must_use]
    pub fn is_enqueue_at_front(&self) -> bool {
        self.enqueue_at_front.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_compatible_first(&self) -> bool {
        self.compatible_first.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LockRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("LockRequest")
            .field("locker_id", &self.locker_id)
            .field("status", &state.status)
            .field("mode", &state.mode)
            .field("recursive_count", &state.recursive_count)
            .finish()
    }
}
