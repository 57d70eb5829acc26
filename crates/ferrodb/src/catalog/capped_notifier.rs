//! Capped-insert notifications.
//!
//! Tailable await-data cursors at EOF park here until a writer inserts
//! into the capped collection. The waiter rechecks the version counter
//! on every wakeup and honors its own deadline; spurious wakeups are
//! harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// Condition-variable notifier bumped on every capped insert.
#[derive(Default)]
pub struct CappedInsertNotifier {
    version: Mutex<u64>,
    cond: Condvar,
    dead: AtomicBool,
}

impl CappedInsertNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The version observed by the most recent insert.
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.lock().expect("notifier poisoned")
    }

    /// Called by the collection write path after each capped insert.
    pub fn notify_all(&self) {
        let mut version = self.version.lock().expect("notifier poisoned");
        *version += 1;
        drop(version);
        self.cond.notify_all();
    }

    /// Wake every waiter permanently; used when the collection goes
    /// away.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Block until the version moves past `since`, the notifier dies, or
    /// `deadline` passes. Returns the version seen on exit.
    pub fn wait_until(&self, since: u64, deadline: Instant) -> u64 {
        let mut version = self.version.lock().expect("notifier poisoned");
        while *version == since && !self.is_dead() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, wait) = self
                .cond
                .wait_timeout(version, deadline - now)
                .expect("notifier poisoned");
            version = guard;
            if wait.timed_out() {
                break;
            }
        }
        *version
    }
}
