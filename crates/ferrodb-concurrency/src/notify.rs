//! Lock-grant notifications.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::request::LockResult;

/// The channel through which the lock manager wakes a blocked waiter.
///
/// The waiter holds no lock-manager state while blocked: it parks on the
/// condition variable, rechecks the predicate on every wakeup, and
/// honors its own deadline. One notification is reused across a locker's
/// successive blocking acquisitions (it can only wait for one resource
/// at a time).
#[derive(Default)]
pub struct LockGrantNotification {
    result: Mutex<Option<LockResult>>,
    cond: Condvar,
}

impl LockGrantNotification {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset before enqueueing a new request.
    pub fn clear(&self) {
        *self.result.lock().expect("notification poisoned") = None;
    }

    /// Block until notified or until `timeout` elapses.
    ///
    /// Returns [`LockResult::Timeout`] when the interval expires without
    /// a grant; the caller decides whether to keep waiting.
    pub fn wait_for(&self, timeout: Duration) -> LockResult {
        let guard = self.result.lock().expect("notification poisoned");
        let (mut guard, wait) = self
            .cond
            .wait_timeout_while(guard, timeout, |result| result.is_none())
            .expect("notification poisoned");
        if wait.timed_out() {
            return LockResult::Timeout;
        }
        guard.take().unwrap_or(LockResult::Timeout)
    }

    /// Deliver a result and wake the waiter.
    pub fn notify(&self, result: LockResult) {
        let mut guard = self.result.lock().expect("notification poisoned");
        debug_assert!(guard.is_none(), "double notification");
        *guard = Some(result);
        drop(guard);
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn wait_times_out_without_notify() {
        let notify = LockGrantNotification::new();
        assert_eq!(notify.wait_for(Duration::from_millis(10)), LockResult::Timeout);
    }

    #[test]
    fn notify_wakes_waiter() {
        let notify = Arc::new(LockGrantNotification::new());
        let signaler = Arc::clone(&notify);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.notify(LockResult::Granted);
        });
        assert_eq!(notify.wait_for(Duration::from_secs(5)), LockResult::Granted);
        handle.join().expect("signaler");
    }

    #[test]
    fn clear_resets_for_reuse() {
        let notify = LockGrantNotification::new();
        notify.notify(LockResult::Deadlock);
        assert_eq!(notify.wait_for(Duration::from_millis(1)), LockResult::Deadlock);
        notify.clear();
        assert_eq!(notify.wait_for(Duration::from_millis(1)), LockResult::Timeout);
    }
}
