//! Admission-control ticket pools.
//!
//! A ticket pool is a counting semaphore that bounds the number of
//! concurrently active readers or writers in the server. It is entirely
//! independent of the lock manager's fairness: a locker must hold a
//! ticket before it may even present its global lock request.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Default capacity of each of the reader and writer pools.
pub const DEFAULT_TICKETS: u32 = 128;

/// A bounded pool of admission tickets.
pub struct TicketPool {
    capacity: u32,
    available: Mutex<u32>,
    cond: Condvar,
}

impl TicketPool {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self { capacity, available: Mutex::new(capacity), cond: Condvar::new() }
    }

    /// The configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tickets not currently held.
    #[must_use]
    pub fn available(&self) -> u32 {
        *self.available.lock().expect("ticket pool poisoned")
    }

    /// Tickets currently held.
    #[must_use]
    pub fn used(&self) -> u32 {
        self.capacity - self.available()
    }

    /// Take a ticket without blocking. Returns `false` when exhausted.
    pub fn try_acquire(&self) -> bool {
        let mut available = self.available.lock().expect("ticket pool poisoned");
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    /// Block until a ticket is available.
    pub fn wait_for_ticket(&self) {
        let mut available = self.available.lock().expect("ticket pool poisoned");
        while *available == 0 {
            available = self.cond.wait(available).expect("ticket pool poisoned");
        }
        *available -= 1;
    }

    /// Block until a ticket is available or the deadline passes.
    /// Returns `false` on timeout.
    pub fn wait_for_ticket_until(&self, deadline: Instant) -> bool {
        let mut available = self.available.lock().expect("ticket pool poisoned");
        while *available == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, wait) = self
                .cond
                .wait_timeout(available, deadline - now)
                .expect("ticket pool poisoned");
            available = guard;
            if wait.timed_out() && *available == 0 {
                return false;
            }
        }
        *available -= 1;
        true
    }

    /// Return a ticket to the pool.
    pub fn release(&self) {
        let mut available = self.available.lock().expect("ticket pool poisoned");
        debug_assert!(*available < self.capacity, "ticket released twice");
        *available += 1;
        drop(available);
        self.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn try_acquire_until_exhausted() {
        let pool = TicketPool::new(2);
        assert!(pool.try_acquire());
        assert!(pool.try_acquire());
        assert!(!pool.try_acquire());
        assert_eq!(pool.used(), 2);

        pool.release();
        assert!(pool.try_acquire());
    }

    #[test]
    fn wait_until_deadline_times_out() {
        let pool = TicketPool::new(1);
        assert!(pool.try_acquire());
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(!pool.wait_for_ticket_until(deadline));
    }

    #[test]
    fn release_wakes_waiter() {
        let pool = Arc::new(TicketPool::new(1));
        assert!(pool.try_acquire());

        let waiter_pool = Arc::clone(&pool);
        let waiter = thread::spawn(move || {
            waiter_pool.wait_for_ticket();
        });

        thread::sleep(Duration::from_millis(10));
        pool.release();
        waiter.join().expect("waiter");
        assert_eq!(pool.used(), 1);
    }
}
