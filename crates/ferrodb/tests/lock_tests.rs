//! Lock manager and locker integration tests.
//!
//! Covers the deadlock and anti-starvation scenarios, the pairwise
//! compatibility invariant under concurrency, ticket admission, and
//! write-unit-of-work release deferment across lockers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use ferrodb_concurrency::{
    ConcurrencyContext, LockError, LockGrantNotification, LockManager, LockMode, LockRequest,
    LockResult, Locker, ResourceId,
};

// ============================================================================
// Deadlock (S1)
// ============================================================================

/// Two lockers acquire X on different collections, then each requests
/// the other's. Both must terminate within the deadlock interval, and
/// they cannot both succeed.
#[test]
fn crossing_exclusive_requests_deadlock() {
    let ctx = ConcurrencyContext::new();
    let res_x = ResourceId::for_collection("db.x");
    let res_y = ResourceId::for_collection("db.y");

    let deadlocks = Arc::new(AtomicUsize::new(0));
    let successes = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(2));

    let spawn = |first: ResourceId, second: ResourceId| {
        let ctx = Arc::clone(&ctx);
        let barrier = Arc::clone(&barrier);
        let deadlocks = Arc::clone(&deadlocks);
        let successes = Arc::clone(&successes);
        thread::spawn(move || {
            let mut locker = Locker::new(ctx);
            locker.lock_global(LockMode::IntentExclusive).expect("global");
            locker.lock(first, LockMode::Exclusive, None, false).expect("first resource");
            barrier.wait();

            match locker.lock(second, LockMode::Exclusive, None, true) {
                Ok(()) => {
                    successes.fetch_add(1, Ordering::SeqCst);
                    locker.unlock(second);
                }
                Err(LockError::Deadlock { .. }) => {
                    deadlocks.fetch_add(1, Ordering::SeqCst);
                }
                Err(other) => panic!("unexpected lock error: {other}"),
            }
            locker.unlock(first);
            locker.unlock_global();
        })
    };

    let started = Instant::now();
    let a = spawn(res_x, res_y);
    let b = spawn(res_y, res_x);
    a.join().expect("locker a");
    b.join().expect("locker b");

    // Both terminated; at least one saw the cycle, and they can never
    // both have been granted.
    assert!(deadlocks.load(Ordering::SeqCst) >= 1);
    assert!(successes.load(Ordering::SeqCst) <= 1);
    // Terminated within a small number of deadlock poll intervals.
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ============================================================================
// Anti-starvation (S2)
// ============================================================================

fn request(locker_id: u64) -> Arc<LockRequest> {
    LockRequest::new(locker_id, Arc::new(LockGrantNotification::new()))
}

/// An exclusive global request with front-of-queue priority fences
/// later shared arrivals behind itself, and is granted before them once
/// the existing holders drain.
#[test]
fn priority_exclusive_is_not_starved_by_readers() {
    let manager = LockManager::new();
    let global = ResourceId::global();

    let holder_a = request(1);
    let holder_b = request(2);
    assert_eq!(manager.lock(global, &holder_a, LockMode::IntentShared), LockResult::Granted);
    assert_eq!(manager.lock(global, &holder_b, LockMode::IntentShared), LockResult::Granted);

    // The writer arrives with both priority flags, as the locker sets
    // for global S/X requests.
    let writer = request(3);
    writer.enqueue_at_front.store(true, Ordering::Relaxed);
    writer.compatible_first.store(true, Ordering::Relaxed);
    assert_eq!(manager.lock(global, &writer, LockMode::Exclusive), LockResult::Waiting);

    // Late shared arrivals are compatible with the granted IS holders
    // but must wait behind the queued X.
    let late = request(4);
    assert_eq!(manager.lock(global, &late, LockMode::IntentShared), LockResult::Waiting);

    assert!(manager.unlock(global, &holder_a));
    assert_eq!(writer.notify.wait_for(Duration::from_millis(50)), LockResult::Timeout);
    assert!(manager.unlock(global, &holder_b));

    // All prior holders gone: the writer wins before any late reader.
    assert_eq!(writer.notify.wait_for(Duration::from_secs(1)), LockResult::Granted);
    assert_eq!(late.notify.wait_for(Duration::from_millis(50)), LockResult::Timeout);

    assert!(manager.unlock(global, &writer));
    assert_eq!(late.notify.wait_for(Duration::from_secs(1)), LockResult::Granted);
    assert!(manager.unlock(global, &late));
}

/// While a compatible-first holder is granted, new compatible arrivals
/// may bypass a conflict queue that would otherwise fence them.
#[test]
fn compatible_first_holder_lets_compatible_requests_bypass() {
    let manager = LockManager::new();
    let global = ResourceId::global();

    let holder = request(1);
    holder.enqueue_at_front.store(true, Ordering::Relaxed);
    holder.compatible_first.store(true, Ordering::Relaxed);
    assert_eq!(manager.lock(global, &holder, LockMode::Shared), LockResult::Granted);

    // A writer queues behind the shared holder.
    let writer = request(2);
    assert_eq!(manager.lock(global, &writer, LockMode::IntentExclusive), LockResult::Waiting);

    // A new shared request conflicts with the queued IX but the
    // compatible-first holder lets it through.
    let reader = request(3);
    assert_eq!(manager.lock(global, &reader, LockMode::Shared), LockResult::Granted);

    assert!(manager.unlock(global, &reader));
    assert!(manager.unlock(global, &holder));
    assert_eq!(writer.notify.wait_for(Duration::from_secs(1)), LockResult::Granted);
    assert!(manager.unlock(global, &writer));
}

// ============================================================================
// Compatibility invariant under concurrency
// ============================================================================

/// Hammer one resource from several threads with mixed modes; at every
/// observation point the set of granted requests must be pairwise
/// compatible.
#[test]
fn granted_sets_stay_pairwise_compatible_under_stress() {
    let ctx = ConcurrencyContext::new();
    let resource = ResourceId::for_collection("db.hot");
    let modes = [
        LockMode::IntentShared,
        LockMode::IntentExclusive,
        LockMode::Shared,
        LockMode::Exclusive,
    ];

    let mut workers = Vec::new();
    for worker in 0..4u64 {
        let ctx = Arc::clone(&ctx);
        workers.push(thread::spawn(move || {
            let mut locker = Locker::new(Arc::clone(&ctx));
            for i in 0..50u64 {
                let mode = modes[((worker + i) % 4) as usize];
                locker.lock_global(mode.intent_mode()).expect("global");
                locker
                    .lock(resource, mode, Some(Instant::now() + Duration::from_secs(10)), true)
                    .expect("resource");
                assert!(ctx.manager.granted_sets_are_pairwise_compatible());
                locker.unlock(resource);
                locker.unlock_global();
            }
        }));
    }
    for worker in workers {
        worker.join().expect("stress worker");
    }
    assert!(ctx.manager.snapshot().is_empty());
}

// ============================================================================
// Tickets
// ============================================================================

/// With a single writer ticket, a second writer queues in the pool
/// before it ever reaches the lock manager.
#[test]
fn writer_ticket_exhaustion_blocks_admission() {
    let ctx = ConcurrencyContext::with_tickets(128, 1);

    let mut first = Locker::new(Arc::clone(&ctx));
    first.lock_global(LockMode::IntentExclusive).expect("first writer");
    assert_eq!(ctx.tickets.writers.used(), 1);

    let mut second = Locker::new(Arc::clone(&ctx));
    let deadline = Instant::now() + Duration::from_millis(50);
    let err = second
        .lock_global_with_deadline(LockMode::IntentExclusive, Some(deadline))
        .expect_err("no ticket available");
    assert!(matches!(err, LockError::Timeout { .. }));

    first.unlock_global();
    assert_eq!(ctx.tickets.writers.used(), 0);

    second.lock_global(LockMode::IntentExclusive).expect("ticket freed");
    second.unlock_global();
}

/// Exclusive global acquisition bypasses both pools.
#[test]
fn exclusive_mode_bypasses_ticket_pools() {
    let ctx = ConcurrencyContext::with_tickets(1, 1);
    let mut reader = Locker::new(Arc::clone(&ctx));
    reader.lock_global(LockMode::IntentShared).expect("reader");
    assert_eq!(ctx.tickets.readers.used(), 1);
    reader.unlock_global();

    let mut exclusive = Locker::new(Arc::clone(&ctx));
    exclusive.lock_global(LockMode::Exclusive).expect("exclusive");
    assert_eq!(ctx.tickets.readers.used(), 0);
    assert_eq!(ctx.tickets.writers.used(), 0);
    exclusive.unlock_global();
}

// ============================================================================
// Write unit of work deferment, observed across lockers
// ============================================================================

/// An X release inside a write unit of work is invisible to other
/// lockers until the unit ends.
#[test]
fn wuow_holds_exclusive_locks_until_commit() {
    let ctx = ConcurrencyContext::new();
    let coll = ResourceId::for_collection("db.accounts");

    let mut writer = Locker::new(Arc::clone(&ctx));
    writer.lock_global(LockMode::IntentExclusive).expect("global");
    writer.lock(coll, LockMode::Exclusive, None, false).expect("coll");

    writer.begin_write_unit_of_work();
    assert!(!writer.unlock(coll), "release must be deferred");

    let reader = thread::spawn({
        let ctx = Arc::clone(&ctx);
        move || {
            let mut locker = Locker::new(ctx);
            locker.lock_global(LockMode::IntentShared).expect("global");
            // Blocked until the writer's unit of work ends.
            locker.lock(coll, LockMode::IntentShared, None, false).expect("coll");
            locker.unlock(coll);
            locker.unlock_global();
        }
    });

    thread::sleep(Duration::from_millis(50));
    writer.end_write_unit_of_work();
    reader.join().expect("reader");

    writer.unlock_global();
}

// ============================================================================
// Save/restore ordering
// ============================================================================

/// Restoring a saved footprint reacquires ascending by resource id, so
/// two restorers cannot introduce a new cycle between themselves.
#[test]
fn concurrent_restores_do_not_deadlock() {
    let ctx = ConcurrencyContext::new();
    let db = ResourceId::for_database("app");
    let coll_a = ResourceId::for_collection("app.a");
    let coll_b = ResourceId::for_collection("app.b");

    let mut workers = Vec::new();
    for _ in 0..2 {
        let ctx = Arc::clone(&ctx);
        workers.push(thread::spawn(move || {
            let mut locker = Locker::new(ctx);
            for _ in 0..25 {
                locker.lock_global(LockMode::IntentShared).expect("global");
                locker.lock(db, LockMode::IntentShared, None, false).expect("db");
                locker.lock(coll_a, LockMode::IntentShared, None, false).expect("a");
                locker.lock(coll_b, LockMode::IntentShared, None, false).expect("b");

                let snapshot = locker.save_state().expect("saveable");
                locker.restore_state(&snapshot).expect("restore");

                locker.unlock(coll_b);
                locker.unlock(coll_a);
                locker.unlock(db);
                locker.unlock_global();
            }
        }));
    }
    for worker in workers {
        worker.join().expect("restore worker");
    }
}
