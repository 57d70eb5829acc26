//! Lock manager throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use ferrodb_concurrency::{ConcurrencyContext, LockMode, Locker, ResourceId};

fn bench_uncontended_acquire_release(c: &mut Criterion) {
    let ctx = ConcurrencyContext::new();
    let mut group = c.benchmark_group("lock_manager");
    group.throughput(Throughput::Elements(1));

    group.bench_function("global_is_acquire_release", |b| {
        let mut locker = Locker::new(std::sync::Arc::clone(&ctx));
        b.iter(|| {
            locker.lock_global(black_box(LockMode::IntentShared)).expect("grant");
            locker.unlock_global();
        });
    });

    group.bench_function("collection_hierarchy_acquire_release", |b| {
        let mut locker = Locker::new(std::sync::Arc::clone(&ctx));
        let db = ResourceId::for_database("bench");
        let coll = ResourceId::for_collection("bench.items");
        b.iter(|| {
            locker.lock_global(LockMode::IntentExclusive).expect("global");
            locker.lock(db, LockMode::IntentExclusive, None, false).expect("db");
            locker.lock(coll, LockMode::Exclusive, None, false).expect("coll");
            locker.unlock(coll);
            locker.unlock(db);
            locker.unlock_global();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_uncontended_acquire_release);
criterion_main!(benches);
