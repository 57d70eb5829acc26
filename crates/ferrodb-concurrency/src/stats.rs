//! Lock statistics.
//!
//! Counters are kept per (resource type, mode) pair. The process-wide
//! aggregate is partitioned across a small fixed number of
//! cache-line-aligned buckets keyed by locker id so that concurrent
//! operations do not contend on the same counters; reads aggregate
//! across every partition.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::mode::{LockMode, LOCK_MODES_COUNT};
use crate::resource::{ResourceId, ResourceType, RESOURCE_TYPES_COUNT};

const NUM_PARTITIONS: usize = 8;

#[derive(Default)]
struct Counter {
    acquisitions: AtomicU64,
    waits: AtomicU64,
    wait_micros: AtomicU64,
    deadlocks: AtomicU64,
}

/// Counters for one locker or one partition of the global aggregate.
#[derive(Default)]
pub struct LockStats {
    counters: [[Counter; LOCK_MODES_COUNT]; RESOURCE_TYPES_COUNT],
}

impl LockStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, resource: ResourceId, mode: LockMode) -> &Counter {
        &self.counters[resource.rtype() as usize][mode as usize]
    }

    pub fn record_acquisition(&self, resource: ResourceId, mode: LockMode) {
        self.counter(resource, mode).acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self, resource: ResourceId, mode: LockMode) {
        self.counter(resource, mode).waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait_time(&self, resource: ResourceId, mode: LockMode, micros: u64) {
        self.counter(resource, mode).wait_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_deadlock(&self, resource: ResourceId, mode: LockMode) {
        self.counter(resource, mode).deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for per_type in &self.counters {
            for counter in per_type {
                counter.acquisitions.store(0, Ordering::Relaxed);
                counter.waits.store(0, Ordering::Relaxed);
                counter.wait_micros.store(0, Ordering::Relaxed);
                counter.deadlocks.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Add this instance's counters into `out`.
    pub fn append_to(&self, out: &mut LockStatsSnapshot) {
        for (type_idx, per_type) in self.counters.iter().enumerate() {
            for (mode_idx, counter) in per_type.iter().enumerate() {
                let slot = &mut out.entries[type_idx][mode_idx];
                slot.acquisitions += counter.acquisitions.load(Ordering::Relaxed);
                slot.waits += counter.waits.load(Ordering::Relaxed);
                slot.wait_micros += counter.wait_micros.load(Ordering::Relaxed);
                slot.deadlocks += counter.deadlocks.load(Ordering::Relaxed);
            }
        }
    }

    /// Snapshot of this instance alone.
    #[must_use]
    pub fn snapshot(&self) -> LockStatsSnapshot {
        let mut out = LockStatsSnapshot::default();
        self.append_to(&mut out);
        out
    }
}

/// One (resource type, mode) cell of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockStatEntry {
    pub acquisitions: u64,
    pub waits: u64,
    pub wait_micros: u64,
    pub deadlocks: u64,
}

/// An aggregated, immutable view of lock statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LockStatsSnapshot {
    entries: [[LockStatEntry; LOCK_MODES_COUNT]; RESOURCE_TYPES_COUNT],
}

impl LockStatsSnapshot {
    #[must_use]
    pub fn get(&self, rtype: ResourceType, mode: LockMode) -> LockStatEntry {
        self.entries[rtype as usize][mode as usize]
    }

    /// Total acquisitions across every cell.
    #[must_use]
    pub fn total_acquisitions(&self) -> u64 {
        self.entries.iter().flatten().map(|e| e.acquisitions).sum()
    }
}

/// Cache-line alignment wrapper so partitions do not false-share.
#[repr(align(64))]
#[derive(Default)]
struct AlignedLockStats {
    stats: LockStats,
}

/// The process-wide aggregate, partitioned by locker id.
pub struct PartitionedLockStats {
    partitions: [AlignedLockStats; NUM_PARTITIONS],
}

impl Default for PartitionedLockStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionedLockStats {
    #[must_use]
    pub fn new() -> Self {
        Self { partitions: Default::default() }
    }

    fn partition(&self, locker_id: u64) -> &LockStats {
        &self.partitions[(locker_id as usize) % NUM_PARTITIONS].stats
    }

    pub fn record_acquisition(&self, locker_id: u64, resource: ResourceId, mode: LockMode) {
        self.partition(locker_id).record_acquisition(resource, mode);
    }

    pub fn record_wait(&self, locker_id: u64, resource: ResourceId, mode: LockMode) {
        self.partition(locker_id).record_wait(resource, mode);
    }

    pub fn record_wait_time(
        &self,
        locker_id: u64,
        resource: ResourceId,
        mode: LockMode,
        micros: u64,
    ) {
        self.partition(locker_id).record_wait_time(resource, mode, micros);
    }

    pub fn record_deadlock(&self, locker_id: u64, resource: ResourceId, mode: LockMode) {
        self.partition(locker_id).record_deadlock(resource, mode);
    }

    /// Aggregate every partition into one snapshot.
    #[must_use]
    pub fn report(&self) -> LockStatsSnapshot {
        let mut out = LockStatsSnapshot::default();
        for partition in &self.partitions {
            partition.stats.append_to(&mut out);
        }
        out
    }

    pub fn reset(&self) {
        for partition in &self.partitions {
            partition.stats.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_aggregate_in_report() {
        let stats = PartitionedLockStats::new();
        let global = ResourceId::global();
        // Spread the same event across different partitions.
        for locker_id in 0..(NUM_PARTITIONS as u64 * 2) {
            stats.record_acquisition(locker_id, global, LockMode::IntentShared);
        }
        let snapshot = stats.report();
        assert_eq!(
            snapshot.get(ResourceType::Global, LockMode::IntentShared).acquisitions,
            NUM_PARTITIONS as u64 * 2
        );
        assert_eq!(snapshot.total_acquisitions(), NUM_PARTITIONS as u64 * 2);
    }

    #[test]
    fn wait_time_accumulates() {
        let stats = LockStats::new();
        let db = ResourceId::for_database("app");
        stats.record_wait(db, LockMode::Exclusive);
        stats.record_wait_time(db, LockMode::Exclusive, 150);
        stats.record_wait_time(db, LockMode::Exclusive, 50);

        let snapshot = stats.snapshot();
        let entry = snapshot.get(ResourceType::Database, LockMode::Exclusive);
        assert_eq!(entry.waits, 1);
        assert_eq!(entry.wait_micros, 200);
    }

    #[test]
    fn reset_clears_counters() {
        let stats = LockStats::new();
        stats.record_deadlock(ResourceId::global(), LockMode::Exclusive);
        stats.reset();
        assert_eq!(stats.snapshot().total_acquisitions(), 0);
        assert_eq!(stats.snapshot().get(ResourceType::Global, LockMode::Exclusive).deadlocks, 0);
    }
}
