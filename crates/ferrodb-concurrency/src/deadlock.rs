//! Wait-for-graph deadlock detection.
//!
//! Detection is lazy and waiter-driven: a locker whose notification has
//! not fired within the deadlock poll interval constructs a detector and
//! traverses the wait-for graph starting from itself. Edges run from a
//! waiting locker to every holder of the resource it is queued on. A
//! path back to the initiator is a cycle; the initiator then fails its
//! acquisition with a deadlock error and detaches its queued request.
//!
//! Each traversal keeps its own visited set, so concurrent detections
//! from different waiters never interfere.

use std::collections::{HashSet, VecDeque};

use crate::manager::LockManager;

/// One traversal of the wait-for graph from a single initiator.
pub struct DeadlockDetector<'a> {
    manager: &'a LockManager,
    initiator: u64,
}

impl<'a> DeadlockDetector<'a> {
    #[must_use]
    pub fn new(manager: &'a LockManager, initiator: u64) -> Self {
        Self { manager, initiator }
    }

    /// Breadth-first search for a path from the initiator back to
    /// itself. Returns the lockers the traversal had visited when it
    /// closed the cycle, or an empty vector when no cycle is reachable.
    #[must_use]
    pub fn check(&self) -> Vec<u64> {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut queue: VecDeque<u64> = VecDeque::new();
        visited.insert(self.initiator);
        queue.push_back(self.initiator);

        while let Some(locker) = queue.pop_front() {
            let Some(resource) = self.manager.waits_for(locker) else {
                continue;
            };
            for owner in self.manager.owners_of(resource) {
                if owner == locker {
                    // A converting request holds the resource it waits
                    // on; that edge is not a cycle through others.
                    continue;
                }
                if owner == self.initiator {
                    let mut cycle: Vec<u64> = visited.into_iter().collect();
                    cycle.sort_unstable();
                    return cycle;
                }
                if visited.insert(owner) {
                    queue.push_back(owner);
                }
            }
        }
        Vec::new()
    }

    /// Convenience wrapper: does any cycle pass through the initiator?
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        !self.check().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mode::LockMode;
    use crate::notify::LockGrantNotification;
    use crate::request::{LockRequest, LockResult};
    use crate::resource::ResourceId;

    fn request(locker_id: u64) -> Arc<LockRequest> {
        LockRequest::new(locker_id, Arc::new(LockGrantNotification::new()))
    }

    #[test]
    fn two_party_cycle_is_detected() {
        let manager = LockManager::new();
        let (rx, ry) = (ResourceId::for_collection("db.x"), ResourceId::for_collection("db.y"));

        let (a_x, a_y) = (request(1), request(1));
        let (b_y, b_x) = (request(2), request(2));

        assert_eq!(manager.lock(rx, &a_x, LockMode::Exclusive), LockResult::Granted);
        assert_eq!(manager.lock(ry, &b_y, LockMode::Exclusive), LockResult::Granted);
        assert_eq!(manager.lock(ry, &a_y, LockMode::Exclusive), LockResult::Waiting);
        assert_eq!(manager.lock(rx, &b_x, LockMode::Exclusive), LockResult::Waiting);

        assert!(DeadlockDetector::new(&manager, 1).has_cycle());
        assert!(DeadlockDetector::new(&manager, 2).has_cycle());
    }

    #[test]
    fn plain_waiting_is_not_a_cycle() {
        let manager = LockManager::new();
        let rx = ResourceId::for_collection("db.x");
        let (a, b) = (request(1), request(2));

        assert_eq!(manager.lock(rx, &a, LockMode::Exclusive), LockResult::Granted);
        assert_eq!(manager.lock(rx, &b, LockMode::Exclusive), LockResult::Waiting);

        assert!(!DeadlockDetector::new(&manager, 2).has_cycle());
        assert!(!DeadlockDetector::new(&manager, 1).has_cycle());
    }

    #[test]
    fn three_party_cycle_is_detected() {
        let manager = LockManager::new();
        let resources: Vec<ResourceId> =
            ["db.a", "db.b", "db.c"].iter().map(|ns| ResourceId::for_collection(ns)).collect();

        // Locker i holds resource i and waits for resource (i + 1) % 3.
        let mut held = Vec::new();
        for (i, &resource) in resources.iter().enumerate() {
            let req = request(i as u64 + 1);
            assert_eq!(manager.lock(resource, &req, LockMode::Exclusive), LockResult::Granted);
            held.push(req);
        }
        let mut waiting = Vec::new();
        for i in 0..3 {
            let req = request(i as u64 + 1);
            let target = resources[(i + 1) % 3];
            assert_eq!(manager.lock(target, &req, LockMode::Exclusive), LockResult::Waiting);
            waiting.push(req);
        }

        let cycle = DeadlockDetector::new(&manager, 1).check();
        assert!(!cycle.is_empty());
        assert!(cycle.contains(&1));
    }
}
