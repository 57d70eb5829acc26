//! The working set.
//!
//! Stages exchange intermediate results by small integer id through a
//! slab of members. A member progresses through the states below as it
//! moves up the tree: an index scan produces `RecordIdAndIdx`, a fetch
//! upgrades it to `RecordIdAndObj`, and computed results with no
//! backing record are `OwnedObj`. Failure states are carried as status
//! members so errors survive the trip through the stage tree.

use ferrodb_core::{Document, ErrorCode, IndexKey, KeyPattern, RecordId};

/// Index of a member within the working set.
pub type WorkingSetId = usize;

/// Sentinel for "no member".
pub const INVALID_ID: WorkingSetId = usize::MAX;

/// What a member currently carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    RecordIdOnly,
    RecordIdAndIdx,
    RecordIdAndObj,
    OwnedObj,
}

/// One intermediate result.
#[derive(Debug, Clone)]
pub struct WorkingSetMember {
    pub state: MemberState,
    pub record_id: RecordId,
    pub doc: Option<Document>,
    /// Storage version of `doc` when it was read; update stages pass it
    /// back for optimistic conflict detection.
    pub doc_version: u64,
    pub index_key: Option<IndexKey>,
    pub key_pattern: Option<KeyPattern>,
    /// Status carried by failure members.
    pub status: Option<(ErrorCode, String)>,
}

impl WorkingSetMember {
    fn empty() -> Self {
        Self {
            state: MemberState::RecordIdOnly,
            record_id: RecordId::null(),
            doc: None,
            doc_version: 0,
            index_key: None,
            key_pattern: None,
            status: None,
        }
    }

    #[must_use]
    pub fn has_record_id(&self) -> bool {
        !self.record_id.is_null()
    }

    #[must_use]
    pub fn has_doc(&self) -> bool {
        self.doc.is_some()
    }
}

/// Slab of members with id reuse through a free list.
#[derive(Default)]
pub struct WorkingSet {
    members: Vec<Option<WorkingSetMember>>,
    free: Vec<WorkingSetId>,
}

impl WorkingSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh member and return its id.
    pub fn allocate(&mut self) -> WorkingSetId {
        match self.free.pop() {
            Some(id) => {
                self.members[id] = Some(WorkingSetMember::empty());
                id
            }
            None => {
                self.members.push(Some(WorkingSetMember::empty()));
                self.members.len() - 1
            }
        }
    }

    /// Allocate a member carrying a terminal status.
    pub fn allocate_status(&mut self, code: ErrorCode, message: impl Into<String>) -> WorkingSetId {
        let id = self.allocate();
        if let Some(member) = self.get_mut(id) {
            member.state = MemberState::OwnedObj;
            member.status = Some((code, message.into()));
        }
        id
    }

    #[must_use]
    pub fn get(&self, id: WorkingSetId) -> Option<&WorkingSetMember> {
        self.members.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: WorkingSetId) -> Option<&mut WorkingSetMember> {
        self.members.get_mut(id).and_then(Option::as_mut)
    }

    /// Return a member's slot to the free list.
    pub fn free(&mut self, id: WorkingSetId) {
        if id < self.members.len() && self.members[id].take().is_some() {
            self.free.push(id);
        }
    }

    /// Members currently allocated.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_some()).count()
    }

    /// The (code, message) carried by a status member.
    #[must_use]
    pub fn status_of(&self, id: WorkingSetId) -> Option<(ErrorCode, String)> {
        self.get(id).and_then(|member| member.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_reused_after_free() {
        let mut ws = WorkingSet::new();
        let a = ws.allocate();
        let b = ws.allocate();
        assert_ne!(a, b);

        ws.free(a);
        assert_eq!(ws.live_count(), 1);
        let c = ws.allocate();
        assert_eq!(c, a);
    }

    #[test]
    fn double_free_is_harmless() {
        let mut ws = WorkingSet::new();
        let a = ws.allocate();
        ws.free(a);
        ws.free(a);
        assert_eq!(ws.live_count(), 0);
        let b = ws.allocate();
        let c = ws.allocate();
        assert_ne!(b, c);
    }

    #[test]
    fn status_members_round_trip() {
        let mut ws = WorkingSet::new();
        let id = ws.allocate_status(ErrorCode::OperationFailed, "stage failed");
        let (code, message) = ws.status_of(id).expect("status");
        assert_eq!(code, ErrorCode::OperationFailed);
        assert_eq!(message, "stage failed");
    }
}
