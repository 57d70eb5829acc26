//! Index scan stage.

use std::sync::Arc;

use ferrodb_core::RecordId;

use crate::catalog::collection::CollectionDescriptor;
use crate::catalog::index::{IndexPosition, IntervalBounds};
use crate::catalog::index_catalog::IndexEntry;
use crate::error::{Error, Result};

use super::stage::{StageContext, StageStats, WorkState};
use super::working_set::{MemberState, WorkingSet};

/// Iterates one index over a key interval, emitting RecordId+indexKey
/// members. The scan position is the last (key, record) pair returned,
/// so save/restore is free and a restore re-seeks past it.
pub struct IndexScanStage {
    collection: Arc<CollectionDescriptor>,
    entry: Arc<IndexEntry>,
    bounds: IntervalBounds,
    forward: bool,
    position: Option<IndexPosition>,
    pub stats: StageStats,
}

impl IndexScanStage {
    #[must_use]
    pub fn new(
        collection: Arc<CollectionDescriptor>,
        entry: Arc<IndexEntry>,
        bounds: IntervalBounds,
        forward: bool,
    ) -> Self {
        Self { collection, entry, bounds, forward, position: None, stats: StageStats::default() }
    }

    #[must_use]
    pub fn index_name(&self) -> &str {
        self.entry.descriptor().name()
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        let Some(next) =
            self.entry.store().next_in_range(self.position.as_ref(), &self.bounds, self.forward)
        else {
            return WorkState::IsEof;
        };

        let id = ctx.ws.allocate();
        if let Some(member) = ctx.ws.get_mut(id) {
            member.state = MemberState::RecordIdAndIdx;
            member.record_id = next.1;
            member.index_key = Some(next.0.clone());
            member.key_pattern = Some(self.entry.descriptor().key_pattern().clone());
        }
        self.position = Some(next);
        WorkState::Advanced(id)
    }

    pub(crate) fn save_state(&mut self) {
        // The position pair is already the saved state.
    }

    pub(crate) fn restore_state(&mut self) -> Result<()> {
        if !self.collection.is_usable() {
            return Err(Error::QueryPlanKilled(format!(
                "collection {} is no longer available",
                self.collection.ns()
            )));
        }
        let still_present = self
            .collection
            .index_catalog()
            .find_by_name(self.entry.descriptor().name())
            .is_some_and(|current| Arc::ptr_eq(&current, &self.entry));
        if !still_present {
            return Err(Error::QueryPlanKilled(format!(
                "index {} was dropped during a yield",
                self.entry.descriptor().name()
            )));
        }
        Ok(())
    }

    pub(crate) fn invalidate(&mut self, _ws: &mut WorkingSet, _rid: RecordId) {
        // No buffered entries; the position pair stays valid because
        // the store skips removed entries on the next seek.
    }
}
