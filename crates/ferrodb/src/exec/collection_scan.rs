//! Collection scan stage.

use std::sync::Arc;

use ferrodb_core::{ErrorCode, RecordId};
use ferrodb_storage::{RecordCursor, ScanDirection};

use crate::catalog::collection::CollectionDescriptor;
use crate::error::{Error, Result};

use super::stage::{StageContext, StageStats, WorkState};
use super::working_set::{MemberState, WorkingSet};

/// Iterates a collection's record store in either direction.
///
/// Tailable scans on capped collections do not terminate at EOF: the
/// executor parks them on the capped-insert notifier and calls `work`
/// again after a wakeup, at which point the position-based cursor picks
/// up the newly appended records.
pub struct CollectionScanStage {
    collection: Arc<CollectionDescriptor>,
    direction: ScanDirection,
    tailable: bool,
    cursor: Option<Box<dyn RecordCursor>>,
    saved: bool,
    pub stats: StageStats,
}

impl CollectionScanStage {
    #[must_use]
    pub fn new(
        collection: Arc<CollectionDescriptor>,
        direction: ScanDirection,
        tailable: bool,
    ) -> Self {
        Self { collection, direction, tailable, cursor: None, saved: false, stats: StageStats::default() }
    }

    #[must_use]
    pub fn is_tailable(&self) -> bool {
        self.tailable
    }

    #[must_use]
    pub fn collection(&self) -> &Arc<CollectionDescriptor> {
        &self.collection
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        debug_assert!(!self.saved, "work on a saved stage");
        let cursor = self
            .cursor
            .get_or_insert_with(|| self.collection.record_store().cursor(self.direction));

        let Some(record) = cursor.next() else {
            return WorkState::IsEof;
        };
        match CollectionDescriptor::decode_document(&record.data) {
            Ok(doc) => {
                let id = ctx.ws.allocate();
                if let Some(member) = ctx.ws.get_mut(id) {
                    member.state = MemberState::RecordIdAndObj;
                    member.record_id = record.id;
                    member.doc = Some(doc);
                    member.doc_version = record.version;
                }
                WorkState::Advanced(id)
            }
            Err(err) => {
                let id = ctx.ws.allocate_status(ErrorCode::InternalError, err.to_string());
                WorkState::Failure(id)
            }
        }
    }

    pub(crate) fn save_state(&mut self) {
        if let Some(cursor) = &mut self.cursor {
            cursor.save();
        }
        self.saved = true;
    }

    pub(crate) fn restore_state(&mut self) -> Result<()> {
        self.saved = false;
        if !self.collection.is_usable() {
            return Err(Error::QueryPlanKilled(format!(
                "collection {} is no longer available",
                self.collection.ns()
            )));
        }
        if let Some(cursor) = &mut self.cursor {
            let outcome = cursor.restore();
            if !outcome.ok {
                return Err(Error::QueryPlanKilled(format!(
                    "cursor for {} could not be restored",
                    self.collection.ns()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn invalidate(&mut self, _ws: &mut WorkingSet, _rid: RecordId) {
        // Position-based cursors hold no buffered records.
    }
}
