//! Delete stage.

use std::sync::Arc;

use ferrodb_core::RecordId;

use crate::catalog::collection::CollectionDescriptor;
use crate::error::{Error, Result};

use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::WorkingSet;

/// Deletes each matched document inside a write unit of work, emitting
/// the deleted document.
pub struct DeleteStage {
    child: Box<PlanStage>,
    collection: Arc<CollectionDescriptor>,
    pub docs_deleted: u64,
    pub stats: StageStats,
}

impl DeleteStage {
    #[must_use]
    pub fn new(child: Box<PlanStage>, collection: Arc<CollectionDescriptor>) -> Self {
        Self { child, collection, docs_deleted: 0, stats: StageStats::default() }
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        match self.child.work(ctx) {
            WorkState::Advanced(id) => {
                let Some(member) = ctx.ws.get(id) else {
                    return WorkState::NeedTime;
                };
                let rid = member.record_id;
                if rid.is_null() {
                    ctx.ws.free(id);
                    return WorkState::NeedTime;
                }

                ctx.opctx.begin_write_unit_of_work();
                let deleted = self.collection.delete_document(ctx.opctx, rid);
                match deleted {
                    Ok(true) => {
                        ctx.opctx.commit_write_unit_of_work();
                        self.docs_deleted += 1;
                        WorkState::Advanced(id)
                    }
                    Ok(false) => {
                        // Already gone; nothing to undo.
                        ctx.opctx.commit_write_unit_of_work();
                        ctx.ws.free(id);
                        WorkState::NeedTime
                    }
                    Err(err) if err.is_write_conflict() => {
                        ctx.opctx.abort_write_unit_of_work();
                        ctx.ws.free(id);
                        WorkState::NeedYield { fetch: None }
                    }
                    Err(err) => {
                        ctx.opctx.abort_write_unit_of_work();
                        let status = ctx.ws.allocate_status(err.code(), err.to_string());
                        ctx.ws.free(id);
                        WorkState::Failure(status)
                    }
                }
            }
            other => other,
        }
    }

    pub(crate) fn save_state(&mut self) {
        self.child.save_state();
    }

    pub(crate) fn restore_state(&mut self) -> Result<()> {
        if !self.collection.is_usable() {
            return Err(Error::QueryPlanKilled(format!(
                "collection {} is no longer available",
                self.collection.ns()
            )));
        }
        self.child.restore_state()
    }

    pub(crate) fn invalidate(&mut self, ws: &mut WorkingSet, rid: RecordId) {
        self.child.invalidate(ws, rid);
    }
}
