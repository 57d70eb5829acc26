//! Fetch stage.

use std::sync::Arc;

use ferrodb_core::RecordId;

use crate::catalog::collection::CollectionDescriptor;
use crate::error::Result;

use super::expression::Expression;
use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::{MemberState, WorkingSet};

/// Turns RecordId+indexKey members from its child into full documents,
/// optionally applying a residual filter. Members whose record vanished
/// between the index read and the fetch are discarded.
pub struct FetchStage {
    child: Box<PlanStage>,
    collection: Arc<CollectionDescriptor>,
    filter: Option<Expression>,
    pub stats: StageStats,
}

impl FetchStage {
    #[must_use]
    pub fn new(
        child: Box<PlanStage>,
        collection: Arc<CollectionDescriptor>,
        filter: Option<Expression>,
    ) -> Self {
        Self { child, collection, filter, stats: StageStats::default() }
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        match self.child.work(ctx) {
            WorkState::Advanced(id) => {
                let Some(member) = ctx.ws.get(id) else {
                    return WorkState::NeedTime;
                };
                if !member.has_record_id() {
                    ctx.ws.free(id);
                    return WorkState::NeedTime;
                }
                let rid = member.record_id;
                if !member.has_doc() {
                    let Some((doc, version)) = self.collection.find_document(rid) else {
                        // The record went away after the index emitted it.
                        ctx.ws.free(id);
                        return WorkState::NeedTime;
                    };
                    if let Some(member) = ctx.ws.get_mut(id) {
                        member.doc = Some(doc);
                        member.doc_version = version;
                        member.state = MemberState::RecordIdAndObj;
                    }
                }
                let passes = match (&self.filter, ctx.ws.get(id).and_then(|m| m.doc.as_ref())) {
                    (Some(filter), Some(doc)) => filter.matches(doc),
                    _ => true,
                };
                if passes {
                    WorkState::Advanced(id)
                } else {
                    ctx.ws.free(id);
                    WorkState::NeedTime
                }
            }
            other => other,
        }
    }

    pub(crate) fn save_state(&mut self) {
        self.child.save_state();
    }

    pub(crate) fn restore_state(&mut self) -> Result<()> {
        self.child.restore_state()
    }

    pub(crate) fn invalidate(&mut self, ws: &mut WorkingSet, rid: RecordId) {
        self.child.invalidate(ws, rid);
    }
}
