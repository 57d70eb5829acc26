//! Filter stage.

use ferrodb_core::RecordId;

use crate::error::Result;

use super::expression::Expression;
use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::WorkingSet;

/// Drops members whose document does not match the predicate.
pub struct FilterStage {
    child: Box<PlanStage>,
    expr: Expression,
    pub stats: StageStats,
}

impl FilterStage {
    #[must_use]
    pub fn new(child: Box<PlanStage>, expr: Expression) -> Self {
        Self { child, expr, stats: StageStats::default() }
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        match self.child.work(ctx) {
            WorkState::Advanced(id) => {
                let matches = ctx
                    .ws
                    .get(id)
                    .and_then(|member| member.doc.as_ref())
                    .is_some_and(|doc| self.expr.matches(doc));
                if matches {
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
