//! Limit and skip stages.

use ferrodb_core::RecordId;

use crate::error::Result;

use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::WorkingSet;

/// Emits at most `limit` results, then reports EOF.
pub struct LimitStage {
    child: Box<PlanStage>,
    remaining: u64,
    pub stats: StageStats,
}

impl LimitStage {
    #[must_use]
    pub fn new(child: Box<PlanStage>, limit: u64) -> Self {
        Self { child, remaining: limit, stats: StageStats::default() }
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        if self.remaining == 0 {
            return WorkState::IsEof;
        }
        match self.child.work(ctx) {
            WorkState::Advanced(id) => {
                self.remaining -= 1;
                WorkState::Advanced(id)
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

/// Discards the first `skip` results.
pub struct SkipStage {
    child: Box<PlanStage>,
    to_skip: u64,
    pub stats: StageStats,
}

impl SkipStage {
    #[must_use]
    pub fn new(child: Box<PlanStage>, skip: u64) -> Self {
        Self { child, to_skip: skip, stats: StageStats::default() }
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        match self.child.work(ctx) {
            WorkState::Advanced(id) => {
                if self.to_skip > 0 {
                    self.to_skip -= 1;
                    ctx.ws.free(id);
                    WorkState::NeedTime
                } else {
                    WorkState::Advanced(id)
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
