//! Cached-plan stage.
//!
//! Runs the plan recipe the cache recorded for this query shape, but
//! only after a trial: if the cached plan spends an order of magnitude
//! more works than its original decision without producing results, the
//! cache entry is evicted and planning falls back to a fresh multi-plan
//! race.

use std::collections::VecDeque;
use std::sync::Arc;

use ferrodb_core::{ErrorCode, RecordId};
use tracing::debug;

use crate::catalog::collection::CollectionDescriptor;
use crate::error::Result;

use super::expression::Expression;
use super::multi_plan::MultiPlanStage;
use super::plan_cache::QueryShape;
use super::planner::plan_candidates;
use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::{WorkingSet, WorkingSetId};

/// Works multiplier before a cached plan is declared stale.
const REPLAN_FACTOR: u64 = 10;

/// Drives a cached plan with a replanning escape hatch.
pub struct CachedPlanStage {
    collection: Arc<CollectionDescriptor>,
    shape: QueryShape,
    filter: Option<Expression>,
    reverse: bool,
    root: Box<PlanStage>,
    decision_works: u64,
    trial_done: bool,
    replanned: bool,
    results: VecDeque<WorkingSetId>,
    pub stats: StageStats,
}

impl CachedPlanStage {
    #[must_use]
    pub fn new(
        collection: Arc<CollectionDescriptor>,
        shape: QueryShape,
        filter: Option<Expression>,
        reverse: bool,
        root: PlanStage,
        decision_works: u64,
    ) -> Self {
        Self {
            collection,
            shape,
            filter,
            reverse,
            root: Box::new(root),
            decision_works,
            trial_done: false,
            replanned: false,
            results: VecDeque::new(),
            stats: StageStats::default(),
        }
    }

    /// Whether the trial abandoned the cached plan.
    #[must_use]
    pub const fn replanned(&self) -> bool {
        self.replanned
    }

    /// Trial the cached plan, replanning if it underperforms.
    ///
    /// # Errors
    ///
    /// Propagates replanning failures.
    pub fn pick_best_plan(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if self.trial_done {
            return Ok(());
        }
        let budget = self.decision_works.saturating_mul(REPLAN_FACTOR).max(1);

        for _ in 0..budget {
            match self.root.work(ctx) {
                WorkState::Advanced(id) => {
                    self.results.push_back(id);
                    if self.results.len() >= 101 {
                        self.trial_done = true;
                        return Ok(());
                    }
                }
                WorkState::IsEof => {
                    self.trial_done = true;
                    return Ok(());
                }
                WorkState::NeedTime | WorkState::NeedYield { .. } => {}
                WorkState::Failure(id) | WorkState::Dead(id) => {
                    ctx.ws.free(id);
                    return self.replan(ctx);
                }
            }
        }
        self.replan(ctx)
    }

    fn replan(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        debug!(shape = self.shape.as_str(), "cached plan underperformed; replanning");
        self.collection.plan_cache().remove(&self.shape);
        for id in self.results.drain(..) {
            ctx.ws.free(id);
        }

        let solutions = plan_candidates(&self.collection, self.filter.as_ref(), self.reverse);
        let mut candidates = Vec::with_capacity(solutions.len());
        for solution in solutions {
            let root = solution.build(&self.collection)?;
            candidates.push((solution, root));
        }
        let mut multi =
            MultiPlanStage::new(Arc::clone(&self.collection), self.shape.clone(), candidates);
        multi.pick_best_plan(ctx)?;
        self.root = Box::new(PlanStage::MultiPlan(multi));
        self.replanned = true;
        self.trial_done = true;
        Ok(())
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        if !self.trial_done {
            let id = ctx
                .ws
                .allocate_status(ErrorCode::InternalError, "cached-plan trial never ran");
            return WorkState::Failure(id);
        }
        if let Some(id) = self.results.pop_front() {
            return WorkState::Advanced(id);
        }
        self.root.work(ctx)
    }

    pub(crate) fn save_state(&mut self) {
        self.root.save_state();
    }

    pub(crate) fn restore_state(&mut self) -> Result<()> {
        self.root.restore_state()
    }

    pub(crate) fn invalidate(&mut self, ws: &mut WorkingSet, rid: RecordId) {
        self.root.invalidate(ws, rid);
        self.results.retain(|&id| {
            let hit = ws.get(id).is_some_and(|m| m.record_id == rid);
            if hit {
                ws.free(id);
            }
            !hit
        });
    }
}
