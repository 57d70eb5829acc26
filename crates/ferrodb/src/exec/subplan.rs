//! Subplan stage for rooted-OR queries.
//!
//! Each `$or` branch is planned independently: a branch with an
//! applicable index gets its own multi-plan race, everything else falls
//! back to a collection scan. Branches run one after another, with
//! record-id deduplication across them so a document matching several
//! branches is emitted once.

use std::collections::HashSet;
use std::sync::Arc;

use ferrodb_core::RecordId;

use crate::catalog::collection::CollectionDescriptor;
use crate::error::Result;

use super::expression::Expression;
use super::multi_plan::MultiPlanStage;
use super::plan_cache::QueryShape;
use super::planner::plan_candidates;
use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::WorkingSet;

/// Plans and unions the branches of a rooted `$or`.
pub struct SubplanStage {
    children: Vec<Box<PlanStage>>,
    current: usize,
    seen: HashSet<RecordId>,
    pub stats: StageStats,
}

impl SubplanStage {
    /// Build one child per branch.
    ///
    /// # Errors
    ///
    /// Propagates stage-construction failures.
    pub fn new(collection: Arc<CollectionDescriptor>, branches: &[Expression]) -> Result<Self> {
        let mut children = Vec::with_capacity(branches.len());
        for branch in branches {
            let solutions = plan_candidates(&collection, Some(branch), false);
            let child = if solutions.len() == 1 {
                let only = &solutions[0];
                only.build(&collection)?
            } else {
                let shape = QueryShape::of(Some(branch), false);
                let mut candidates = Vec::with_capacity(solutions.len());
                for solution in solutions {
                    let root = solution.build(&collection)?;
                    candidates.push((solution, root));
                }
                PlanStage::MultiPlan(MultiPlanStage::new(
                    Arc::clone(&collection),
                    shape,
                    candidates,
                ))
            };
            children.push(Box::new(child));
        }
        Ok(Self { children, current: 0, seen: HashSet::new(), stats: StageStats::default() })
    }

    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.children.len()
    }

    /// Run the multi-plan race for every branch that has one.
    ///
    /// # Errors
    ///
    /// Propagates trial failures.
    pub fn pick_best_plan(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        for child in &mut self.children {
            if let PlanStage::MultiPlan(multi) = child.as_mut() {
                multi.pick_best_plan(ctx)?;
            }
        }
        Ok(())
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        loop {
            let Some(child) = self.children.get_mut(self.current) else {
                return WorkState::IsEof;
            };
            return match child.work(ctx) {
                WorkState::Advanced(id) => {
                    let rid = ctx.ws.get(id).map_or(RecordId::null(), |m| m.record_id);
                    if !rid.is_null() && !self.seen.insert(rid) {
                        ctx.ws.free(id);
                        WorkState::NeedTime
                    } else {
                        WorkState::Advanced(id)
                    }
                }
                WorkState::IsEof => {
                    self.current += 1;
                    continue;
                }
                other => other,
            };
        }
    }

    pub(crate) fn save_state(&mut self) {
        for child in &mut self.children {
            child.save_state();
        }
    }

    pub(crate) fn restore_state(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.restore_state()?;
        }
        Ok(())
    }

    pub(crate) fn invalidate(&mut self, ws: &mut WorkingSet, rid: RecordId) {
        for child in &mut self.children {
            child.invalidate(ws, rid);
        }
    }
}
