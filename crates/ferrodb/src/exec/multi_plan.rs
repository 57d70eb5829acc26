//! Multi-plan stage.
//!
//! Holds N candidate subtrees and races them round-robin for a bounded
//! trial. The plan that advanced the most per unit of work wins (a
//! plan that reached EOF gets a bonus, since it cannot do better);
//! results the winner buffered during the trial are replayed before the
//! winner is driven further. The winning recipe is cached under the
//! canonical query shape.

use std::collections::VecDeque;
use std::sync::Arc;

use ferrodb_core::{ErrorCode, RecordId};
use tracing::debug;

use crate::catalog::collection::CollectionDescriptor;
use crate::error::{Error, Result};

use super::plan_cache::{PlanCacheEntry, QueryShape};
use super::planner::QuerySolution;
use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::{WorkingSet, WorkingSetId};

/// Results buffered per candidate before a winner is known.
const MAX_TRIAL_RESULTS: usize = 101;
/// Floor on the trial budget regardless of collection size.
const MIN_TRIAL_WORKS: u64 = 10_000;

struct CandidatePlan {
    solution: QuerySolution,
    root: Box<PlanStage>,
    works: u64,
    advances: u64,
    hit_eof: bool,
    failed: bool,
    results: VecDeque<WorkingSetId>,
}

impl CandidatePlan {
    fn score(&self) -> f64 {
        let productivity = self.advances as f64 / self.works.max(1) as f64;
        let eof_bonus = if self.hit_eof { 1.0 } else { 0.0 };
        1.0 + productivity + eof_bonus
    }
}

/// Races candidate plans, then runs the winner.
pub struct MultiPlanStage {
    collection: Arc<CollectionDescriptor>,
    shape: QueryShape,
    candidates: Vec<CandidatePlan>,
    best: Option<usize>,
    pub stats: StageStats,
}

impl MultiPlanStage {
    /// Build over pre-constructed candidate trees.
    #[must_use]
    pub fn new(
        collection: Arc<CollectionDescriptor>,
        shape: QueryShape,
        candidates: Vec<(QuerySolution, PlanStage)>,
    ) -> Self {
        let candidates = candidates
            .into_iter()
            .map(|(solution, root)| CandidatePlan {
                solution,
                root: Box::new(root),
                works: 0,
                advances: 0,
                hit_eof: false,
                failed: false,
                results: VecDeque::new(),
            })
            .collect();
        Self { collection, shape, candidates, best: None, stats: StageStats::default() }
    }

    /// Number of candidates still alive.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// The winning recipe, once the trial has run.
    #[must_use]
    pub fn best_solution(&self) -> Option<&QuerySolution> {
        self.best.map(|idx| &self.candidates[idx].solution)
    }

    /// Total works spent by the winner during its trial.
    #[must_use]
    pub fn decision_works(&self) -> Option<u64> {
        self.best.map(|idx| self.candidates[idx].works)
    }

    /// Run the bounded round-robin trial and commit to a winner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] when every candidate failed.
    pub fn pick_best_plan(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if self.best.is_some() {
            return Ok(());
        }
        let budget =
            MIN_TRIAL_WORKS.max((self.collection.num_records() as u64) * 3 / 10);

        'trial: for _ in 0..budget {
            let mut all_done = true;
            for candidate in &mut self.candidates {
                if candidate.failed || candidate.hit_eof {
                    continue;
                }
                all_done = false;
                candidate.works += 1;
                match candidate.root.work(ctx) {
                    WorkState::Advanced(id) => {
                        candidate.advances += 1;
                        candidate.results.push_back(id);
                        if candidate.results.len() >= MAX_TRIAL_RESULTS {
                            break 'trial;
                        }
                    }
                    WorkState::IsEof => {
                        candidate.hit_eof = true;
                        break 'trial;
                    }
                    WorkState::NeedTime | WorkState::NeedYield { .. } => {}
                    WorkState::Failure(id) | WorkState::Dead(id) => {
                        candidate.failed = true;
                        ctx.ws.free(id);
                    }
                }
            }
            if all_done {
                break;
            }
        }

        // Ties keep the earliest candidate: index plans precede the
        // collection-scan fallback in the candidate list.
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in self.candidates.iter().enumerate() {
            if candidate.failed {
                continue;
            }
            let score = candidate.score();
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((idx, score));
            }
        }
        let Some((best, _)) = best else {
            return Err(Error::OperationFailed("every candidate plan failed".into()));
        };

        // Losers' buffered results go back to the pool.
        for (idx, candidate) in self.candidates.iter_mut().enumerate() {
            if idx != best {
                for id in candidate.results.drain(..) {
                    ctx.ws.free(id);
                }
            }
        }

        let winner = &self.candidates[best];
        debug!(
            ns = %self.collection.ns(),
            winner = %winner.solution.summary(),
            works = winner.works,
            advances = winner.advances,
            "multi-plan trial complete"
        );
        self.collection.plan_cache().put(
            self.shape.clone(),
            PlanCacheEntry { solution: winner.solution.clone(), decision_works: winner.works },
        );
        self.best = Some(best);
        Ok(())
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        let Some(best) = self.best else {
            let id = ctx
                .ws
                .allocate_status(ErrorCode::InternalError, "multi-plan trial never ran");
            return WorkState::Failure(id);
        };
        let winner = &mut self.candidates[best];
        if let Some(id) = winner.results.pop_front() {
            return WorkState::Advanced(id);
        }
        if winner.hit_eof {
            return WorkState::IsEof;
        }
        winner.root.work(ctx)
    }

    pub(crate) fn save_state(&mut self) {
        for candidate in &mut self.candidates {
            candidate.root.save_state();
        }
    }

    pub(crate) fn restore_state(&mut self) -> Result<()> {
        match self.best {
            // After the decision only the winner matters.
            Some(best) => self.candidates[best].root.restore_state(),
            None => {
                for candidate in &mut self.candidates {
                    candidate.root.restore_state()?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn invalidate(&mut self, ws: &mut WorkingSet, rid: RecordId) {
        for candidate in &mut self.candidates {
            candidate.root.invalidate(ws, rid);
            candidate.results.retain(|&id| {
                let hit = ws.get(id).is_some_and(|m| m.record_id == rid);
                if hit {
                    ws.free(id);
                }
                !hit
            });
        }
    }
}
