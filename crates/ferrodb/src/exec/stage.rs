//! The plan-stage tree.
//!
//! Stages form a pull-based tree driven from the root by the executor.
//! [`PlanStage`] is a tagged sum over the stage kinds; the four
//! capability operations (`work`, `save_state`, `restore_state`,
//! `invalidate`) dispatch on the kind at entry, so there are no virtual
//! dispatch chains and the compiler sees every transition.

use ferrodb_core::RecordId;

use crate::error::Result;
use crate::operation::OperationContext;

use super::cached_plan::CachedPlanStage;
use super::collection_scan::CollectionScanStage;
use super::delete::DeleteStage;
use super::fetch::FetchStage;
use super::filter::FilterStage;
use super::index_scan::IndexScanStage;
use super::limit::{LimitStage, SkipStage};
use super::multi_plan::MultiPlanStage;
use super::projection::ProjectionStage;
use super::sort::SortStage;
use super::subplan::SubplanStage;
use super::update::UpdateStage;
use super::working_set::{WorkingSet, WorkingSetId};

/// Outcome of one `work` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    /// Emitted one result; the caller consumes the member.
    Advanced(WorkingSetId),
    /// Progress without emission; call again.
    NeedTime,
    /// The stage wants the executor to yield. With a record id attached
    /// the executor may fetch it outside the locks before retrying;
    /// without one this is a write-conflict backoff request.
    NeedYield { fetch: Option<RecordId> },
    /// No more results.
    IsEof,
    /// Terminal failure; the member carries the status.
    Failure(WorkingSetId),
    /// The plan was killed; the member carries the reason.
    Dead(WorkingSetId),
}

/// Per-call state handed down the tree.
pub struct StageContext<'a> {
    pub ws: &'a mut WorkingSet,
    pub opctx: &'a mut OperationContext,
}

/// Counters every stage keeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageStats {
    pub works: u64,
    pub advanced: u64,
    pub need_time: u64,
    pub need_yield: u64,
    pub reached_eof: bool,
}

impl StageStats {
    fn record(&mut self, state: &WorkState) {
        self.works += 1;
        match state {
            WorkState::Advanced(_) => self.advanced += 1,
            WorkState::NeedTime => self.need_time += 1,
            WorkState::NeedYield { .. } => self.need_yield += 1,
            WorkState::IsEof => self.reached_eof = true,
            WorkState::Failure(_) | WorkState::Dead(_) => {}
        }
    }
}

/// A node of the execution tree.
pub enum PlanStage {
    CollectionScan(CollectionScanStage),
    IndexScan(IndexScanStage),
    Fetch(FetchStage),
    Filter(FilterStage),
    Projection(ProjectionStage),
    Sort(SortStage),
    Limit(LimitStage),
    Skip(SkipStage),
    Update(UpdateStage),
    Delete(DeleteStage),
    MultiPlan(MultiPlanStage),
    CachedPlan(CachedPlanStage),
    Subplan(SubplanStage),
}

impl PlanStage {
    /// Drive the stage one step.
    pub fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        let state = match self {
            Self::CollectionScan(stage) => stage.work(ctx),
            Self::IndexScan(stage) => stage.work(ctx),
            Self::Fetch(stage) => stage.work(ctx),
            Self::Filter(stage) => stage.work(ctx),
            Self::Projection(stage) => stage.work(ctx),
            Self::Sort(stage) => stage.work(ctx),
            Self::Limit(stage) => stage.work(ctx),
            Self::Skip(stage) => stage.work(ctx),
            Self::Update(stage) => stage.work(ctx),
            Self::Delete(stage) => stage.work(ctx),
            Self::MultiPlan(stage) => stage.work(ctx),
            Self::CachedPlan(stage) => stage.work(ctx),
            Self::Subplan(stage) => stage.work(ctx),
        };
        self.stats_mut().record(&state);
        state
    }

    /// Release storage cursors ahead of a yield, remembering enough to
    /// resume.
    pub fn save_state(&mut self) {
        match self {
            Self::CollectionScan(stage) => stage.save_state(),
            Self::IndexScan(stage) => stage.save_state(),
            Self::Fetch(stage) => stage.save_state(),
            Self::Filter(stage) => stage.save_state(),
            Self::Projection(stage) => stage.save_state(),
            Self::Sort(stage) => stage.save_state(),
            Self::Limit(stage) => stage.save_state(),
            Self::Skip(stage) => stage.save_state(),
            Self::Update(stage) => stage.save_state(),
            Self::Delete(stage) => stage.save_state(),
            Self::MultiPlan(stage) => stage.save_state(),
            Self::CachedPlan(stage) => stage.save_state(),
            Self::Subplan(stage) => stage.save_state(),
        }
    }

    /// Reattach after a yield.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::QueryPlanKilled`] when a referenced
    /// catalog object has gone away.
    pub fn restore_state(&mut self) -> Result<()> {
        match self {
            Self::CollectionScan(stage) => stage.restore_state(),
            Self::IndexScan(stage) => stage.restore_state(),
            Self::Fetch(stage) => stage.restore_state(),
            Self::Filter(stage) => stage.restore_state(),
            Self::Projection(stage) => stage.restore_state(),
            Self::Sort(stage) => stage.restore_state(),
            Self::Limit(stage) => stage.restore_state(),
            Self::Skip(stage) => stage.restore_state(),
            Self::Update(stage) => stage.restore_state(),
            Self::Delete(stage) => stage.restore_state(),
            Self::MultiPlan(stage) => stage.restore_state(),
            Self::CachedPlan(stage) => stage.restore_state(),
            Self::Subplan(stage) => stage.restore_state(),
        }
    }

    /// Purge buffered references to a deleted or moved record.
    pub fn invalidate(&mut self, ws: &mut WorkingSet, rid: RecordId) {
        match self {
            Self::CollectionScan(stage) => stage.invalidate(ws, rid),
            Self::IndexScan(stage) => stage.invalidate(ws, rid),
            Self::Fetch(stage) => stage.invalidate(ws, rid),
            Self::Filter(stage) => stage.invalidate(ws, rid),
            Self::Projection(stage) => stage.invalidate(ws, rid),
            Self::Sort(stage) => stage.invalidate(ws, rid),
            Self::Limit(stage) => stage.invalidate(ws, rid),
            Self::Skip(stage) => stage.invalidate(ws, rid),
            Self::Update(stage) => stage.invalidate(ws, rid),
            Self::Delete(stage) => stage.invalidate(ws, rid),
            Self::MultiPlan(stage) => stage.invalidate(ws, rid),
            Self::CachedPlan(stage) => stage.invalidate(ws, rid),
            Self::Subplan(stage) => stage.invalidate(ws, rid),
        }
    }

    /// The stage's counters.
    #[must_use]
    pub fn stats(&self) -> &StageStats {
        match self {
            Self::CollectionScan(stage) => &stage.stats,
            Self::IndexScan(stage) => &stage.stats,
            Self::Fetch(stage) => &stage.stats,
            Self::Filter(stage) => &stage.stats,
            Self::Projection(stage) => &stage.stats,
            Self::Sort(stage) => &stage.stats,
            Self::Limit(stage) => &stage.stats,
            Self::Skip(stage) => &stage.stats,
            Self::Update(stage) => &stage.stats,
            Self::Delete(stage) => &stage.stats,
            Self::MultiPlan(stage) => &stage.stats,
            Self::CachedPlan(stage) => &stage.stats,
            Self::Subplan(stage) => &stage.stats,
        }
    }

    fn stats_mut(&mut self) -> &mut StageStats {
        match self {
            Self::CollectionScan(stage) => &mut stage.stats,
            Self::IndexScan(stage) => &mut stage.stats,
            Self::Fetch(stage) => &mut stage.stats,
            Self::Filter(stage) => &mut stage.stats,
            Self::Projection(stage) => &mut stage.stats,
            Self::Sort(stage) => &mut stage.stats,
            Self::Limit(stage) => &mut stage.stats,
            Self::Skip(stage) => &mut stage.stats,
            Self::Update(stage) => &mut stage.stats,
            Self::Delete(stage) => &mut stage.stats,
            Self::MultiPlan(stage) => &mut stage.stats,
            Self::CachedPlan(stage) => &mut stage.stats,
            Self::Subplan(stage) => &mut stage.stats,
        }
    }

    /// Stage kind, for diagnostics and plan explain output.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::CollectionScan(_) => "COLLSCAN",
            Self::IndexScan(_) => "IXSCAN",
            Self::Fetch(_) => "FETCH",
            Self::Filter(_) => "FILTER",
            Self::Projection(_) => "PROJECTION",
            Self::Sort(_) => "SORT",
            Self::Limit(_) => "LIMIT",
            Self::Skip(_) => "SKIP",
            Self::Update(_) => "UPDATE",
            Self::Delete(_) => "DELETE",
            Self::MultiPlan(_) => "MULTI_PLAN",
            Self::CachedPlan(_) => "CACHED_PLAN",
            Self::Subplan(_) => "SUBPLAN",
        }
    }
}
