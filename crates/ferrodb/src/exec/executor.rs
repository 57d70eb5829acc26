//! The plan executor.
//!
//! Drives a stage tree to completion, cooperating with the locker
//! through the yield policy, recovering locally from write conflicts,
//! parking tailable await-data cursors on the capped-insert notifier,
//! and surfacing every other failure as a typed error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ferrodb_core::{Document, KeyPattern, RecordId};
use ferrodb_storage::ScanDirection;
use tracing::debug;

use crate::catalog::collection::CollectionDescriptor;
use crate::catalog::cursor_manager::ExecutorSlot;
use crate::error::{Error, Result};
use crate::operation::OperationContext;

use super::cached_plan::CachedPlanStage;
use super::collection_scan::CollectionScanStage;
use super::delete::DeleteStage;
use super::expression::Expression;
use super::limit::{LimitStage, SkipStage};
use super::multi_plan::MultiPlanStage;
use super::plan_cache::QueryShape;
use super::planner::plan_candidates;
use super::projection::{ProjectionSpec, ProjectionStage};
use super::sort::SortStage;
use super::stage::{PlanStage, StageContext, WorkState};
use super::subplan::SubplanStage;
use super::update::{UpdateSpec, UpdateStage};
use super::working_set::WorkingSet;
use super::yield_policy::{YieldPolicy, YieldTracker};

/// Consecutive write-conflict retries before the executor gives up.
const MAX_WRITE_CONFLICT_RETRIES: u32 = 10_000;

/// Default await-data window for tailable cursors when the operation
/// has no deadline of its own.
const DEFAULT_AWAIT_DATA_WINDOW: Duration = Duration::from_secs(1);

/// One result from [`PlanExecutor::get_next`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecResult {
    Advanced {
        /// The produced document; index-only plans reconstruct it from
        /// the key.
        doc: Option<Document>,
        record_id: RecordId,
    },
    IsEof,
}

/// A parsed read request.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub filter: Option<Document>,
    /// Sort pattern document, e.g. `{a: 1, b: -1}`.
    pub sort: Option<Document>,
    pub projection: Option<ProjectionSpec>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Scan newest-first instead of oldest-first.
    pub reverse: bool,
    /// Tailable await-data cursor on a capped collection.
    pub tailable_await_data: bool,
}

/// Pull-based driver over one stage tree.
pub struct PlanExecutor {
    collection: Option<Arc<CollectionDescriptor>>,
    root: PlanStage,
    ws: WorkingSet,
    slot: Option<Arc<ExecutorSlot>>,
    tracker: YieldTracker,
    tailable_await_data: bool,
    saved: bool,
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor").finish_non_exhaustive()
    }
}

impl PlanExecutor {
    /// Wrap a pre-built tree and run plan selection for any
    /// subplan/multi-plan/cached-plan root.
    ///
    /// # Errors
    ///
    /// Propagates plan-selection failures.
    pub fn new(
        opctx: &mut OperationContext,
        collection: Option<Arc<CollectionDescriptor>>,
        root: PlanStage,
        yield_policy: YieldPolicy,
        tailable_await_data: bool,
    ) -> Result<Self> {
        let slot = collection.as_ref().map(|c| c.cursor_manager().register_executor());
        let mut executor = Self {
            collection,
            root,
            ws: WorkingSet::new(),
            slot,
            tracker: YieldTracker::new(yield_policy),
            tailable_await_data,
            saved: false,
        };
        executor.pick_best_plan(opctx)?;
        Ok(executor)
    }

    /// Plan-selection dispatch, in priority order: subplan roots first,
    /// then multi-plan, then cached-plan.
    fn pick_best_plan(&mut self, opctx: &mut OperationContext) -> Result<()> {
        let mut ctx = StageContext { ws: &mut self.ws, opctx };
        match &mut self.root {
            PlanStage::Subplan(stage) => stage.pick_best_plan(&mut ctx),
            PlanStage::MultiPlan(stage) => stage.pick_best_plan(&mut ctx),
            PlanStage::CachedPlan(stage) => stage.pick_best_plan(&mut ctx),
            _ => Ok(()),
        }
    }

    /// The root stage, for plan inspection.
    #[must_use]
    pub fn root(&self) -> &PlanStage {
        &self.root
    }

    /// Pull the next result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueryPlanKilled`] when the catalog invalidated
    /// this executor, [`Error::Interrupted`] / [`Error::ExceededTimeLimit`]
    /// on cancellation, [`Error::WriteConflict`] after exhausting
    /// retries, or the stage-reported terminal error.
    pub fn get_next(&mut self, opctx: &mut OperationContext) -> Result<ExecResult> {
        debug_assert!(!self.saved, "get_next on a saved executor");
        let mut conflicts_in_a_row: u32 = 0;

        loop {
            self.drain_invalidations();
            self.check_killed()?;
            opctx.check_for_interrupt()?;

            if self.tracker.should_yield() {
                self.yield_and_restore(opctx)?;
            }

            let mut ctx = StageContext { ws: &mut self.ws, opctx };
            let state = self.root.work(&mut ctx);
            if !matches!(state, WorkState::NeedYield { .. }) {
                conflicts_in_a_row = 0;
            }

            match state {
                WorkState::Advanced(id) => {
                    let result = self.extract_result(id);
                    self.ws.free(id);
                    return Ok(result);
                }
                WorkState::NeedTime => {}
                WorkState::NeedYield { fetch } => {
                    if fetch.is_none() {
                        conflicts_in_a_row += 1;
                        if conflicts_in_a_row > MAX_WRITE_CONFLICT_RETRIES {
                            return Err(Error::WriteConflict(
                                "too many consecutive write conflicts".into(),
                            ));
                        }
                        backoff(conflicts_in_a_row);
                    }
                    // With a fetch id attached the yield exists to page
                    // the record in outside the locks; the reference
                    // backend has nothing to page.
                    self.tracker.note_yield();
                    self.yield_and_restore(opctx)?;
                }
                WorkState::IsEof => {
                    if self.should_await_data() {
                        if self.wait_for_inserts(opctx)? {
                            continue;
                        }
                    }
                    return Ok(ExecResult::IsEof);
                }
                WorkState::Failure(id) | WorkState::Dead(id) => {
                    let err = match self.ws.status_of(id) {
                        Some((code, message)) => Error::from_code(code, message),
                        None => Error::InternalError("stage failed without a status".into()),
                    };
                    self.ws.free(id);
                    return Err(err);
                }
            }
        }
    }

    /// Run the plan to completion, counting produced results; the write
    /// stages' path.
    ///
    /// # Errors
    ///
    /// See [`PlanExecutor::get_next`].
    pub fn execute_plan(&mut self, opctx: &mut OperationContext) -> Result<u64> {
        let mut produced = 0;
        loop {
            match self.get_next(opctx)? {
                ExecResult::Advanced { .. } => produced += 1,
                ExecResult::IsEof => return Ok(produced),
            }
        }
    }

    fn extract_result(&mut self, id: super::working_set::WorkingSetId) -> ExecResult {
        let Some(member) = self.ws.get(id) else {
            return ExecResult::Advanced { doc: None, record_id: RecordId::null() };
        };
        let doc = match (&member.doc, &member.index_key, &member.key_pattern) {
            (Some(doc), _, _) => Some(doc.clone()),
            (None, Some(key), Some(pattern)) => Some(key.to_document(pattern)),
            _ => None,
        };
        ExecResult::Advanced { doc, record_id: member.record_id }
    }

    fn drain_invalidations(&mut self) {
        if let Some(slot) = &self.slot {
            for rid in slot.take_invalidations() {
                self.root.invalidate(&mut self.ws, rid);
            }
        }
    }

    fn check_killed(&self) -> Result<()> {
        if let Some(reason) = self.slot.as_ref().and_then(|slot| slot.kill_reason()) {
            return Err(Error::QueryPlanKilled(reason));
        }
        Ok(())
    }

    /// Save stage state, release and reacquire the locker's footprint,
    /// and restore. The no-yield policy only saves and restores stages.
    fn yield_and_restore(&mut self, opctx: &mut OperationContext) -> Result<()> {
        self.root.save_state();
        if self.tracker.can_yield() && !opctx.locker_ref().in_write_unit_of_work() {
            if let Some(snapshot) = opctx.locker().save_state() {
                opctx.locker().restore_state(&snapshot)?;
            }
        }
        self.check_killed()?;
        self.root.restore_state()
    }

    /// Explicitly detach storage state ahead of an external yield.
    pub fn save_state(&mut self) {
        if !self.saved {
            self.root.save_state();
            self.saved = true;
        }
    }

    /// Reattach after [`PlanExecutor::save_state`]. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueryPlanKilled`] when the plan's catalog
    /// references vanished during the yield.
    pub fn restore_state(&mut self) -> Result<()> {
        self.check_killed()?;
        if self.saved {
            self.root.restore_state()?;
            self.saved = false;
        }
        Ok(())
    }

    fn should_await_data(&self) -> bool {
        self.tailable_await_data
            && self.collection.as_ref().is_some_and(|c| c.is_capped() && c.is_usable())
    }

    /// Park on the capped-insert notifier until new data, the deadline,
    /// or an invalidation. Returns `true` when the scan should retry.
    fn wait_for_inserts(&mut self, opctx: &mut OperationContext) -> Result<bool> {
        let Some(collection) = self.collection.as_ref() else {
            return Ok(false);
        };
        let notifier = collection.capped_notifier();
        let since = notifier.version();
        let deadline = opctx
            .deadline()
            .unwrap_or_else(|| Instant::now() + DEFAULT_AWAIT_DATA_WINDOW);

        debug!(ns = %collection.ns(), "tailable cursor waiting for inserts");
        // Never block while holding locks the locker has not released:
        // save stages, drop the lock footprint, park, then reacquire in
        // canonical order and restore.
        self.root.save_state();
        let snapshot = if self.tracker.can_yield() && !opctx.locker_ref().in_write_unit_of_work()
        {
            opctx.locker().save_state()
        } else {
            None
        };
        let seen = notifier.wait_until(since, deadline);
        if let Some(snapshot) = snapshot {
            opctx.locker().restore_state(&snapshot)?;
        }
        self.check_killed()?;
        self.root.restore_state()?;

        // A deadline expiry here is not an error: an await-data cursor
        // that saw nothing reports EOF and lets the client retry.
        Ok(seen != since && !notifier.is_dead())
    }
}

impl Drop for PlanExecutor {
    fn drop(&mut self) {
        if let (Some(collection), Some(slot)) = (&self.collection, &self.slot) {
            collection.cursor_manager().deregister_executor(slot);
        }
    }
}

fn backoff(attempt: u32) {
    // First few retries spin; later ones sleep with doubling, capped.
    if attempt <= 3 {
        std::thread::yield_now();
        return;
    }
    let exp = (attempt - 3).min(7);
    let millis = (1u64 << exp).min(100);
    std::thread::sleep(Duration::from_millis(millis));
}

/// Build a find executor over `collection`.
///
/// Plan selection: a rooted `$or` gets a subplan root; a cached shape
/// gets a cached-plan root; several candidates race under a multi-plan
/// root; a single candidate is built directly. Sort, skip, limit, and
/// projection wrap the chosen root in that order.
///
/// # Errors
///
/// Returns parse errors from the filter/sort documents and
/// plan-selection failures.
pub fn build_find_executor(
    opctx: &mut OperationContext,
    collection: &Arc<CollectionDescriptor>,
    request: QueryRequest,
) -> Result<PlanExecutor> {
    let filter = match &request.filter {
        Some(doc) => Some(Expression::parse(doc)?),
        None => None,
    };

    let mut root = if request.tailable_await_data {
        if !collection.is_capped() {
            return Err(Error::BadValue("tailable cursors require a capped collection".into()));
        }
        let scan = PlanStage::CollectionScan(CollectionScanStage::new(
            Arc::clone(collection),
            ScanDirection::Forward,
            true,
        ));
        match &filter {
            Some(expr) => PlanStage::Filter(super::filter::FilterStage::new(
                Box::new(scan),
                expr.clone(),
            )),
            None => scan,
        }
    } else if let Some(branches) = filter.as_ref().and_then(Expression::rooted_or_branches) {
        PlanStage::Subplan(SubplanStage::new(Arc::clone(collection), branches)?)
    } else {
        let shape = QueryShape::of(filter.as_ref(), request.reverse);
        if let Some(cached) = collection.plan_cache().get(&shape) {
            match cached.solution.build(collection) {
                Ok(cached_root) => PlanStage::CachedPlan(CachedPlanStage::new(
                    Arc::clone(collection),
                    shape,
                    filter.clone(),
                    request.reverse,
                    cached_root,
                    cached.decision_works,
                )),
                Err(_) => {
                    // The cached recipe references a dropped index.
                    collection.plan_cache().remove(&shape);
                    build_raced_root(collection, filter.as_ref(), request.reverse)?
                }
            }
        } else {
            build_raced_root(collection, filter.as_ref(), request.reverse)?
        }
    };

    if let Some(sort_doc) = &request.sort {
        let pattern = KeyPattern::from_document(sort_doc)
            .ok_or_else(|| Error::BadValue(format!("invalid sort pattern: {sort_doc}")))?;
        root = PlanStage::Sort(SortStage::new(Box::new(root), pattern));
    }
    if let Some(skip) = request.skip {
        root = PlanStage::Skip(SkipStage::new(Box::new(root), skip));
    }
    if let Some(limit) = request.limit {
        root = PlanStage::Limit(LimitStage::new(Box::new(root), limit));
    }
    if let Some(projection) = request.projection.clone() {
        root = PlanStage::Projection(ProjectionStage::new(Box::new(root), projection));
    }

    PlanExecutor::new(
        opctx,
        Some(Arc::clone(collection)),
        root,
        YieldPolicy::YieldAuto,
        request.tailable_await_data,
    )
}

fn build_raced_root(
    collection: &Arc<CollectionDescriptor>,
    filter: Option<&Expression>,
    reverse: bool,
) -> Result<PlanStage> {
    let solutions = plan_candidates(collection, filter, reverse);
    if solutions.len() == 1 {
        return solutions[0].build(collection);
    }
    let shape = QueryShape::of(filter, reverse);
    let mut candidates = Vec::with_capacity(solutions.len());
    for solution in solutions {
        let built = solution.build(collection)?;
        candidates.push((solution, built));
    }
    Ok(PlanStage::MultiPlan(MultiPlanStage::new(Arc::clone(collection), shape, candidates)))
}

/// Build an update executor: the find subtree feeds an update stage.
///
/// # Errors
///
/// See [`build_find_executor`].
pub fn build_update_executor(
    opctx: &mut OperationContext,
    collection: &Arc<CollectionDescriptor>,
    filter: Option<&Document>,
    spec: UpdateSpec,
) -> Result<PlanExecutor> {
    let filter_expr = match filter {
        Some(doc) => Some(Expression::parse(doc)?),
        None => None,
    };
    let child = build_raced_root(collection, filter_expr.as_ref(), false)?;
    let root = PlanStage::Update(UpdateStage::new(
        Box::new(child),
        Arc::clone(collection),
        spec,
    ));
    PlanExecutor::new(opctx, Some(Arc::clone(collection)), root, YieldPolicy::YieldAuto, false)
}

/// Build a delete executor: the find subtree feeds a delete stage.
///
/// # Errors
///
/// See [`build_find_executor`].
pub fn build_delete_executor(
    opctx: &mut OperationContext,
    collection: &Arc<CollectionDescriptor>,
    filter: Option<&Document>,
) -> Result<PlanExecutor> {
    let filter_expr = match filter {
        Some(doc) => Some(Expression::parse(doc)?),
        None => None,
    };
    let child = build_raced_root(collection, filter_expr.as_ref(), false)?;
    let root = PlanStage::Delete(DeleteStage::new(Box::new(child), Arc::clone(collection)));
    PlanExecutor::new(opctx, Some(Arc::clone(collection)), root, YieldPolicy::YieldAuto, false)
}
