//! Update stage.

use std::sync::Arc;

use ferrodb_core::{Document, RecordId};

use crate::catalog::collection::CollectionDescriptor;
use crate::error::{Error, Result};
use crate::operation::OperationContext;

use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::{MemberState, WorkingSet};

/// How matched documents are rewritten.
#[derive(Debug, Clone)]
pub enum UpdateSpec {
    /// Merge the given fields over the existing document.
    Set(Document),
    /// Replace everything except `_id`.
    Replace(Document),
}

impl UpdateSpec {
    /// Produce the post-image for `current`.
    #[must_use]
    pub fn apply(&self, current: &Document) -> Document {
        match self {
            Self::Set(fields) => {
                let mut next = current.clone();
                for (name, value) in fields.iter() {
                    next.set(name.to_string(), value.clone());
                }
                next
            }
            Self::Replace(replacement) => {
                let mut next = replacement.clone();
                if let Some(id) = current.get("_id") {
                    next.set("_id", id.clone());
                }
                next
            }
        }
    }
}

/// Applies a mutation to each matched document inside a write unit of
/// work. A write conflict surfaces as `NeedYield` with no fetch id; the
/// executor yields, and the next `work` call re-reads the record fresh
/// and retries the same mutation.
pub struct UpdateStage {
    child: Box<PlanStage>,
    collection: Arc<CollectionDescriptor>,
    spec: UpdateSpec,
    /// Record stashed across a write-conflict retry.
    retry: Option<RecordId>,
    pub docs_matched: u64,
    pub docs_modified: u64,
    pub write_conflicts: u64,
    pub stats: StageStats,
}

impl UpdateStage {
    #[must_use]
    pub fn new(
        child: Box<PlanStage>,
        collection: Arc<CollectionDescriptor>,
        spec: UpdateSpec,
    ) -> Self {
        Self {
            child,
            collection,
            spec,
            retry: None,
            docs_matched: 0,
            docs_modified: 0,
            write_conflicts: 0,
            stats: StageStats::default(),
        }
    }

    fn apply_update(
        &mut self,
        opctx: &mut OperationContext,
        rid: RecordId,
        current: &Document,
        version: u64,
    ) -> Result<Document> {
        let next = self.spec.apply(current);
        opctx.begin_write_unit_of_work();
        match self.collection.update_document(opctx, rid, version, &next) {
            Ok(_) => {
                opctx.commit_write_unit_of_work();
                Ok(next)
            }
            Err(err) => {
                opctx.abort_write_unit_of_work();
                Err(err)
            }
        }
    }

    fn work_on_record(
        &mut self,
        ctx: &mut StageContext<'_>,
        id: super::working_set::WorkingSetId,
        rid: RecordId,
        current: Document,
        version: u64,
    ) -> WorkState {
        match self.apply_update(ctx.opctx, rid, &current, version) {
            Ok(next) => {
                self.docs_modified += 1;
                if let Some(member) = ctx.ws.get_mut(id) {
                    member.doc = Some(next);
                    member.state = MemberState::RecordIdAndObj;
                }
                WorkState::Advanced(id)
            }
            Err(err) if err.is_write_conflict() => {
                self.write_conflicts += 1;
                self.retry = Some(rid);
                ctx.ws.free(id);
                WorkState::NeedYield { fetch: None }
            }
            Err(err) => {
                let status = ctx.ws.allocate_status(err.code(), err.to_string());
                ctx.ws.free(id);
                WorkState::Failure(status)
            }
        }
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        // A stashed record from a write-conflict retry is re-read fresh
        // so the mutation applies over the winner's post-image.
        if let Some(rid) = self.retry.take() {
            let Some((current, version)) = self.collection.find_document(rid) else {
                return WorkState::NeedTime;
            };
            self.docs_matched += 1;
            let id = ctx.ws.allocate();
            if let Some(member) = ctx.ws.get_mut(id) {
                member.record_id = rid;
                member.state = MemberState::RecordIdAndObj;
            }
            return self.work_on_record(ctx, id, rid, current, version);
        }

        match self.child.work(ctx) {
            WorkState::Advanced(id) => {
                let Some(member) = ctx.ws.get(id) else {
                    return WorkState::NeedTime;
                };
                let (rid, version) = (member.record_id, member.doc_version);
                let Some(current) = member.doc.clone() else {
                    ctx.ws.free(id);
                    return WorkState::NeedTime;
                };
                if rid.is_null() {
                    ctx.ws.free(id);
                    return WorkState::NeedTime;
                }
                self.docs_matched += 1;
                self.work_on_record(ctx, id, rid, current, version)
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
        if self.retry == Some(rid) {
            self.retry = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use ferrodb_concurrency::ConcurrencyContext;
    use ferrodb_core::{
        CollectionOptions, CollectionUuid, KeyPattern, NamespaceString, Value,
    };
    use ferrodb_storage::{MemoryEngine, RecordStoreOptions, ScanDirection, StorageEngine};

    use crate::catalog::collection::CollectionState;
    use crate::exec::collection_scan::CollectionScanStage;
    use crate::exec::sort::SortStage;

    use super::*;

    fn active_collection() -> Arc<CollectionDescriptor> {
        let engine = MemoryEngine::new();
        let store =
            engine.create_record_store("db.c", RecordStoreOptions::default()).expect("store");
        let coll = CollectionDescriptor::new(
            CollectionUuid::generate(),
            NamespaceString::parse("db.c").unwrap(),
            CollectionOptions::default(),
            store,
        );
        coll.set_state(CollectionState::Active);
        coll
    }

    /// A buffering child gives a concurrent writer a window between the
    /// read of a document's version and the update that checks it: the
    /// first attempt must surface a write conflict as NeedYield, and the
    /// retry must apply over the winner's post-image.
    #[test]
    fn write_conflict_yields_then_retries_over_fresh_image() {
        let coll = active_collection();
        let mut opctx = OperationContext::new(ConcurrencyContext::new());
        let rid = coll
            .insert_document(
                &mut opctx,
                &Document::new().with_field("_id", 1i64).with_field("counter", 0i64),
            )
            .expect("seed");

        let scan = PlanStage::CollectionScan(CollectionScanStage::new(
            Arc::clone(&coll),
            ScanDirection::Forward,
            false,
        ));
        let sort =
            PlanStage::Sort(SortStage::new(Box::new(scan), KeyPattern::ascending("_id")));
        let mut update = UpdateStage::new(
            Box::new(sort),
            Arc::clone(&coll),
            UpdateSpec::Set(Document::new().with_field("updated", true)),
        );

        let mut ws = super::super::working_set::WorkingSet::new();

        // Two calls: the sort buffers the only document (capturing its
        // version), then sees its input EOF.
        for _ in 0..2 {
            let mut ctx = StageContext { ws: &mut ws, opctx: &mut opctx };
            assert_eq!(update.work(&mut ctx), WorkState::NeedTime);
        }

        // A concurrent writer wins the race.
        let (current, version) = coll.find_document(rid).expect("present");
        let mut bumped = current.clone();
        bumped.set("counter", 7i64);
        coll.update_document(&mut opctx, rid, version, &bumped).expect("concurrent update");

        // The buffered version is now stale: conflict, request a yield.
        let mut ctx = StageContext { ws: &mut ws, opctx: &mut opctx };
        assert_eq!(update.work(&mut ctx), WorkState::NeedYield { fetch: None });
        assert_eq!(update.write_conflicts, 1);

        // Retry reads fresh and merges over the winner's image.
        let mut ctx = StageContext { ws: &mut ws, opctx: &mut opctx };
        let state = update.work(&mut ctx);
        let WorkState::Advanced(id) = state else {
            panic!("expected Advanced after retry, got {state:?}");
        };
        let member = ctx.ws.get(id).expect("member");
        let doc = member.doc.as_ref().expect("doc");
        assert_eq!(doc.get("counter"), Some(&Value::Int(7)));
        assert_eq!(doc.get("updated"), Some(&Value::Bool(true)));
        assert_eq!(update.docs_modified, 1);
    }
}
