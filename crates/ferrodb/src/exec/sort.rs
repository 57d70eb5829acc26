//! Sort stage.

use std::cmp::Ordering;

use ferrodb_core::{IndexKey, KeyPattern, RecordId, SortDirection};

use crate::error::Result;

use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::{WorkingSet, WorkingSetId};

/// Blocking sort: buffers its entire input, then emits in key order.
///
/// Invalidation matters here: buffered members referencing a deleted
/// record are purged when the notification arrives, before the executor
/// could hand them out.
pub struct SortStage {
    child: Box<PlanStage>,
    pattern: KeyPattern,
    buffered: Vec<(IndexKey, RecordId, WorkingSetId)>,
    input_done: bool,
    sorted: bool,
    emit_from: usize,
    pub stats: StageStats,
}

impl SortStage {
    #[must_use]
    pub fn new(child: Box<PlanStage>, pattern: KeyPattern) -> Self {
        Self {
            child,
            pattern,
            buffered: Vec::new(),
            input_done: false,
            sorted: false,
            emit_from: 0,
            stats: StageStats::default(),
        }
    }

    fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        for (idx, (_, direction)) in self.pattern.fields().iter().enumerate() {
            let (left, right) = (&a.values()[idx], &b.values()[idx]);
            let ord = match direction {
                SortDirection::Ascending => left.cmp(right),
                SortDirection::Descending => right.cmp(left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        if !self.input_done {
            return match self.child.work(ctx) {
                WorkState::Advanced(id) => {
                    let Some(member) = ctx.ws.get(id) else {
                        return WorkState::NeedTime;
                    };
                    let Some(doc) = &member.doc else {
                        ctx.ws.free(id);
                        return WorkState::NeedTime;
                    };
                    let key = self.pattern.extract(doc);
                    self.buffered.push((key, member.record_id, id));
                    WorkState::NeedTime
                }
                WorkState::IsEof => {
                    self.input_done = true;
                    WorkState::NeedTime
                }
                other => other,
            };
        }

        if !self.sorted {
            let mut buffered = std::mem::take(&mut self.buffered);
            buffered.sort_by(|(a, _, _), (b, _, _)| self.compare(a, b));
            self.buffered = buffered;
            self.sorted = true;
        }

        if self.emit_from >= self.buffered.len() {
            return WorkState::IsEof;
        }
        let (_, _, id) = self.buffered[self.emit_from];
        self.emit_from += 1;
        WorkState::Advanced(id)
    }

    pub(crate) fn save_state(&mut self) {
        self.child.save_state();
    }

    pub(crate) fn restore_state(&mut self) -> Result<()> {
        self.child.restore_state()
    }

    pub(crate) fn invalidate(&mut self, ws: &mut WorkingSet, rid: RecordId) {
        self.child.invalidate(ws, rid);
        // Purge not-yet-emitted entries for the record; entries already
        // handed out are the consumer's problem.
        let mut kept = Vec::with_capacity(self.buffered.len());
        for (idx, (key, buffered_rid, id)) in self.buffered.drain(..).enumerate() {
            if idx >= self.emit_from && buffered_rid == rid {
                ws.free(id);
                continue;
            }
            kept.push((key, buffered_rid, id));
        }
        self.buffered = kept;
    }
}
