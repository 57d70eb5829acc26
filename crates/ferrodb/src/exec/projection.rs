//! Projection stage.

use ferrodb_core::{Document, RecordId};

use crate::error::Result;

use super::stage::{PlanStage, StageContext, StageStats, WorkState};
use super::working_set::WorkingSet;

/// Which fields survive the projection.
#[derive(Debug, Clone)]
pub enum ProjectionSpec {
    /// Keep only the named fields; `_id` is kept unless excluded.
    Include(Vec<String>),
    /// Drop the named fields.
    Exclude(Vec<String>),
}

impl ProjectionSpec {
    fn apply(&self, doc: &Document) -> Document {
        match self {
            Self::Include(fields) => {
                let mut out = Document::new();
                if let Some(id) = doc.get("_id") {
                    if !fields.iter().any(|f| f == "_id") {
                        out.set("_id", id.clone());
                    }
                }
                for field in fields {
                    if let Some(value) = doc.get(field) {
                        out.set(field.clone(), value.clone());
                    }
                }
                out
            }
            Self::Exclude(fields) => {
                let mut out = doc.clone();
                for field in fields {
                    out.remove(field);
                }
                out
            }
        }
    }
}

/// Rewrites each member's document per the projection spec.
pub struct ProjectionStage {
    child: Box<PlanStage>,
    spec: ProjectionSpec,
    pub stats: StageStats,
}

impl ProjectionStage {
    #[must_use]
    pub fn new(child: Box<PlanStage>, spec: ProjectionSpec) -> Self {
        Self { child, spec, stats: StageStats::default() }
    }

    pub(crate) fn work(&mut self, ctx: &mut StageContext<'_>) -> WorkState {
        match self.child.work(ctx) {
            WorkState::Advanced(id) => {
                if let Some(member) = ctx.ws.get_mut(id) {
                    if let Some(doc) = &member.doc {
                        member.doc = Some(self.spec.apply(doc));
                    }
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use ferrodb_core::Value;

    #[test]
    fn include_keeps_id_by_default() {
        let spec = ProjectionSpec::Include(vec!["a".into()]);
        let doc = Document::new()
            .with_field("_id", 1i64)
            .with_field("a", 2i64)
            .with_field("b", 3i64);
        let projected = spec.apply(&doc);
        assert_eq!(projected.get("_id"), Some(&Value::Int(1)));
        assert_eq!(projected.get("a"), Some(&Value::Int(2)));
        assert_eq!(projected.get("b"), None);
    }

    #[test]
    fn exclude_removes_fields() {
        let spec = ProjectionSpec::Exclude(vec!["b".into()]);
        let doc = Document::new().with_field("a", 2i64).with_field("b", 3i64);
        let projected = spec.apply(&doc);
        assert!(projected.contains("a"));
        assert!(!projected.contains("b"));
    }
}
