//! Candidate-plan generation.
//!
//! A deliberately small planner: it extracts the top-level conjunct
//! predicates from the filter, offers one index-scan-plus-fetch
//! candidate per applicable single-field index, and always includes the
//! collection-scan fallback. Ranking between candidates is not decided
//! here - that is the multi-plan trial's job.

use std::ops::Bound;
use std::sync::Arc;

use ferrodb_core::{IndexKey, Value};
use ferrodb_storage::ScanDirection;

use crate::catalog::collection::CollectionDescriptor;
use crate::catalog::index::{lookup_key, IntervalBounds};
use crate::error::{Error, Result};

use super::collection_scan::CollectionScanStage;
use super::expression::{ComparisonOp, Expression};
use super::fetch::FetchStage;
use super::filter::FilterStage;
use super::index_scan::IndexScanStage;
use super::stage::PlanStage;

/// A buildable plan recipe; what the plan cache stores.
#[derive(Debug, Clone)]
pub enum QuerySolution {
    CollScan {
        direction: ScanDirection,
        filter: Option<Expression>,
        tailable: bool,
    },
    IndexScanFetch {
        index_name: String,
        low: Bound<IndexKey>,
        high: Bound<IndexKey>,
        forward: bool,
        /// Residual filter applied after the fetch.
        filter: Option<Expression>,
    },
}

impl QuerySolution {
    /// Materialize the stage tree for this recipe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexNotFound`] when a cached recipe references
    /// an index that has since been dropped; callers treat that as a
    /// stale cache entry.
    pub fn build(&self, collection: &Arc<CollectionDescriptor>) -> Result<PlanStage> {
        match self {
            Self::CollScan { direction, filter, tailable } => {
                let scan = PlanStage::CollectionScan(CollectionScanStage::new(
                    Arc::clone(collection),
                    *direction,
                    *tailable,
                ));
                Ok(match filter {
                    Some(expr) => {
                        PlanStage::Filter(FilterStage::new(Box::new(scan), expr.clone()))
                    }
                    None => scan,
                })
            }
            Self::IndexScanFetch { index_name, low, high, forward, filter } => {
                let entry = collection
                    .index_catalog()
                    .find_by_name(index_name)
                    .ok_or_else(|| Error::IndexNotFound(index_name.clone()))?;
                let scan = PlanStage::IndexScan(IndexScanStage::new(
                    Arc::clone(collection),
                    entry,
                    IntervalBounds::new(low.clone(), high.clone()),
                    *forward,
                ));
                Ok(PlanStage::Fetch(FetchStage::new(
                    Box::new(scan),
                    Arc::clone(collection),
                    filter.clone(),
                )))
            }
        }
    }

    /// Short name for diagnostics.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::CollScan { .. } => "COLLSCAN".to_string(),
            Self::IndexScanFetch { index_name, .. } => format!("IXSCAN {index_name}"),
        }
    }
}

/// Generate candidate solutions for a filter over one collection.
///
/// The collection-scan fallback is always last, so a caller that takes
/// `candidates.len() == 1` as "no index applies" reads naturally.
#[must_use]
pub fn plan_candidates(
    collection: &Arc<CollectionDescriptor>,
    filter: Option<&Expression>,
    reverse: bool,
) -> Vec<QuerySolution> {
    let mut candidates = Vec::new();
    let direction = if reverse { ScanDirection::Backward } else { ScanDirection::Forward };

    if let Some(expr) = filter {
        let predicates = expr.conjunct_predicates();
        for entry in collection.index_catalog().list() {
            let descriptor = entry.descriptor();
            // Sparse indexes may not contain every matching document.
            if descriptor.is_sparse() || descriptor.key_pattern().len() != 1 {
                continue;
            }
            let leading = descriptor.key_pattern().leading_field();
            let Some(bounds) = bounds_for_field(descriptor, &predicates, leading) else {
                continue;
            };
            candidates.push(QuerySolution::IndexScanFetch {
                index_name: descriptor.name().to_string(),
                low: bounds.low,
                high: bounds.high,
                forward: !reverse,
                filter: Some(expr.clone()),
            });
        }
    }

    candidates.push(QuerySolution::CollScan {
        direction,
        filter: filter.cloned(),
        tailable: false,
    });
    candidates
}

fn bounds_for_field(
    descriptor: &crate::catalog::index::IndexDescriptor,
    predicates: &[(&str, ComparisonOp, &Value)],
    field: &str,
) -> Option<IntervalBounds> {
    let on_field: Vec<_> =
        predicates.iter().filter(|(path, _, _)| *path == field).collect();
    if on_field.is_empty() {
        return None;
    }

    // An equality predicate wins outright and also serves hashed
    // indexes.
    if let Some((_, _, value)) =
        on_field.iter().find(|(_, op, _)| *op == ComparisonOp::Eq)
    {
        let key = lookup_key(descriptor, IndexKey::single((*value).clone()));
        return Some(IntervalBounds::point(key));
    }

    if !descriptor.access_method().supports_ranges() {
        return None;
    }

    let mut low = Bound::Unbounded;
    let mut high = Bound::Unbounded;
    for (_, op, value) in on_field {
        let key = IndexKey::single((*value).clone());
        match op {
            ComparisonOp::Gt => low = Bound::Excluded(key),
            ComparisonOp::Gte => low = Bound::Included(key),
            ComparisonOp::Lt => high = Bound::Excluded(key),
            ComparisonOp::Lte => high = Bound::Included(key),
            ComparisonOp::Eq | ComparisonOp::Ne => {}
        }
    }
    if matches!((&low, &high), (Bound::Unbounded, Bound::Unbounded)) {
        return None;
    }
    Some(IntervalBounds::new(low, high))
}

#[cfg(test)]
mod tests {
    use ferrodb_core::{
        CollectionOptions, CollectionUuid, Document, KeyPattern, NamespaceString,
    };
    use ferrodb_storage::{MemoryEngine, RecordStoreOptions, StorageEngine};

    use crate::catalog::collection::CollectionState;
    use crate::catalog::index::IndexDescriptor;

    use super::*;

    fn collection_with_indexes(indexes: &[&str]) -> Arc<CollectionDescriptor> {
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
        for field in indexes {
            coll.index_catalog()
                .create_index(
                    IndexDescriptor::new(format!("{field}_1"), KeyPattern::ascending(*field)),
                    &[],
                )
                .expect("index");
        }
        coll
    }

    fn filter(field: &str, value: i64) -> Expression {
        Expression::parse(&Document::new().with_field(field, value)).expect("parse")
    }

    #[test]
    fn no_filter_yields_collscan_only() {
        let coll = collection_with_indexes(&["a"]);
        let candidates = plan_candidates(&coll, None, false);
        assert_eq!(candidates.len(), 1);
        assert!(matches!(candidates[0], QuerySolution::CollScan { .. }));
    }

    #[test]
    fn equality_on_indexed_field_adds_index_candidate() {
        let coll = collection_with_indexes(&["a", "b"]);
        let expr = filter("a", 5);
        let candidates = plan_candidates(&coll, Some(&expr), false);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].summary(), "IXSCAN a_1");
        assert!(matches!(candidates.last(), Some(QuerySolution::CollScan { .. })));
    }

    #[test]
    fn range_predicates_build_interval_bounds() {
        let coll = collection_with_indexes(&["a"]);
        let query = Document::new().with_field(
            "a",
            Document::new().with_field("$gte", 1i64).with_field("$lt", 9i64),
        );
        let expr = Expression::parse(&query).expect("parse");
        let candidates = plan_candidates(&coll, Some(&expr), false);
        match &candidates[0] {
            QuerySolution::IndexScanFetch { low, high, .. } => {
                assert!(matches!(low, Bound::Included(_)));
                assert!(matches!(high, Bound::Excluded(_)));
            }
            other => panic!("expected index candidate, got {other:?}"),
        }
    }

    #[test]
    fn stale_solution_fails_to_build() {
        let coll = collection_with_indexes(&["a"]);
        let expr = filter("a", 5);
        let solution = plan_candidates(&coll, Some(&expr), false).remove(0);
        coll.drop_index("a_1").expect("drop");
        assert!(matches!(solution.build(&coll), Err(Error::IndexNotFound(_))));
    }
}
