//! Filter expressions.
//!
//! The executor's residual-filter language: field comparisons combined
//! with `$and` / `$or` / `$not` / `$exists`, parsed from query documents
//! like `{a: 1, b: {$gt: 5}}` or `{$or: [{a: 1}, {b: 1}]}`.

use ferrodb_core::{Document, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Comparison operators over the [`Value`] total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl ComparisonOp {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
        }
    }

    fn evaluate(self, lhs: Option<&Value>, rhs: &Value) -> bool {
        match self {
            // Missing fields compare as null for equality, matching the
            // index-key extraction convention.
            Self::Eq => lhs.unwrap_or(&Value::Null) == rhs,
            Self::Ne => lhs.unwrap_or(&Value::Null) != rhs,
            // Range comparisons never match a missing field.
            Self::Lt => lhs.is_some_and(|v| v < rhs),
            Self::Lte => lhs.is_some_and(|v| v <= rhs),
            Self::Gt => lhs.is_some_and(|v| v > rhs),
            Self::Gte => lhs.is_some_and(|v| v >= rhs),
        }
    }
}

/// A parsed filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Matches every document.
    AlwaysTrue,
    Comparison {
        path: String,
        op: ComparisonOp,
        value: Value,
    },
    Exists {
        path: String,
        exists: bool,
    },
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    /// Shorthand for a single equality predicate.
    #[must_use]
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Comparison { path: path.into(), op: ComparisonOp::Eq, value: value.into() }
    }

    /// Parse a query document into an expression tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FailedToParse`] on unknown operators or
    /// malformed `$or`/`$and` arrays.
    pub fn parse(query: &Document) -> Result<Self> {
        let mut clauses = Vec::with_capacity(query.len());
        for (field, value) in query.iter() {
            match field {
                "$or" | "$and" => {
                    let Value::Array(items) = value else {
                        return Err(Error::FailedToParse(format!("{field} requires an array")));
                    };
                    let mut branches = Vec::with_capacity(items.len());
                    for item in items {
                        let Value::Document(doc) = item else {
                            return Err(Error::FailedToParse(format!(
                                "{field} entries must be documents"
                            )));
                        };
                        branches.push(Self::parse(doc)?);
                    }
                    if branches.is_empty() {
                        return Err(Error::FailedToParse(format!("{field} cannot be empty")));
                    }
                    clauses.push(if field == "$or" {
                        Self::Or(branches)
                    } else {
                        Self::And(branches)
                    });
                }
                _ if field.starts_with('$') => {
                    return Err(Error::FailedToParse(format!("unknown top-level operator {field}")));
                }
                _ => clauses.push(Self::parse_predicate(field, value)?),
            }
        }
        Ok(match clauses.len() {
            0 => Self::AlwaysTrue,
            1 => clauses.pop().unwrap_or(Self::AlwaysTrue),
            _ => Self::And(clauses),
        })
    }

    fn parse_predicate(path: &str, value: &Value) -> Result<Self> {
        let Value::Document(spec) = value else {
            // A bare value is an equality match.
            return Ok(Self::Comparison {
                path: path.to_string(),
                op: ComparisonOp::Eq,
                value: value.clone(),
            });
        };
        // Operator document: every field must be an operator.
        let all_operators = !spec.is_empty() && spec.field_names().all(|name| name.starts_with('$'));
        if !all_operators {
            // A plain sub-document compares for whole-value equality.
            return Ok(Self::Comparison {
                path: path.to_string(),
                op: ComparisonOp::Eq,
                value: value.clone(),
            });
        }
        let mut parts = Vec::with_capacity(spec.len());
        for (op_name, operand) in spec.iter() {
            match op_name {
                "$exists" => {
                    parts.push(Self::Exists {
                        path: path.to_string(),
                        exists: operand.as_bool().unwrap_or(true),
                    });
                }
                "$not" => {
                    let Value::Document(inner) = operand else {
                        return Err(Error::FailedToParse("$not requires a document".into()));
                    };
                    parts.push(Self::Not(Box::new(Self::parse_predicate(path, &Value::Document(inner.clone()))?)));
                }
                _ => {
                    let Some(op) = ComparisonOp::parse(op_name) else {
                        return Err(Error::FailedToParse(format!("unknown operator {op_name}")));
                    };
                    parts.push(Self::Comparison {
                        path: path.to_string(),
                        op,
                        value: operand.clone(),
                    });
                }
            }
        }
        Ok(match parts.len() {
            1 => parts.pop().unwrap_or(Self::AlwaysTrue),
            _ => Self::And(parts),
        })
    }

    /// Evaluate against a document.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::AlwaysTrue => true,
            Self::Comparison { path, op, value } => op.evaluate(doc.get_path(path), value),
            Self::Exists { path, exists } => doc.get_path(path).is_some() == *exists,
            Self::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Self::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Self::Not(inner) => !inner.matches(doc),
        }
    }

    /// The branches of a rooted `$or`, which the subplanner plans
    /// independently.
    #[must_use]
    pub fn rooted_or_branches(&self) -> Option<&[Expression]> {
        match self {
            Self::Or(branches) => Some(branches),
            _ => None,
        }
    }

    /// Top-level conjunct predicates as (path, op, value) triples; used
    /// by the planner for index applicability.
    #[must_use]
    pub fn conjunct_predicates(&self) -> Vec<(&str, ComparisonOp, &Value)> {
        match self {
            Self::Comparison { path, op, value } => vec![(path.as_str(), *op, value)],
            Self::And(clauses) => clauses
                .iter()
                .flat_map(|clause| match clause {
                    Self::Comparison { path, op, value } => {
                        Some((path.as_str(), *op, value))
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Canonical shape with values elided, the plan-cache key component.
    #[must_use]
    pub fn shape(&self) -> String {
        match self {
            Self::AlwaysTrue => "{}".to_string(),
            Self::Comparison { path, op, .. } => format!("{{{path}:{}}}", op.as_str()),
            Self::Exists { path, exists } => format!("{{{path}:$exists:{exists}}}"),
            Self::And(clauses) => {
                let inner: Vec<String> = clauses.iter().map(Self::shape).collect();
                format!("$and[{}]", inner.join(","))
            }
            Self::Or(clauses) => {
                let inner: Vec<String> = clauses.iter().map(Self::shape).collect();
                format!("$or[{}]", inner.join(","))
            }
            Self::Not(inner) => format!("$not[{}]", inner.shape()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new()
            .with_field("a", 5i64)
            .with_field("b", "hello")
            .with_field("nested", Document::new().with_field("x", 1i64))
    }

    #[test]
    fn bare_equality() {
        let expr = Expression::parse(&Document::new().with_field("a", 5i64)).unwrap();
        assert!(expr.matches(&doc()));
        assert!(!expr.matches(&Document::new().with_field("a", 6i64)));
    }

    #[test]
    fn range_operators() {
        let query = Document::new().with_field(
            "a",
            Document::new().with_field("$gt", 1i64).with_field("$lte", 5i64),
        );
        let expr = Expression::parse(&query).unwrap();
        assert!(expr.matches(&doc()));
        assert!(!expr.matches(&Document::new().with_field("a", 6i64)));
        // Range comparisons do not match a missing field.
        assert!(!expr.matches(&Document::new()));
    }

    #[test]
    fn rooted_or() {
        let query = Document::new().with_field(
            "$or",
            vec![
                Value::Document(Document::new().with_field("a", 1i64)),
                Value::Document(Document::new().with_field("b", "hello")),
            ],
        );
        let expr = Expression::parse(&query).unwrap();
        assert!(expr.rooted_or_branches().is_some());
        assert!(expr.matches(&doc()));
        assert!(!expr.matches(&Document::new().with_field("a", 2i64)));
    }

    #[test]
    fn exists_and_not() {
        let query = Document::new()
            .with_field("a", Document::new().with_field("$exists", true))
            .with_field("missing", Document::new().with_field("$exists", false));
        let expr = Expression::parse(&query).unwrap();
        assert!(expr.matches(&doc()));

        let not_query = Document::new()
            .with_field("a", Document::new().with_field("$not", Document::new().with_field("$gt", 10i64)));
        let expr = Expression::parse(&not_query).unwrap();
        assert!(expr.matches(&doc()));
    }

    #[test]
    fn dotted_paths() {
        let expr = Expression::parse(&Document::new().with_field("nested.x", 1i64)).unwrap();
        assert!(expr.matches(&doc()));
    }

    #[test]
    fn unknown_operator_fails_to_parse() {
        let query = Document::new().with_field("a", Document::new().with_field("$regex", "x"));
        assert!(Expression::parse(&query).is_err());
    }

    #[test]
    fn shape_elides_values() {
        let a = Expression::parse(&Document::new().with_field("a", 5i64)).unwrap();
        let b = Expression::parse(&Document::new().with_field("a", 99i64)).unwrap();
        assert_eq!(a.shape(), b.shape());

        let c = Expression::parse(
            &Document::new().with_field("a", Document::new().with_field("$gt", 5i64)),
        )
        .unwrap();
        assert_ne!(a.shape(), c.shape());
    }

    #[test]
    fn conjunct_predicates_for_planning() {
        let query = Document::new()
            .with_field("a", 1i64)
            .with_field("b", Document::new().with_field("$lt", 9i64));
        let expr = Expression::parse(&query).unwrap();
        let predicates = expr.conjunct_predicates();
        assert_eq!(predicates.len(), 2);
        assert_eq!(predicates[0].0, "a");
        assert_eq!(predicates[1].1, ComparisonOp::Lt);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// An equality filter matches exactly the documents carrying
            /// that value.
            #[test]
            fn equality_matches_iff_value_equal(target in -1000i64..1000, probe in -1000i64..1000) {
                let expr =
                    Expression::parse(&Document::new().with_field("n", target)).unwrap();
                let doc = Document::new().with_field("n", probe);
                prop_assert_eq!(expr.matches(&doc), target == probe);
            }

            /// Range operators agree with the integer order.
            #[test]
            fn range_operators_agree_with_ordering(bound in -1000i64..1000, probe in -1000i64..1000) {
                let query = Document::new()
                    .with_field("n", Document::new().with_field("$gt", bound));
                let expr = Expression::parse(&query).unwrap();
                let doc = Document::new().with_field("n", probe);
                prop_assert_eq!(expr.matches(&doc), probe > bound);
            }

            /// The canonical shape ignores the compared value.
            #[test]
            fn shape_is_value_independent(a in -1000i64..1000, b in -1000i64..1000) {
                let shape_a =
                    Expression::parse(&Document::new().with_field("n", a)).unwrap().shape();
                let shape_b =
                    Expression::parse(&Document::new().with_field("n", b)).unwrap().shape();
                prop_assert_eq!(shape_a, shape_b);
            }
        }
    }
}
