//! Compilation of predicate lists into structured backend queries.
//!
//! [`compile`] folds an ordered list of [`Predicate`]s onto a collection
//! path. Filters keep their list order; order-by clauses keep theirs; limit
//! clauses land in a dedicated slot so a limit always applies after all
//! filters and ordering, wherever it appeared in the list. A later limit
//! predicate overrides an earlier one.
//!
//! No validation of conflicting filters happens here — the backend rejects
//! impossible combinations at execution time.

use crate::predicate::{CollectionPath, FieldValue, Predicate};
use serde::{Deserialize, Serialize};

/// Comparison operator of a single field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Equals,
    NotEquals,
    In,
    NotIn,
    ArrayContains,
    ArrayContainsAny,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
}

/// One compiled filter clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Document field the filter applies to.
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Operand. Set-valued operators (`In`, `NotIn`, `ArrayContainsAny`)
    /// always carry a `FieldValue::List`.
    pub value: FieldValue,
}

/// One compiled ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Document field to sort by.
    pub field: String,
    /// Sort direction.
    pub descending: bool,
}

/// Result-count cap, applied after filtering and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultLimit {
    /// Keep the first `count` results.
    First { count: u32 },
    /// Keep the last `count` results of the ordered set.
    Last { count: u32 },
}

/// A concrete backend query: the output of [`compile`].
///
/// Structurally comparable — compiling the same predicate list twice yields
/// equal queries. Serializable because the remote store ships the query to
/// the backend as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    /// Target collection.
    pub collection: CollectionPath,
    /// Filter clauses in original predicate-list order.
    pub filters: Vec<FieldFilter>,
    /// Ordering clauses in original predicate-list order.
    pub order_by: Vec<OrderBy>,
    /// Optional result cap; always applies last.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<ResultLimit>,
}

impl StructuredQuery {
    /// A query over `collection` with no filters, ordering or limit.
    pub fn unfiltered(collection: CollectionPath) -> Self {
        StructuredQuery {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }
}

/// Fold `predicates` in list order onto `collection`.
pub fn compile(collection: CollectionPath, predicates: &[Predicate]) -> StructuredQuery {
    let mut query = StructuredQuery::unfiltered(collection);

    for predicate in predicates {
        match predicate.clone() {
            Predicate::Equals { field, value } => {
                query.filters.push(FieldFilter { field, op: FilterOp::Equals, value });
            },
            Predicate::NotEquals { field, value } => {
                query.filters.push(FieldFilter { field, op: FilterOp::NotEquals, value });
            },
            Predicate::In { field, values } => {
                query.filters.push(FieldFilter {
                    field,
                    op: FilterOp::In,
                    value: FieldValue::List(values),
                });
            },
            Predicate::NotIn { field, values } => {
                query.filters.push(FieldFilter {
                    field,
                    op: FilterOp::NotIn,
                    value: FieldValue::List(values),
                });
            },
            Predicate::ArrayContains { field, value } => {
                query.filters.push(FieldFilter { field, op: FilterOp::ArrayContains, value });
            },
            Predicate::ArrayContainsAny { field, values } => {
                query.filters.push(FieldFilter {
                    field,
                    op: FilterOp::ArrayContainsAny,
                    value: FieldValue::List(values),
                });
            },
            Predicate::LessThan { field, value } => {
                query.filters.push(FieldFilter { field, op: FilterOp::LessThan, value });
            },
            Predicate::GreaterThan { field, value } => {
                query.filters.push(FieldFilter { field, op: FilterOp::GreaterThan, value });
            },
            Predicate::LessThanOrEqual { field, value } => {
                query.filters.push(FieldFilter { field, op: FilterOp::LessThanOrEqual, value });
            },
            Predicate::GreaterThanOrEqual { field, value } => {
                query
                    .filters
                    .push(FieldFilter { field, op: FilterOp::GreaterThanOrEqual, value });
            },
            Predicate::OrderBy { field, descending } => {
                query.order_by.push(OrderBy { field, descending });
            },
            Predicate::Limit { count } => {
                query.limit = Some(ResultLimit::First { count });
            },
            Predicate::LimitToLast { count } => {
                query.limit = Some(ResultLimit::Last { count });
            },
        }
    }

    query
}
