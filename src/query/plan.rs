// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The shapes the optimizer produces and the executor consumes
//! (`spec.md` §3 `QueryExecutionPlan`, `IndexScanKey`; §4.4, §4.5).

use crate::contracts::IndexScanRange;
use crate::query::algebra::{BinaryOp, Expr};
use crate::value::Value;

/// One `field OP constant` (or mirrored `constant OP field`) comparison the
/// optimizer pulled out of an `AndAlso` conjunction (`spec.md` §4.4 step 2).
#[derive(Clone, Debug, PartialEq)]
pub struct IndexScanKey {
    pub field: String,
    pub comparison: BinaryOp,
    pub value: Value,
}

impl IndexScanKey {
    /// Folds this key into a half-open/closed range over an index's key
    /// domain, for `Strategy::IndexScan` (`spec.md` §4.5).
    pub fn to_range(&self) -> IndexScanRange {
        match self.comparison {
            BinaryOp::Eq => IndexScanRange {
                include_min: true,
                min: Some(self.value.clone()),
                include_max: true,
                max: Some(self.value.clone()),
            },
            BinaryOp::Lt => IndexScanRange {
                include_max: false,
                max: Some(self.value.clone()),
                ..IndexScanRange::UNBOUNDED
            },
            BinaryOp::Le => IndexScanRange {
                include_max: true,
                max: Some(self.value.clone()),
                ..IndexScanRange::UNBOUNDED
            },
            BinaryOp::Gt => IndexScanRange {
                include_min: false,
                min: Some(self.value.clone()),
                ..IndexScanRange::UNBOUNDED
            },
            BinaryOp::Ge => IndexScanRange {
                include_min: true,
                min: Some(self.value.clone()),
                ..IndexScanRange::UNBOUNDED
            },
            _ => IndexScanRange::UNBOUNDED,
        }
    }
}

/// The access strategy the optimizer committed to (`spec.md` §4.4, §4.5).
#[derive(Clone, Debug, PartialEq)]
pub enum Strategy {
    FullTableScan,
    IndexScan { index: String },
    IndexSeek { index: String },
    PrimaryKeyLookup { keys: Vec<Value> },
}

/// The output of the optimizer and the input to the executor
/// (`spec.md` §3 `QueryExecutionPlan`).
#[derive(Clone, Debug, PartialEq)]
pub struct QueryExecutionPlan {
    pub collection: String,
    pub strategy: Strategy,
    pub use_index: Option<String>,
    pub index_scan_keys: Vec<IndexScanKey>,
    /// The predicate rewritten in terms of the chosen index's key domain, if
    /// any (`spec.md` §4.4 "host value -> index-domain value" conversion).
    pub query_expression: Option<Expr>,
    /// The original, unrewritten predicate. The executor always re-checks
    /// this against every candidate row (`spec.md` §4.5 "re-check").
    pub original_expression: Option<Expr>,
}

impl QueryExecutionPlan {
    pub fn full_scan(collection: impl Into<String>, predicate: Option<Expr>) -> Self {
        Self {
            collection: collection.into(),
            strategy: Strategy::FullTableScan,
            use_index: None,
            index_scan_keys: Vec::new(),
            query_expression: predicate.clone(),
            original_expression: predicate,
        }
    }
}
