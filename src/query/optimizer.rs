// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The query optimizer (`spec.md` §4.4): chooses a [`Strategy`] and extracts
//! [`IndexScanKey`]s from an `AndAlso`-conjoined predicate.

use std::collections::HashMap;

use crate::contracts::IndexCatalog;
use crate::query::algebra::{BinaryOp, Expr};
use crate::query::plan::{IndexScanKey, QueryExecutionPlan, Strategy};
use crate::value::Value;

/// The field name(s) that identify a document's primary key. `spec.md` §3:
/// document lookup resolves `Id` to the stored `_id` key, so either spelling
/// in a predicate is recognized as a primary-key reference.
fn is_primary_key_field(name: &str) -> bool {
    name.eq_ignore_ascii_case("id") || name == "_id"
}

/// `spec.md` §4.4: "1. A `null` predicate selects the full collection." ...
/// "7. The plan carries the chosen strategy, the index used (if any), the
/// keys extracted, the original predicate, and the predicate rewritten in
/// terms of the index's key domain."
pub fn optimize(collection: &str, predicate: Option<Expr>, catalog: &dyn IndexCatalog) -> QueryExecutionPlan {
    let Some(predicate) = predicate else {
        return QueryExecutionPlan::full_scan(collection, None);
    };

    let mut candidates: HashMap<String, IndexScanKey> = HashMap::new();
    collect_and_also_keys(&predicate, &mut candidates);

    if let Some(ids) = primary_key_equalities(&predicate) {
        return QueryExecutionPlan {
            collection: collection.to_string(),
            strategy: Strategy::PrimaryKeyLookup { keys: ids },
            use_index: None,
            index_scan_keys: Vec::new(),
            query_expression: Some(predicate.clone()),
            original_expression: Some(predicate),
        };
    }

    let indexes = catalog.list(collection);
    let mut best: Option<(f64, usize, &str, Vec<IndexScanKey>)> = None;
    for (declaration_order, index) in indexes.iter().enumerate() {
        let (score, keys) = score_index(index, &candidates);
        if keys.is_empty() {
            continue;
        }
        let better = match &best {
            None => true,
            Some((best_score, best_order, ..)) => score > *best_score || (score == *best_score && declaration_order < *best_order),
        };
        if better {
            best = Some((score, declaration_order, &index.name, keys));
        }
    }

    let Some((_, _, index_name, keys)) = best else {
        return QueryExecutionPlan::full_scan(collection, Some(predicate));
    };

    let index = indexes.iter().find(|i| i.name == index_name).expect("selected index exists");
    let all_eq = keys.iter().all(|k| k.comparison == BinaryOp::Eq);
    let covers_full_key = keys.len() == index.fields.len();
    let strategy = if index.is_unique && all_eq && covers_full_key {
        Strategy::IndexSeek { index: index_name.to_string() }
    } else {
        Strategy::IndexScan { index: index_name.to_string() }
    };

    QueryExecutionPlan {
        collection: collection.to_string(),
        strategy,
        use_index: Some(index_name.to_string()),
        index_scan_keys: keys,
        query_expression: Some(predicate.clone()),
        original_expression: Some(predicate),
    }
}

/// Flattens an `AndAlso` tree and records one candidate [`IndexScanKey`] per
/// field: `field OP constant`, or its mirror `constant OP field`
/// (`spec.md` §4.4 step 2).
fn collect_and_also_keys(expr: &Expr, out: &mut HashMap<String, IndexScanKey>) {
    match expr {
        Expr::Binary {
            op: BinaryOp::AndAlso,
            left,
            right,
        } => {
            collect_and_also_keys(left, out);
            collect_and_also_keys(right, out);
        }
        Expr::Binary { op, left, right } if op.is_comparison() => {
            if let Some((field, value)) = field_constant_pair(left, right) {
                out.entry(field.clone()).or_insert(IndexScanKey {
                    field,
                    comparison: *op,
                    value,
                });
            } else if let Some((field, value)) = field_constant_pair(right, left) {
                out.entry(field.clone()).or_insert(IndexScanKey {
                    field,
                    comparison: op.mirror(),
                    value,
                });
            }
        }
        _ => {}
    }
}

fn field_constant_pair(left: &Expr, right: &Expr) -> Option<(String, Value)> {
    match (left, right) {
        (Expr::Member { name, target: None }, Expr::Constant(value)) => Some((name.clone(), value.clone())),
        _ => None,
    }
}

/// `spec.md` §4.4 step 3: an `Eq` on the primary key (or an `OrElse` chain of
/// such equalities) shortcuts straight to `PrimaryKeyLookup`.
fn primary_key_equalities(expr: &Expr) -> Option<Vec<Value>> {
    match expr {
        Expr::Binary { op: BinaryOp::Eq, left, right } => match (&**left, &**right) {
            (Expr::Member { name, target: None }, Expr::Constant(v)) if is_primary_key_field(name) => {
                Some(vec![v.clone()])
            }
            (Expr::Constant(v), Expr::Member { name, target: None }) if is_primary_key_field(name) => {
                Some(vec![v.clone()])
            }
            _ => None,
        },
        Expr::Binary { op: BinaryOp::OrElse, left, right } => {
            let mut left_ids = primary_key_equalities(left)?;
            let right_ids = primary_key_equalities(right)?;
            left_ids.extend(right_ids);
            Some(left_ids)
        }
        _ => None,
    }
}

/// Scores an index against the candidate keys extracted from the predicate:
/// leading-field coverage (a gap stops the count), a uniqueness bonus, and a
/// bonus for covering the index's full key beyond a bare prefix
/// (`spec.md` §4.4 step 4).
fn score_index(index: &crate::contracts::IndexStatistics, candidates: &HashMap<String, IndexScanKey>) -> (f64, Vec<IndexScanKey>) {
    let mut keys = Vec::new();
    for field in &index.fields {
        match candidates.get(field) {
            Some(key) => keys.push(key.clone()),
            None => break,
        }
    }

    let mut score = keys.len() as f64;
    if index.is_unique {
        score += 0.5;
    }
    if !keys.is_empty() && keys.len() == index.fields.len() {
        score += 0.25;
    }
    (score, keys)
}
