// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The deferred query pipeline (`spec.md` §4.7): a closed, tagged operator
//! set interpreted directly against an in-memory row sequence, not a
//! reflective `IQueryable` adapter (`spec.md` §9 design note).

use std::cmp::Ordering;

use crate::error::{ErrorKind, Result};
use crate::query::algebra::Expr;
use crate::query::comparator;
use crate::query::eval;
use crate::query::grouping::AotGrouping;
use crate::value::Value;

/// One stage of a deferred pipeline. `spec.md` §4.7 lists exactly this
/// operator set; nothing is added or generated at runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOp {
    Where(Expr),
    Select(Expr),
    OrderBy(Expr),
    OrderByDescending(Expr),
    ThenBy(Expr),
    ThenByDescending(Expr),
    Distinct,
    Skip(Expr),
    Take(Expr),
    GroupBy(Expr),
}

/// An ordered list of [`PipelineOp`]s, applied left to right against a row
/// sequence on enumeration (`spec.md` §4.7, §4.8 "Queryable is immutable and
/// lazy: building the chain performs no work").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pipeline {
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, op: PipelineOp) -> Self {
        let mut ops = self.ops.clone();
        ops.push(op);
        Self { ops }
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }

    /// `spec.md` §4.7: "when the chain consists of exactly one `Where` at the
    /// root and no later `Where`, its predicate is handed to the executor
    /// instead of being re-applied in memory." Returns the pushed-down
    /// predicate and the remaining ops to run in-memory.
    pub fn split_pushdown(&self) -> (Option<Expr>, &[PipelineOp]) {
        match self.ops.split_first() {
            Some((PipelineOp::Where(expr), rest)) if !rest.iter().any(is_where) => (Some(expr.clone()), rest),
            _ => (None, &self.ops),
        }
    }
}

fn is_where(op: &PipelineOp) -> bool {
    matches!(op, PipelineOp::Where(_))
}

/// The result of running a pipeline's in-memory stages: either a flat row
/// sequence or, once a `GroupBy` has run, a sequence of groups. `spec.md`
/// §4.7 does not define an operator after `GroupBy` other than the listed
/// terminals, so a further `Where`/`Select`/... on a grouped stream is
/// rejected rather than guessed at.
pub enum Stage {
    Rows(Vec<Value>),
    Grouped(Vec<AotGrouping>),
}

pub fn run(ops: &[PipelineOp], rows: Vec<Value>) -> Result<Stage> {
    let mut rows = rows;
    // Accumulated multi-key sort state: a `ThenBy` refines the nearest
    // preceding `OrderBy`/`ThenBy` run rather than sorting independently, so
    // ties on earlier keys stay broken by later ones (`spec.md` §4.7). Any
    // non-sort operator clears it: `ThenBy` only makes sense directly after
    // a sort.
    let mut sort_keys: Vec<(Expr, bool)> = Vec::new();

    for (index, op) in ops.iter().enumerate() {
        match op {
            PipelineOp::OrderBy(expr) => {
                sort_keys = vec![(expr.clone(), false)];
                rows = sort_by(rows, &sort_keys)?;
            }
            PipelineOp::OrderByDescending(expr) => {
                sort_keys = vec![(expr.clone(), true)];
                rows = sort_by(rows, &sort_keys)?;
            }
            // `spec.md` §4.7: a `ThenBy` with no preceding sort degrades to a
            // plain `OrderBy`.
            PipelineOp::ThenBy(expr) => {
                sort_keys.push((expr.clone(), false));
                rows = sort_by(rows, &sort_keys)?;
            }
            PipelineOp::ThenByDescending(expr) => {
                sort_keys.push((expr.clone(), true));
                rows = sort_by(rows, &sort_keys)?;
            }
            PipelineOp::Where(expr) => {
                sort_keys.clear();
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    if eval::evaluate_over_value(expr, &row)? {
                        out.push(row);
                    }
                }
                rows = out;
            }
            PipelineOp::Select(expr) => {
                sort_keys.clear();
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    out.push(eval::evaluate_value_over_value(expr, &row)?);
                }
                rows = out;
            }
            PipelineOp::Distinct => {
                sort_keys.clear();
                let mut out: Vec<Value> = Vec::with_capacity(rows.len());
                for row in rows {
                    if !out.iter().any(|seen| comparator::equals(seen, &row)) {
                        out.push(row);
                    }
                }
                rows = out;
            }
            PipelineOp::Skip(expr) => {
                sort_keys.clear();
                let n = literal_count(expr)?;
                rows = rows.into_iter().skip(n).collect();
            }
            PipelineOp::Take(expr) => {
                sort_keys.clear();
                let n = literal_count(expr)?;
                rows = rows.into_iter().take(n).collect();
            }
            PipelineOp::GroupBy(expr) => {
                let groups = group_by(rows, expr)?;
                return finish_grouped(groups, &ops[index + 1..]);
            }
        }
    }
    Ok(Stage::Rows(rows))
}

fn finish_grouped(groups: Vec<AotGrouping>, remaining: &[PipelineOp]) -> Result<Stage> {
    if remaining.is_empty() {
        Ok(Stage::Grouped(groups))
    } else {
        Err(ErrorKind::NotSupported.with_message("no operator may follow GroupBy except a terminal operation"))
    }
}

fn sort_by(mut rows: Vec<Value>, keys: &[(Expr, bool)]) -> Result<Vec<Value>> {
    let mut projected = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut key_values = Vec::with_capacity(keys.len());
        for (expr, _) in keys {
            key_values.push(eval::evaluate_value_over_value(expr, row)?);
        }
        projected.push(key_values);
    }
    let mut indices: Vec<usize> = (0..rows.len()).collect();
    indices.sort_by(|&a, &b| {
        for (i, (_, descending)) in keys.iter().enumerate() {
            let ordering = comparator::compare(&projected[a][i], &projected[b][i]);
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    let mut out = Vec::with_capacity(rows.len());
    for i in indices {
        out.push(std::mem::replace(&mut rows[i], Value::Null));
    }
    Ok(out)
}

/// `spec.md` §4.7: `Skip`/`Take` accept only a literal argument; a negative
/// count behaves as zero.
fn literal_count(expr: &Expr) -> Result<usize> {
    let Expr::Constant(value) = expr else {
        return Err(ErrorKind::InvalidArgument.with_message("Skip/Take require a literal count"));
    };
    let n = value
        .as_f64()
        .ok_or_else(|| ErrorKind::InvalidArgument.with_message("Skip/Take require a numeric literal"))?;
    Ok(n.max(0.0) as usize)
}

/// `spec.md` §4.7: a `null` group key groups under an empty string; groups
/// are emitted in first-encounter order.
fn group_by(rows: Vec<Value>, key_expr: &Expr) -> Result<Vec<AotGrouping>> {
    let mut groups: Vec<AotGrouping> = Vec::new();
    for row in rows {
        let key = eval::evaluate_value_over_value(key_expr, &row)?;
        let key = if key.is_null() { Value::from("") } else { key };
        match groups.iter_mut().find(|g| comparator::equals(&g.key, &key)) {
            Some(group) => group.rows.push(row),
            None => groups.push(AotGrouping::new(key, vec![row])),
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::algebra::BinaryOp;
    use crate::value::Document;

    fn person(name: &str, age: i32) -> Value {
        let mut d = Document::new();
        d.insert("name".to_string(), Value::from(name));
        d.insert("age".to_string(), Value::I32(age));
        Value::Document(d)
    }

    #[test]
    fn where_then_select_filters_then_projects() {
        let rows = vec![person("a", 20), person("b", 30)];
        let predicate = Expr::compare(BinaryOp::Gt, Expr::member("age"), Expr::constant(25i32));
        let projection = Expr::member("name");
        let ops = vec![PipelineOp::Where(predicate), PipelineOp::Select(projection)];
        let Stage::Rows(out) = run(&ops, rows).unwrap() else { panic!("expected rows") };
        assert_eq!(out, vec![Value::from("b")]);
    }

    #[test]
    fn order_by_descending_sorts_rows() {
        let rows = vec![person("a", 20), person("b", 30), person("c", 10)];
        let ops = vec![PipelineOp::OrderByDescending(Expr::member("age"))];
        let Stage::Rows(out) = run(&ops, rows).unwrap() else { panic!("expected rows") };
        let ages: Vec<_> = out
            .iter()
            .map(|v| eval::evaluate_value_over_value(&Expr::member("age"), v).unwrap())
            .collect();
        assert_eq!(ages, vec![Value::I32(30), Value::I32(20), Value::I32(10)]);
    }

    #[test]
    fn skip_and_take_with_negative_literal_behaves_as_zero() {
        let rows = vec![person("a", 1), person("b", 2), person("c", 3)];
        let ops = vec![PipelineOp::Skip(Expr::constant(-5i32)), PipelineOp::Take(Expr::constant(2i32))];
        let Stage::Rows(out) = run(&ops, rows).unwrap() else { panic!("expected rows") };
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn distinct_uses_value_domain_equality() {
        let rows = vec![Value::I32(1), Value::F64(1.0), Value::I32(2)];
        let ops = vec![PipelineOp::Distinct];
        let Stage::Rows(out) = run(&ops, rows).unwrap() else { panic!("expected rows") };
        assert_eq!(out, vec![Value::I32(1), Value::I32(2)]);
    }

    #[test]
    fn group_by_buckets_null_key_under_empty_string_in_first_encounter_order() {
        let rows = vec![person("a", 1), person("b", 2)];
        let ops = vec![PipelineOp::GroupBy(Expr::member("missing"))];
        let Stage::Grouped(groups) = run(&ops, rows).unwrap() else { panic!("expected groups") };
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, Value::from(""));
        assert_eq!(groups[0].count(), 2);
    }

    #[test]
    fn operator_after_group_by_is_not_supported() {
        let rows = vec![person("a", 1)];
        let ops = vec![PipelineOp::GroupBy(Expr::member("name")), PipelineOp::Distinct];
        let err = run(&ops, rows).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn single_root_where_is_pushed_down_to_the_executor() {
        let predicate = Expr::compare(BinaryOp::Eq, Expr::member("name"), Expr::constant("a"));
        let pipeline = Pipeline::new().push(PipelineOp::Where(predicate.clone())).push(PipelineOp::Select(Expr::member("age")));
        let (pushed, rest) = pipeline.split_pushdown();
        assert_eq!(pushed, Some(predicate));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn a_second_where_prevents_pushdown() {
        let predicate = Expr::compare(BinaryOp::Eq, Expr::member("name"), Expr::constant("a"));
        let pipeline = Pipeline::new()
            .push(PipelineOp::Where(predicate.clone()))
            .push(PipelineOp::Where(predicate));
        let (pushed, rest) = pipeline.split_pushdown();
        assert_eq!(pushed, None);
        assert_eq!(rest.len(), 2);
    }
}
