// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The expression evaluator (`spec.md` §4.2).
//!
//! Two entry points, exactly as specified: [`evaluate`] coerces the result to
//! a `bool`, [`evaluate_value`] returns the raw [`Value`]. Both operate over
//! either a [`Row::Record`] or a [`Row::Document`]; the branch on the runtime
//! representation lives once, in [`Row::member`] and [`member_on_value`], not
//! duplicated across this module (`spec.md` §9 design note).

use std::cmp::Ordering;

use crate::contracts::{lookup_document_field, RecordFields, Row};
use crate::error::{ErrorKind, Result};
use crate::query::algebra::{BinaryOp, ConvertTarget, Expr, UnaryOp};
use crate::query::comparator;
use crate::query::functions;
use crate::value::Value;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

/// The binding available to `Parameter` and unqualified `Member` nodes while
/// evaluating a (sub-)expression.
///
/// A [`Frame::Row`] is the original row passed to `evaluate`/`evaluate_value`.
/// A [`Frame::Scalar`] is used while evaluating a per-element selector for a
/// sequence intrinsic (`Sum`, `Average`, `Min`, `Max`, ...): the single
/// `Parameter` node is re-bound to the current element, which keeps the
/// algebra flat (one `Parameter` variant) instead of needing nested lambda
/// scopes.
pub enum Frame<'a, R: RecordFields> {
    Row(Row<'a, R>),
    Scalar(Value),
}

impl<'a, R: RecordFields> Frame<'a, R> {
    fn parameter_value(&self) -> Value {
        match self {
            Frame::Row(Row::Document(doc)) => Value::Document((*doc).clone()),
            Frame::Row(Row::Record(_)) => Value::Null,
            Frame::Scalar(v) => v.clone(),
        }
    }

    fn member(&self, name: &str) -> Value {
        match self {
            Frame::Row(row) => row.member(name),
            Frame::Scalar(v) => member_on_value(v, name),
        }
    }
}

/// Member access on an already-evaluated [`Value`] (used for qualified
/// `Member` nodes, e.g. `row.Foo.Bar`, and for the DateTime member table in
/// `spec.md` §4.3).
pub fn member_on_value(target: &Value, name: &str) -> Value {
    match target {
        Value::Document(doc) => lookup_document_field(doc, name),
        Value::DateTime(dt) => datetime_member(dt, name),
        _ => Value::Null,
    }
}

fn datetime_member(dt: &DateTime<Utc>, name: &str) -> Value {
    match name {
        "Year" => Value::I32(dt.year()),
        "Month" => Value::I32(dt.month() as i32),
        "Day" => Value::I32(dt.day() as i32),
        "Hour" => Value::I32(dt.hour() as i32),
        "Minute" => Value::I32(dt.minute() as i32),
        "Second" => Value::I32(dt.second() as i32),
        "Date" => Value::DateTime(
            Utc.from_utc_datetime(&dt.date_naive().and_hms_opt(0, 0, 0).expect("midnight is valid")),
        ),
        "DayOfWeek" => Value::I32(dt.weekday().num_days_from_sunday() as i32),
        _ => Value::Null,
    }
}

/// Entry point 1: `Evaluate(expr, row) -> bool` (`spec.md` §4.2).
pub fn evaluate<R: RecordFields>(expr: &Expr, row: Row<'_, R>) -> Result<bool> {
    eval_bool(expr, &Frame::Row(row))
}

/// Entry point 2: `EvaluateValue(expr, row) -> value?` (`spec.md` §4.2).
pub fn evaluate_value<R: RecordFields>(expr: &Expr, row: Row<'_, R>) -> Result<Value> {
    eval_value(expr, &Frame::Row(row))
}

/// Evaluates `expr` with `Parameter`/unqualified `Member` bound to an
/// already-projected [`Value`] rather than a [`Row`] — used by the deferred
/// pipeline once a `Select` has turned rows into arbitrary values
/// (`spec.md` §4.7).
pub fn evaluate_over_value(expr: &Expr, value: &Value) -> Result<bool> {
    eval_bool::<crate::contracts::NoFields>(expr, &Frame::Scalar(value.clone()))
}

/// The [`Value`]-returning counterpart of [`evaluate_over_value`].
pub fn evaluate_value_over_value(expr: &Expr, value: &Value) -> Result<Value> {
    eval_value::<crate::contracts::NoFields>(expr, &Frame::Scalar(value.clone()))
}

pub(crate) fn eval_bool<R: RecordFields>(expr: &Expr, frame: &Frame<'_, R>) -> Result<bool> {
    match expr {
        // "boolean evaluation of a non-boolean constant is a hard error" (spec.md §4.2).
        Expr::Constant(Value::Bool(b)) => Ok(*b),
        Expr::Constant(_) => Err(ErrorKind::InvalidState
            .with_message("boolean evaluation of a non-boolean constant")),

        Expr::Unary {
            op: UnaryOp::Not,
            operand,
            ..
        } => Ok(!eval_logical_operand(operand, frame)?),

        // Short-circuiting, with each operand evaluated in logical-operand
        // position: a non-boolean *operand* coerces to `false` instead of
        // erroring, matching the truth table in `spec.md` §9
        // (`OrElse(1, true) == true`, `OrElse(1, false) == false`). The hard
        // error above is reserved for a bare top-level non-bool predicate.
        Expr::Binary {
            op: BinaryOp::AndAlso,
            left,
            right,
        } => Ok(eval_logical_operand(left, frame)? && eval_logical_operand(right, frame)?),
        Expr::Binary {
            op: BinaryOp::OrElse,
            left,
            right,
        } => Ok(eval_logical_operand(left, frame)? || eval_logical_operand(right, frame)?),

        _ => Ok(matches!(eval_value(expr, frame)?, Value::Bool(true))),
    }
}

/// Evaluates `expr` in logical-operand position, i.e. as an operand of
/// `AndAlso`/`OrElse`/`Not`. Unlike [`eval_bool`]'s top-level hard error, a
/// non-boolean value here — including a bare non-bool `Constant` — coerces to
/// `false` (`spec.md` §9: `OrElse(1, true) == true`).
fn eval_logical_operand<R: RecordFields>(expr: &Expr, frame: &Frame<'_, R>) -> Result<bool> {
    match expr {
        Expr::Constant(Value::Bool(b)) => Ok(*b),
        Expr::Constant(_) => Ok(false),

        Expr::Unary {
            op: UnaryOp::Not,
            operand,
            ..
        } => Ok(!eval_logical_operand(operand, frame)?),

        Expr::Binary {
            op: BinaryOp::AndAlso,
            left,
            right,
        } => Ok(eval_logical_operand(left, frame)? && eval_logical_operand(right, frame)?),
        Expr::Binary {
            op: BinaryOp::OrElse,
            left,
            right,
        } => Ok(eval_logical_operand(left, frame)? || eval_logical_operand(right, frame)?),

        _ => Ok(matches!(eval_value(expr, frame)?, Value::Bool(true))),
    }
}

pub(crate) fn eval_value<R: RecordFields>(expr: &Expr, frame: &Frame<'_, R>) -> Result<Value> {
    match expr {
        Expr::Constant(v) => Ok(v.clone()),
        Expr::Parameter => Ok(frame.parameter_value()),

        Expr::Member { name, target } => match target {
            None => Ok(frame.member(name)),
            Some(target) => {
                let target = eval_value(target, frame)?;
                if target.is_null() {
                    Ok(Value::Null)
                } else {
                    Ok(member_on_value(&target, name))
                }
            }
        },

        Expr::Binary { op, left, right } => eval_binary(*op, left, right, frame),

        Expr::Unary {
            op,
            operand,
            result_type,
        } => eval_unary(*op, operand, *result_type, frame),

        Expr::Function { name, target, args } => {
            functions::call(name, target.as_deref(), args, frame)
        }

        Expr::Constructor { args, .. } => {
            let values = args
                .iter()
                .map(|a| eval_value(a, frame))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(values))
        }

        Expr::MemberInit { bindings, .. } => {
            let mut doc = crate::value::Document::new();
            for (name, expr) in bindings {
                doc.insert(name.clone(), eval_value(expr, frame)?);
            }
            Ok(Value::Document(doc))
        }

        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            if eval_bool(test, frame)? {
                eval_value(if_true, frame)
            } else {
                eval_value(if_false, frame)
            }
        }
    }
}

fn eval_binary<R: RecordFields>(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    frame: &Frame<'_, R>,
) -> Result<Value> {
    if matches!(op, BinaryOp::AndAlso | BinaryOp::OrElse) {
        return Ok(Value::Bool(eval_bool(
            &Expr::Binary {
                op,
                left: Box::new(left.clone()),
                right: Box::new(right.clone()),
            },
            frame,
        )?));
    }

    let l = eval_value(left, frame)?;
    let r = eval_value(right, frame)?;

    if op.is_comparison() {
        return Ok(Value::Bool(compare_op(op, &l, &r)));
    }

    Ok(match op {
        BinaryOp::Add => add(&l, &r),
        BinaryOp::Sub => numeric_binary(&l, &r, |a, b| a - b),
        BinaryOp::Mul => numeric_binary(&l, &r, |a, b| a * b),
        BinaryOp::Div => numeric_binary(&l, &r, |a, b| a / b),
        _ => unreachable!("comparison ops handled above"),
    })
}

/// Null-aware comparison per `spec.md` §4.2: "Comparing any value with null
/// yields `false` except `Eq(null, null) = true` and `NotEq` mirrored."
fn compare_op(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return op == BinaryOp::Eq && left.is_null() && right.is_null();
    }
    let ordering = comparator::compare(left, right);
    match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::NotEq => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        _ => unreachable!("non-comparison op reached compare_op"),
    }
}

/// "Arithmetic `Add` on strings concatenates; nulls act as empty strings."
fn add(left: &Value, right: &Value) -> Value {
    if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
        let l = if left.is_null() { String::new() } else { left.stringify() };
        let r = if right.is_null() { String::new() } else { right.stringify() };
        Value::Str(l + &r)
    } else if left.is_null() || right.is_null() {
        Value::Null
    } else {
        numeric_binary(left, right, |a, b| a + b)
    }
}

fn numeric_binary(left: &Value, right: &Value, op: impl FnOnce(f64, f64) -> f64) -> Value {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => Value::F64(op(l, r)),
        _ => Value::Null,
    }
}

fn eval_unary<R: RecordFields>(
    op: UnaryOp,
    operand: &Expr,
    result_type: Option<ConvertTarget>,
    frame: &Frame<'_, R>,
) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!eval_bool(operand, frame)?)),

        UnaryOp::Negate => {
            let v = eval_value(operand, frame)?;
            Ok(match v.as_f64() {
                Some(n) => Value::F64(-n),
                None => Value::Null,
            })
        }

        UnaryOp::Convert => {
            let v = eval_value(operand, frame)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            Ok(convert(&v, result_type))
        }

        UnaryOp::ArrayLength => {
            let v = eval_value(operand, frame)?;
            match v.as_sequence() {
                Some(items) => Ok(Value::I32(items.len() as i32)),
                None => Ok(Value::Null),
            }
        }
    }
}

fn convert(value: &Value, target: Option<ConvertTarget>) -> Value {
    match target {
        Some(ConvertTarget::Str) => Value::Str(value.stringify()),
        Some(ConvertTarget::I32) => parse_numeric(value)
            .map(|n| Value::I32(n as i32))
            .unwrap_or(Value::Null),
        Some(ConvertTarget::I64) => parse_numeric(value)
            .map(|n| Value::I64(n as i64))
            .unwrap_or(Value::Null),
        Some(ConvertTarget::F64) => parse_numeric(value).map(Value::F64).unwrap_or(Value::Null),
        Some(ConvertTarget::Decimal) => parse_numeric(value)
            .and_then(|n| rust_decimal::Decimal::try_from(n).ok())
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        None => value.clone(),
    }
}

fn parse_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Str(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{NoFields, Row};
    use crate::value::Document;
    use proptest::prelude::*;

    fn doc_row(doc: &Document) -> Row<'_, NoFields> {
        Row::Document(doc)
    }

    #[test]
    fn member_tries_literal_then_camel_then_id_alias() {
        let mut doc = Document::new();
        doc.insert("_id".to_string(), Value::I32(7));
        let expr = Expr::member("Id");
        assert_eq!(evaluate_value(&expr, doc_row(&doc)).unwrap(), Value::I32(7));
    }

    #[test]
    fn eq_null_null_is_true_but_any_other_null_comparison_is_false() {
        let row = Document::new();
        let eq = Expr::compare(BinaryOp::Eq, Expr::constant(Value::Null), Expr::constant(Value::Null));
        assert!(evaluate(&eq, doc_row(&row)).unwrap());

        let lt = Expr::compare(BinaryOp::Lt, Expr::constant(Value::Null), Expr::constant(5i32));
        assert!(!evaluate(&lt, doc_row(&row)).unwrap());

        let not_eq = Expr::compare(BinaryOp::NotEq, Expr::constant(Value::Null), Expr::constant(Value::Null));
        assert!(!evaluate(&not_eq, doc_row(&row)).unwrap());
    }

    #[test]
    fn boolean_evaluation_of_non_boolean_constant_is_a_hard_error() {
        let row = Document::new();
        let expr = Expr::constant(5i32);
        let err = evaluate(&expr, doc_row(&row)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn and_also_or_else_truth_table_matches_open_question_examples() {
        let row = Document::new();
        // OrElse(1, true) == true; OrElse(1, false) == false.
        let one = Expr::constant(1i32);
        let or_true = one.clone().or(Expr::constant(true));
        assert!(evaluate(&or_true, doc_row(&row)).unwrap());
        let or_false = one.clone().or(Expr::constant(false));
        assert!(!evaluate(&or_false, doc_row(&row)).unwrap());

        // AndAlso(1, true) == false; AndAlso(1, false) == false.
        let and_true = one.clone().and(Expr::constant(true));
        assert!(!evaluate(&and_true, doc_row(&row)).unwrap());
        let and_false = one.and(Expr::constant(false));
        assert!(!evaluate(&and_false, doc_row(&row)).unwrap());
    }

    proptest! {
        /// `spec.md` §9 Open Question: freeze the (bool|non-bool) x (true|false|non-bool)
        /// truth table for AndAlso/OrElse. A "non-bool" operand always behaves as `false`.
        #[test]
        fn and_also_or_else_non_bool_operand_always_behaves_as_false(n in -1000i32..1000) {
            let row = Document::new();
            let non_bool = Expr::constant(n);

            let and_with_true = non_bool.clone().and(Expr::constant(true));
            prop_assert!(!evaluate(&and_with_true, doc_row(&row)).unwrap());

            let or_with_true = non_bool.clone().or(Expr::constant(true));
            prop_assert!(evaluate(&or_with_true, doc_row(&row)).unwrap());

            let or_with_false = non_bool.or(Expr::constant(false));
            prop_assert!(!evaluate(&or_with_false, doc_row(&row)).unwrap());
        }
    }

    #[test]
    fn add_concatenates_strings_and_treats_null_as_empty() {
        let row = Document::new();
        let expr = Expr::compare(BinaryOp::Add, Expr::constant("foo"), Expr::constant(Value::Null));
        assert_eq!(
            evaluate_value(&expr, doc_row(&row)).unwrap(),
            Value::Str("foo".to_string())
        );
    }

    #[test]
    fn convert_string_to_numeric_and_numeric_to_string() {
        let row = Document::new();
        let to_i32 = Expr::Unary {
            op: UnaryOp::Convert,
            operand: Box::new(Expr::constant("42")),
            result_type: Some(ConvertTarget::I32),
        };
        assert_eq!(evaluate_value(&to_i32, doc_row(&row)).unwrap(), Value::I32(42));

        let to_str = Expr::Unary {
            op: UnaryOp::Convert,
            operand: Box::new(Expr::constant(42i32)),
            result_type: Some(ConvertTarget::Str),
        };
        assert_eq!(
            evaluate_value(&to_str, doc_row(&row)).unwrap(),
            Value::Str("42".to_string())
        );
    }

    #[test]
    fn convert_of_null_is_preserved_and_falsy() {
        let row = Document::new();
        let expr = Expr::Unary {
            op: UnaryOp::Convert,
            operand: Box::new(Expr::constant(Value::Null)),
            result_type: Some(ConvertTarget::I32),
        };
        assert_eq!(evaluate_value(&expr, doc_row(&row)).unwrap(), Value::Null);
        assert!(!evaluate(&expr, doc_row(&row)).unwrap());
    }
}
