// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The fixed intrinsic function catalog (`spec.md` §4.3): string, math,
//! sequence and date-time helpers callable from a `Function` node.
//!
//! Sequence aggregates (`Sum`, `Average`, `Min`, `Max`) accept an optional
//! per-element selector expression. The selector is evaluated once per
//! element with the element re-bound to [`Frame::Scalar`] — the algebra has a
//! single flat `Parameter` node (`spec.md` §3), so the element shadows the
//! outer row for the duration of that one evaluation.

use chrono::{Duration, Months};
use rust_decimal::Decimal;

use crate::contracts::RecordFields;
use crate::error::{ErrorKind, Result};
use crate::query::algebra::Expr;
use crate::query::comparator;
use crate::query::eval::{eval_value, Frame};
use crate::value::Value;

pub fn call<R: RecordFields>(
    name: &str,
    target: Option<&Expr>,
    args: &[Expr],
    frame: &Frame<'_, R>,
) -> Result<Value> {
    match name {
        "Contains" => contains(target, args, frame),
        "StartsWith" => string_predicate(name, target, args, frame, |s, p| s.starts_with(p)),
        "EndsWith" => string_predicate(name, target, args, frame, |s, p| s.ends_with(p)),
        "ToLower" => string_unary(target, frame, str::to_lowercase),
        "ToUpper" => string_unary(target, frame, str::to_uppercase),
        "Trim" => string_unary(target, frame, |s| s.trim().to_string()),
        "Substring" => substring(target, args, frame),
        "Replace" => replace(target, args, frame),
        "ToString" => to_string(target, frame),

        "Abs" => abs(args, frame),
        "Ceiling" => math_unary(args, frame, f64::ceil),
        "Floor" => math_unary(args, frame, f64::floor),
        "Sqrt" => sqrt(args, frame),
        "Round" => math_unary(args, frame, |n| n.round()),
        "Pow" => pow(args, frame),

        "Min" if target.is_some() => aggregate(target, args, frame, Aggregate::Min),
        "Max" if target.is_some() => aggregate(target, args, frame, Aggregate::Max),
        "Min" => math_min_max(args, frame, f64::min),
        "Max" => math_min_max(args, frame, f64::max),

        "Count" => count(target, args, frame),
        "Sum" => aggregate(target, args, frame, Aggregate::Sum),
        "Average" => aggregate(target, args, frame, Aggregate::Average),

        "AddDays" => datetime_add(target, args, frame, |dt, n| dt + Duration::days(n as i64)),
        "AddHours" => datetime_add(target, args, frame, |dt, n| dt + Duration::hours(n as i64)),
        "AddMinutes" => datetime_add(target, args, frame, |dt, n| dt + Duration::minutes(n as i64)),
        "AddSeconds" => datetime_add(target, args, frame, |dt, n| dt + Duration::seconds(n as i64)),
        "AddMonths" => datetime_add(target, args, frame, |dt, n| {
            if n >= 0.0 {
                dt.checked_add_months(Months::new(n as u32)).unwrap_or(dt)
            } else {
                dt.checked_sub_months(Months::new((-n) as u32)).unwrap_or(dt)
            }
        }),
        "AddYears" => datetime_add(target, args, frame, |dt, n| {
            let months = (n as i64) * 12;
            if months >= 0 {
                dt.checked_add_months(Months::new(months as u32)).unwrap_or(dt)
            } else {
                dt.checked_sub_months(Months::new((-months) as u32)).unwrap_or(dt)
            }
        }),

        _ => Err(ErrorKind::NotSupported.with_message(format!("unknown intrinsic function '{name}'"))),
    }
}

fn eval_target<R: RecordFields>(target: Option<&Expr>, frame: &Frame<'_, R>) -> Result<Value> {
    match target {
        Some(expr) => eval_value(expr, frame),
        None => Ok(Value::Null),
    }
}

fn contains<R: RecordFields>(target: Option<&Expr>, args: &[Expr], frame: &Frame<'_, R>) -> Result<Value> {
    let receiver = eval_target(target, frame)?;
    let Some(arg) = args.first() else {
        return Err(ErrorKind::InvalidArgument.with_message("Contains requires one argument"));
    };
    let needle = eval_value(arg, frame)?;
    match receiver.as_sequence() {
        Some(items) => Ok(Value::Bool(items.iter().any(|item| comparator::equals(item, &needle)))),
        None => match (receiver.as_str(), needle.as_str()) {
            (Some(s), Some(n)) => Ok(Value::Bool(s.contains(n))),
            _ => Ok(Value::Null),
        },
    }
}

fn string_predicate<R: RecordFields>(
    _name: &str,
    target: Option<&Expr>,
    args: &[Expr],
    frame: &Frame<'_, R>,
    f: impl FnOnce(&str, &str) -> bool,
) -> Result<Value> {
    let receiver = eval_target(target, frame)?;
    let Some(arg) = args.first() else {
        return Err(ErrorKind::InvalidArgument.with_message("expected one string argument"));
    };
    let needle = eval_value(arg, frame)?;
    match (receiver.as_str(), needle.as_str()) {
        (Some(s), Some(n)) => Ok(Value::Bool(f(s, n))),
        _ => Ok(Value::Null),
    }
}

fn string_unary<R: RecordFields>(
    target: Option<&Expr>,
    frame: &Frame<'_, R>,
    f: impl FnOnce(&str) -> String,
) -> Result<Value> {
    match eval_target(target, frame)?.as_str() {
        Some(s) => Ok(Value::Str(f(s))),
        None => Ok(Value::Null),
    }
}

fn substring<R: RecordFields>(target: Option<&Expr>, args: &[Expr], frame: &Frame<'_, R>) -> Result<Value> {
    let Some(s) = eval_target(target, frame)?.as_str().map(str::to_string) else {
        return Ok(Value::Null);
    };
    let chars: Vec<char> = s.chars().collect();
    let start = match args.first() {
        Some(e) => eval_value(e, frame)?.as_f64().unwrap_or(0.0).max(0.0) as usize,
        None => return Err(ErrorKind::InvalidArgument.with_message("Substring requires a start index")),
    };
    let start = start.min(chars.len());
    let len = match args.get(1) {
        Some(e) => (eval_value(e, frame)?.as_f64().unwrap_or(0.0).max(0.0) as usize).min(chars.len() - start),
        None => chars.len() - start,
    };
    Ok(Value::Str(chars[start..start + len].iter().collect()))
}

fn replace<R: RecordFields>(target: Option<&Expr>, args: &[Expr], frame: &Frame<'_, R>) -> Result<Value> {
    let Some(s) = eval_target(target, frame)?.as_str().map(str::to_string) else {
        return Ok(Value::Null);
    };
    let (Some(from), Some(to)) = (args.first(), args.get(1)) else {
        return Err(ErrorKind::InvalidArgument.with_message("Replace requires two arguments"));
    };
    let from = eval_value(from, frame)?;
    let to = eval_value(to, frame)?;
    // A non-string `to` leaves the receiver unchanged (`spec.md` §4.3).
    match (from.as_str(), to.as_str()) {
        (Some(from), Some(to)) => Ok(Value::Str(s.replace(from, to))),
        (Some(_), None) => Ok(Value::Str(s)),
        (None, _) => Ok(Value::Null),
    }
}

fn to_string<R: RecordFields>(target: Option<&Expr>, frame: &Frame<'_, R>) -> Result<Value> {
    let v = eval_target(target, frame)?;
    if v.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Str(v.stringify()))
}

fn math_unary<R: RecordFields>(args: &[Expr], frame: &Frame<'_, R>, f: impl FnOnce(f64) -> f64) -> Result<Value> {
    let Some(arg) = args.first() else {
        return Err(ErrorKind::InvalidArgument.with_message("expected one numeric argument"));
    };
    match eval_value(arg, frame)?.as_f64() {
        Some(n) => Ok(Value::F64(f(n))),
        None => Ok(Value::Null),
    }
}

/// `Abs` preserves a decimal receiver's kind rather than widening it to
/// `f64` (`spec.md` §4.3: "decimal-variant returns decimal-variant").
fn abs<R: RecordFields>(args: &[Expr], frame: &Frame<'_, R>) -> Result<Value> {
    let Some(arg) = args.first() else {
        return Err(ErrorKind::InvalidArgument.with_message("Abs requires one argument"));
    };
    match eval_value(arg, frame)? {
        Value::Decimal(d) => Ok(Value::Decimal(d.abs())),
        other => match other.as_f64() {
            Some(n) => Ok(Value::F64(n.abs())),
            None => Ok(Value::Null),
        },
    }
}

/// `Sqrt()` with no arguments yields `0.0` (`spec.md` §4.3).
fn sqrt<R: RecordFields>(args: &[Expr], frame: &Frame<'_, R>) -> Result<Value> {
    if args.first().is_none() {
        return Ok(Value::F64(0.0));
    }
    math_unary(args, frame, f64::sqrt)
}

/// `Pow` with fewer than two arguments yields `0.0` (`spec.md` §4.3).
fn pow<R: RecordFields>(args: &[Expr], frame: &Frame<'_, R>) -> Result<Value> {
    let (Some(a), Some(b)) = (args.first(), args.get(1)) else {
        return Ok(Value::F64(0.0));
    };
    match (eval_value(a, frame)?.as_f64(), eval_value(b, frame)?.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::F64(a.powf(b))),
        _ => Ok(Value::Null),
    }
}

/// `Math.Min`/`Math.Max` require at least one argument; with exactly one,
/// that argument is the result (`spec.md` §4.3).
fn math_min_max<R: RecordFields>(
    args: &[Expr],
    frame: &Frame<'_, R>,
    f: impl FnOnce(f64, f64) -> f64,
) -> Result<Value> {
    let Some(a) = args.first() else {
        return Err(ErrorKind::InvalidArgument.with_message("expected at least one numeric argument"));
    };
    let a = eval_value(a, frame)?.as_f64();
    match args.get(1) {
        None => Ok(a.map(Value::F64).unwrap_or(Value::Null)),
        Some(b) => match (a, eval_value(b, frame)?.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::F64(f(a, b))),
            _ => Ok(Value::Null),
        },
    }
}

fn count<R: RecordFields>(target: Option<&Expr>, args: &[Expr], frame: &Frame<'_, R>) -> Result<Value> {
    let receiver = eval_target(target, frame)?;
    let Some(items) = receiver.as_sequence() else {
        return Ok(Value::Null);
    };
    match args.first() {
        None => Ok(Value::I32(items.len() as i32)),
        Some(predicate) => {
            let mut n = 0i32;
            for item in items {
                if matches!(
                    eval_value(predicate, &Frame::Scalar(item.clone()))?,
                    Value::Bool(true)
                ) {
                    n += 1;
                }
            }
            Ok(Value::I32(n))
        }
    }
}

enum Aggregate {
    Sum,
    Average,
    Min,
    Max,
}

fn aggregate<R: RecordFields>(
    target: Option<&Expr>,
    args: &[Expr],
    frame: &Frame<'_, R>,
    kind: Aggregate,
) -> Result<Value> {
    let receiver = eval_target(target, frame)?;
    let Some(items) = receiver.as_sequence() else {
        return Ok(Value::Null);
    };
    let selector = args.first();
    let mut projected = Vec::with_capacity(items.len());
    for item in items {
        let value = match selector {
            Some(expr) => eval_value(expr, &Frame::Scalar(item.clone()))?,
            None => item.clone(),
        };
        if !value.is_null() {
            projected.push(value);
        }
    }

    match kind {
        Aggregate::Sum => Ok(Value::Decimal(
            projected
                .iter()
                .filter_map(|v| decimal_of(v))
                .fold(Decimal::ZERO, |acc, v| acc + v),
        )),
        Aggregate::Average => {
            if projected.is_empty() {
                return Ok(Value::Decimal(Decimal::ZERO));
            }
            let sum = projected
                .iter()
                .filter_map(|v| decimal_of(v))
                .fold(Decimal::ZERO, |acc, v| acc + v);
            Ok(Value::Decimal(sum / Decimal::from(projected.len() as i64)))
        }
        Aggregate::Min => Ok(projected
            .into_iter()
            .min_by(comparator::compare)
            .unwrap_or(Value::Null)),
        Aggregate::Max => Ok(projected
            .into_iter()
            .max_by(comparator::compare)
            .unwrap_or(Value::Null)),
    }
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Decimal(d) => Some(*d),
        other => other.as_f64().and_then(|n| Decimal::try_from(n).ok()),
    }
}

fn datetime_add<R: RecordFields>(
    target: Option<&Expr>,
    args: &[Expr],
    frame: &Frame<'_, R>,
    f: impl FnOnce(chrono::DateTime<chrono::Utc>, f64) -> chrono::DateTime<chrono::Utc>,
) -> Result<Value> {
    let receiver = eval_target(target, frame)?;
    let Value::DateTime(dt) = receiver else {
        return Ok(Value::Null);
    };
    let Some(arg) = args.first() else {
        return Err(ErrorKind::InvalidArgument.with_message("expected one numeric argument"));
    };
    match eval_value(arg, frame)?.as_f64() {
        Some(n) => Ok(Value::DateTime(f(dt, n))),
        None => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{NoFields, Row};
    use crate::query::algebra::Expr;
    use crate::query::eval::evaluate_value;
    use crate::value::Document;

    fn row() -> Document {
        Document::new()
    }

    fn eval(expr: &Expr) -> Value {
        let doc = row();
        evaluate_value::<NoFields>(expr, Row::Document(&doc)).unwrap()
    }

    #[test]
    fn string_contains_and_case_functions() {
        let contains = Expr::Function {
            name: "Contains".to_string(),
            target: Some(Box::new(Expr::constant("hello world"))),
            args: vec![Expr::constant("world")],
        };
        assert_eq!(eval(&contains), Value::Bool(true));

        let upper = Expr::Function {
            name: "ToUpper".to_string(),
            target: Some(Box::new(Expr::constant("abc"))),
            args: vec![],
        };
        assert_eq!(eval(&upper), Value::Str("ABC".to_string()));
    }

    #[test]
    fn sequence_contains_uses_value_domain_equality() {
        let expr = Expr::Function {
            name: "Contains".to_string(),
            target: Some(Box::new(Expr::Constructor {
                type_tag: "Array".to_string(),
                args: vec![Expr::constant(1i32), Expr::constant(2i32)],
            })),
            args: vec![Expr::constant(2.0f64)],
        };
        assert_eq!(eval(&expr), Value::Bool(true));
    }

    #[test]
    fn sum_and_average_are_decimal_and_skip_nulls() {
        let array = Expr::Constructor {
            type_tag: "Array".to_string(),
            args: vec![
                Expr::constant(1i32),
                Expr::constant(Value::Null),
                Expr::constant(3i32),
            ],
        };
        let sum = Expr::Function {
            name: "Sum".to_string(),
            target: Some(Box::new(array.clone())),
            args: vec![],
        };
        assert_eq!(eval(&sum), Value::Decimal(Decimal::from(4)));

        let avg = Expr::Function {
            name: "Average".to_string(),
            target: Some(Box::new(array)),
            args: vec![],
        };
        assert_eq!(eval(&avg), Value::Decimal(Decimal::from(2)));
    }

    #[test]
    fn math_round_trip() {
        let expr = Expr::Function {
            name: "Abs".to_string(),
            target: None,
            args: vec![Expr::constant(-4.5f64)],
        };
        assert_eq!(eval(&expr), Value::F64(4.5));

        let pow = Expr::Function {
            name: "Pow".to_string(),
            target: None,
            args: vec![Expr::constant(2.0f64), Expr::constant(3.0f64)],
        };
        assert_eq!(eval(&pow), Value::F64(8.0));
    }

    #[test]
    fn abs_preserves_decimal_kind() {
        let expr = Expr::Function {
            name: "Abs".to_string(),
            target: None,
            args: vec![Expr::constant(Value::Decimal(-Decimal::from(5)))],
        };
        assert_eq!(eval(&expr), Value::Decimal(Decimal::from(5)));
    }

    #[test]
    fn sqrt_with_no_args_is_zero_and_pow_with_one_arg_is_zero() {
        let sqrt = Expr::Function { name: "Sqrt".to_string(), target: None, args: vec![] };
        assert_eq!(eval(&sqrt), Value::F64(0.0));

        let pow = Expr::Function {
            name: "Pow".to_string(),
            target: None,
            args: vec![Expr::constant(2.0f64)],
        };
        assert_eq!(eval(&pow), Value::F64(0.0));
    }

    #[test]
    fn math_min_max_accept_a_single_argument() {
        let min = Expr::Function {
            name: "Min".to_string(),
            target: None,
            args: vec![Expr::constant(7.0f64)],
        };
        assert_eq!(eval(&min), Value::F64(7.0));

        let max = Expr::Function {
            name: "Max".to_string(),
            target: None,
            args: vec![Expr::constant(1.0f64), Expr::constant(9.0f64)],
        };
        assert_eq!(eval(&max), Value::F64(9.0));
    }

    #[test]
    fn replace_with_non_string_replacement_leaves_receiver_unchanged() {
        let expr = Expr::Function {
            name: "Replace".to_string(),
            target: Some(Box::new(Expr::constant("hello"))),
            args: vec![Expr::constant("l"), Expr::constant(5i32)],
        };
        assert_eq!(eval(&expr), Value::Str("hello".to_string()));
    }

    #[test]
    fn empty_average_is_zero_decimal() {
        let array = Expr::Constructor { type_tag: "Array".to_string(), args: vec![] };
        let avg = Expr::Function {
            name: "Average".to_string(),
            target: Some(Box::new(array)),
            args: vec![],
        };
        assert_eq!(eval(&avg), Value::Decimal(Decimal::ZERO));
    }
}
