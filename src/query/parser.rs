// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The expression parser (`spec.md` §4.1).
//!
//! The host language hands this layer predicate and projection trees already
//! shaped as [`Expr`] (the host's own reflection-to-tree step is out of this
//! crate's scope, `spec.md` §1); this module's job is the normalization and
//! folding pass: rewrite a handful of host-specific call shapes into their
//! canonical algebra form, then fold every parameter-free subtree into a
//! `Constant` (`spec.md` §3 invariant 1, §4.1 "Rules").
//!
//! Two entry points, because a parameter-dependent `Conditional` is only
//! rejected in predicate position: the optimizer needs predicates to be a
//! flat `AndAlso`/comparison tree to extract index keys from, and a runtime
//! branch defeats that (`spec.md` §4.4). In projection position a
//! parameter-dependent `Conditional` is exactly what a `Select` needs, so it
//! is allowed there.

use std::collections::BTreeMap;

use crate::contracts::Row;
use crate::error::{ErrorKind, Result};
use crate::query::algebra::{BinaryOp, ConvertTarget, Expr, UnaryOp};
use crate::query::eval;
use crate::value::Value;

/// Function names the evaluator's intrinsic catalog understands
/// (`spec.md` §4.3), plus the conversion/equality call shapes this parser
/// rewrites away. A `Function` node naming anything else is a `NotSupported`
/// construct the query layer will never be asked to evaluate.
const KNOWN_FUNCTIONS: &[&str] = &[
    "Contains", "StartsWith", "EndsWith", "ToLower", "ToUpper", "Trim", "Substring", "Replace",
    "ToString", "Abs", "Ceiling", "Floor", "Sqrt", "Round", "Pow", "Min", "Max", "Count", "Sum",
    "Average", "AddDays", "AddHours", "AddMinutes", "AddSeconds", "AddMonths", "AddYears",
    "Equals", "ToInt32", "ToInt64", "ToDouble", "ToDecimal",
];

/// Parses a filter predicate. `None` in, `None` out (`spec.md` §4.4 step 1:
/// a null predicate selects the full collection).
pub fn parse_predicate(expr: Option<&Expr>) -> Result<Option<Expr>> {
    let Some(expr) = expr else { return Ok(None) };
    let normalized = normalize(expr)?;
    reject_parameter_dependent_conditional(&normalized)?;
    Ok(Some(normalized))
}

/// Parses a projection (`Select`, `OrderBy` key selector, ...). Unlike
/// [`parse_predicate`], a parameter-dependent `Conditional` is legal here.
pub fn parse_projection(expr: &Expr) -> Result<Expr> {
    normalize(expr)
}

fn reject_parameter_dependent_conditional(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Conditional { test, if_true, if_false } => {
            if !test.is_parameter_free() {
                return Err(ErrorKind::NotSupported
                    .with_message("a predicate cannot branch on a value computed from the row"));
            }
            reject_parameter_dependent_conditional(test)?;
            reject_parameter_dependent_conditional(if_true)?;
            reject_parameter_dependent_conditional(if_false)
        }
        Expr::Binary { left, right, .. } => {
            reject_parameter_dependent_conditional(left)?;
            reject_parameter_dependent_conditional(right)
        }
        Expr::Unary { operand, .. } => reject_parameter_dependent_conditional(operand),
        Expr::Member { target: Some(t), .. } => reject_parameter_dependent_conditional(t),
        Expr::Function { target, args, .. } => {
            if let Some(t) = target {
                reject_parameter_dependent_conditional(t)?;
            }
            args.iter().try_for_each(reject_parameter_dependent_conditional)
        }
        Expr::Constructor { args, .. } => args.iter().try_for_each(reject_parameter_dependent_conditional),
        Expr::MemberInit { bindings, .. } => bindings
            .iter()
            .try_for_each(|(_, e)| reject_parameter_dependent_conditional(e)),
        _ => Ok(()),
    }
}

fn normalize(expr: &Expr) -> Result<Expr> {
    let rewritten = match expr {
        Expr::Constant(v) => Expr::Constant(v.clone()),
        Expr::Parameter => Expr::Parameter,

        Expr::Member { name, target } => Expr::Member {
            name: name.clone(),
            target: match target {
                Some(t) => Some(Box::new(normalize(t)?)),
                None => None,
            },
        },

        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: Box::new(normalize(left)?),
            right: Box::new(normalize(right)?),
        },

        // `Negate(x)` becomes `Binary(Sub, Constant(0), x)` (`spec.md` §4.1).
        Expr::Unary {
            op: UnaryOp::Negate,
            operand,
            ..
        } => Expr::Binary {
            op: BinaryOp::Sub,
            left: Box::new(Expr::Constant(Value::I32(0))),
            right: Box::new(normalize(operand)?),
        },

        Expr::Unary { op, operand, result_type } => Expr::Unary {
            op: *op,
            operand: Box::new(normalize(operand)?),
            result_type: *result_type,
        },

        Expr::Function { name, target, args } => normalize_function(name, target.as_deref(), args)?,

        Expr::Constructor { type_tag, args } => Expr::Constructor {
            type_tag: type_tag.clone(),
            args: args.iter().map(normalize).collect::<Result<_>>()?,
        },

        Expr::MemberInit { type_tag, bindings } => Expr::MemberInit {
            type_tag: type_tag.clone(),
            bindings: bindings
                .iter()
                .map(|(name, e)| Ok((name.clone(), normalize(e)?)))
                .collect::<Result<_>>()?,
        },

        Expr::Conditional { test, if_true, if_false } => Expr::Conditional {
            test: Box::new(normalize(test)?),
            if_true: Box::new(normalize(if_true)?),
            if_false: Box::new(normalize(if_false)?),
        },
    };

    fold(rewritten)
}

fn normalize_function(name: &str, target: Option<&Expr>, args: &[Expr]) -> Result<Expr> {
    let target = target.map(normalize).transpose()?;
    let args = args.iter().map(normalize).collect::<Result<Vec<_>>>()?;

    // `Equals(a, b)` becomes `Binary(Eq, a, b)` (`spec.md` §4.1).
    if name == "Equals" {
        return match (target, args.as_slice()) {
            (Some(a), [b]) => Ok(Expr::compare(BinaryOp::Eq, a, b.clone())),
            (None, [a, b]) => Ok(Expr::compare(BinaryOp::Eq, a.clone(), b.clone())),
            _ => Err(ErrorKind::InvalidArgument.with_message("Equals requires exactly two operands")),
        };
    }

    // Numeric conversion calls become `Unary(Convert, operand, target)`.
    let convert_target = match name {
        "ToInt32" => Some(ConvertTarget::I32),
        "ToInt64" => Some(ConvertTarget::I64),
        "ToDouble" => Some(ConvertTarget::F64),
        "ToDecimal" => Some(ConvertTarget::Decimal),
        _ => None,
    };
    if let Some(convert_target) = convert_target {
        let Some(operand) = target else {
            return Err(ErrorKind::InvalidArgument.with_message(format!("{name} requires a receiver")));
        };
        return Ok(Expr::Unary {
            op: UnaryOp::Convert,
            operand: Box::new(operand),
            result_type: Some(convert_target),
        });
    }

    if !KNOWN_FUNCTIONS.contains(&name) {
        return Err(ErrorKind::NotSupported.with_message(format!("unsupported construct '{name}'")));
    }

    Ok(Expr::Function {
        name: name.to_string(),
        target: target.map(Box::new),
        args,
    })
}

/// Folds a parameter-free subtree into a `Constant` by evaluating it eagerly
/// against an empty row (`spec.md` §4.1: "a subtree that does not reference
/// the implicit parameter is pre-evaluated and replaced with its result").
fn fold(expr: Expr) -> Result<Expr> {
    if matches!(expr, Expr::Constant(_)) || !expr.is_parameter_free() {
        return Ok(expr);
    }
    let empty = BTreeMap::new();
    let value = eval::evaluate_value::<crate::contracts::NoFields>(&expr, Row::Document(&empty))?;
    Ok(Expr::Constant(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_a_predicate_twice_yields_equal_trees() {
        let raw = Expr::compare(
            BinaryOp::Gt,
            Expr::member("age"),
            Expr::compare(BinaryOp::Add, Expr::constant(1i32), Expr::constant(2i32)),
        );
        let first = parse_predicate(Some(&raw)).unwrap();
        let second = parse_predicate(Some(&raw)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn constant_folding_collapses_parameter_free_arithmetic() {
        let raw = Expr::compare(BinaryOp::Add, Expr::constant(1i32), Expr::constant(2i32));
        let parsed = parse_predicate(Some(&raw)).unwrap().unwrap();
        assert_eq!(parsed, Expr::Constant(Value::F64(3.0)));
    }

    #[test]
    fn negate_rewrites_to_subtraction_from_zero() {
        let raw = Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(Expr::member("score")),
            result_type: None,
        };
        let parsed = parse_predicate(Some(&raw)).unwrap().unwrap();
        assert_eq!(
            parsed,
            Expr::Binary {
                op: BinaryOp::Sub,
                left: Box::new(Expr::Constant(Value::I32(0))),
                right: Box::new(Expr::member("score")),
            }
        );
    }

    #[test]
    fn equals_call_rewrites_to_eq_binary() {
        let raw = Expr::Function {
            name: "Equals".to_string(),
            target: Some(Box::new(Expr::member("name"))),
            args: vec![Expr::constant("bob")],
        };
        let parsed = parse_predicate(Some(&raw)).unwrap().unwrap();
        assert_eq!(
            parsed,
            Expr::compare(BinaryOp::Eq, Expr::member("name"), Expr::constant("bob"))
        );
    }

    #[test]
    fn null_predicate_parses_to_none() {
        assert_eq!(parse_predicate(None).unwrap(), None);
    }

    #[test]
    fn parameter_dependent_conditional_is_rejected_in_predicate_position() {
        let raw = Expr::Conditional {
            test: Box::new(Expr::member("active")),
            if_true: Box::new(Expr::constant(true)),
            if_false: Box::new(Expr::constant(false)),
        };
        let err = parse_predicate(Some(&raw)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn parameter_dependent_conditional_is_allowed_in_projection_position() {
        let raw = Expr::Conditional {
            test: Box::new(Expr::member("active")),
            if_true: Box::new(Expr::constant("yes")),
            if_false: Box::new(Expr::constant("no")),
        };
        assert!(parse_projection(&raw).is_ok());
    }

    #[test]
    fn unknown_function_name_is_not_supported() {
        let raw = Expr::Function {
            name: "get_Item".to_string(),
            target: Some(Box::new(Expr::member("tags"))),
            args: vec![Expr::constant(0i32)],
        };
        let err = parse_predicate(Some(&raw)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
