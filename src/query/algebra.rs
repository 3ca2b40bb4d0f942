// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The neutral expression algebra (`spec.md` §2 "Expression algebra", §3
//! "Expression nodes (tagged variants)").
//!
//! `Expr` is the target of the parser (`query::parser`), the input of the
//! evaluator (`query::eval`), and the thing the optimizer (`query::optimizer`)
//! pattern-matches to find push-downable index keys. Trees are immutable
//! once built and are never deduplicated (`spec.md` §3 "Lifecycles").

use crate::value::Value;

/// Comparison and logical/arithmetic binary operators
/// (`spec.md` §3 `Binary(op, left, right)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAlso,
    OrElse,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// `true` for the six comparison kinds the optimizer can turn into an
    /// `IndexScanKey` (`spec.md` §3 `IndexScanKey.comparison`).
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Flips a comparison so `Constant OP Member` can be read as
    /// `Member OP' Constant` (`spec.md` §4.4 step 2, "or its mirror").
    pub fn mirror(self) -> Self {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => other,
        }
    }
}

/// Unary operators (`spec.md` §3 `Unary(op, operand, result_type)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Convert,
    ArrayLength,
}

/// The target kind of a `Convert` unary node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvertTarget {
    I32,
    I64,
    F64,
    Decimal,
    Str,
}

/// A node in the expression algebra.
///
/// `spec.md` §3: "Each node carries a `NodeKind` and the fields it requires."
/// Variants mirror that list exactly.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Constant(Value),

    /// The single implicit input row.
    Parameter,

    /// `target` absent references the implicit input.
    Member {
        name: String,
        target: Option<Box<Expr>>,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        result_type: Option<ConvertTarget>,
    },

    /// `name` selects an intrinsic from the catalog in `spec.md` §4.3.
    Function {
        name: String,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },

    Constructor {
        type_tag: String,
        args: Vec<Expr>,
    },

    MemberInit {
        type_tag: String,
        bindings: Vec<(String, Expr)>,
    },

    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
}

impl Expr {
    pub fn member(name: impl Into<String>) -> Self {
        Expr::Member {
            name: name.into(),
            target: None,
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::Binary {
            op: BinaryOp::AndAlso,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Binary {
            op: BinaryOp::OrElse,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn compare(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Returns `true` if no subtree of this expression depends on the
    /// implicit row parameter (`spec.md` §3 invariant 1, §4.1).
    pub fn is_parameter_free(&self) -> bool {
        match self {
            Expr::Constant(_) => true,
            Expr::Parameter => false,
            Expr::Member { target, .. } => match target {
                Some(t) => t.is_parameter_free(),
                None => false,
            },
            Expr::Binary { left, right, .. } => left.is_parameter_free() && right.is_parameter_free(),
            Expr::Unary { operand, .. } => operand.is_parameter_free(),
            Expr::Function { target, args, .. } => {
                target.as_ref().map(|t| t.is_parameter_free()).unwrap_or(true)
                    && args.iter().all(Expr::is_parameter_free)
            }
            Expr::Constructor { args, .. } => args.iter().all(Expr::is_parameter_free),
            Expr::MemberInit { bindings, .. } => {
                bindings.iter().all(|(_, expr)| expr.is_parameter_free())
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => test.is_parameter_free() && if_true.is_parameter_free() && if_false.is_parameter_free(),
        }
    }
}
