// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The query subsystem: expression algebra, parser, evaluator, optimizer,
//! executor, deferred pipeline and the `Queryable` façade (`spec.md` §2).

pub mod algebra;
pub mod comparator;
pub mod eval;
pub mod executor;
pub mod functions;
pub mod grouping;
pub mod optimizer;
pub mod parser;
pub mod pipeline;
pub mod plan;
pub mod queryable;

pub use algebra::{BinaryOp, ConvertTarget, Expr, UnaryOp};
pub use eval::{evaluate, evaluate_value};
pub use executor::PlanReport;
pub use grouping::AotGrouping;
pub use plan::{IndexScanKey, QueryExecutionPlan, Strategy};
pub use queryable::{Provider, Queryable};
