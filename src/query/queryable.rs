// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The `Queryable` façade (`spec.md` §4.8): immutable, lazy and chainable.
//! Building a chain performs no work; enumeration drives the executor once
//! (pushing down a lone root `Where`) and then the in-memory pipeline.

use crate::contracts::{Cancellable, IndexCatalog, Overlay, StorageScanner};
use crate::error::{ErrorKind, Result};
use crate::query::algebra::Expr;
use crate::query::comparator;
use crate::query::executor::{self, PlanReport};
use crate::query::parser;
use crate::query::pipeline::{Pipeline, PipelineOp, Stage};
use crate::value::Value;

/// The external collaborators a `Queryable` needs to actually run
/// (`spec.md` §6): storage, the index catalog, and the transaction overlay.
/// Bundled behind one reference so `Queryable` itself stays a small,
/// `Clone`-able value.
pub trait Provider {
    fn storage(&self) -> &dyn StorageScanner;
    fn catalog(&self) -> &dyn IndexCatalog;
    fn overlay(&self) -> &dyn Overlay;
    fn cancellable(&self) -> &dyn Cancellable;
}

/// An immutable, lazy, chainable query over one collection.
///
/// `spec.md` §4.8: "constructing or extending a `Queryable` performs no
/// work; every operator returns a new façade wrapping an extended
/// expression. Work happens only on enumeration."
#[derive(Clone)]
pub struct Queryable<'p> {
    collection: String,
    provider: &'p dyn Provider,
    pipeline: Pipeline,
}

impl<'p> Queryable<'p> {
    pub fn new(collection: impl Into<String>, provider: &'p dyn Provider) -> Result<Self> {
        let collection = collection.into();
        if collection.trim().is_empty() {
            return Err(ErrorKind::InvalidArgument.with_message("collection name must not be empty"));
        }
        Ok(Self {
            collection,
            provider,
            pipeline: Pipeline::new(),
        })
    }

    fn extend(&self, op: PipelineOp) -> Self {
        Self {
            collection: self.collection.clone(),
            provider: self.provider,
            pipeline: self.pipeline.push(op),
        }
    }

    /// Every operator below runs its expression through the parser's
    /// normalize-and-fold pass before it joins the chain (`spec.md` §4.1),
    /// so e.g. a parameter-free subtree is already a `Constant` by the time
    /// the optimizer or the in-memory pipeline ever sees it.
    pub fn where_(&self, predicate: &Expr) -> Result<Self> {
        let predicate = parser::parse_predicate(Some(predicate))?.expect("Some in, Some out");
        Ok(self.extend(PipelineOp::Where(predicate)))
    }

    pub fn select(&self, projection: &Expr) -> Result<Self> {
        Ok(self.extend(PipelineOp::Select(parser::parse_projection(projection)?)))
    }

    pub fn order_by(&self, key: &Expr) -> Result<Self> {
        Ok(self.extend(PipelineOp::OrderBy(parser::parse_projection(key)?)))
    }

    pub fn order_by_descending(&self, key: &Expr) -> Result<Self> {
        Ok(self.extend(PipelineOp::OrderByDescending(parser::parse_projection(key)?)))
    }

    pub fn then_by(&self, key: &Expr) -> Result<Self> {
        Ok(self.extend(PipelineOp::ThenBy(parser::parse_projection(key)?)))
    }

    pub fn then_by_descending(&self, key: &Expr) -> Result<Self> {
        Ok(self.extend(PipelineOp::ThenByDescending(parser::parse_projection(key)?)))
    }

    pub fn distinct(&self) -> Self {
        self.extend(PipelineOp::Distinct)
    }

    pub fn skip(&self, n: &Expr) -> Result<Self> {
        Ok(self.extend(PipelineOp::Skip(parser::parse_projection(n)?)))
    }

    pub fn take(&self, n: &Expr) -> Result<Self> {
        Ok(self.extend(PipelineOp::Take(parser::parse_projection(n)?)))
    }

    pub fn group_by(&self, key: &Expr) -> Result<Self> {
        Ok(self.extend(PipelineOp::GroupBy(parser::parse_projection(key)?)))
    }

    /// Runs the executor (pushing down a lone root `Where`) and then the
    /// remaining in-memory pipeline stages, returning every resulting row.
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        Ok(self.run()?.0)
    }

    /// As [`Queryable::to_vec`], also returning the plan the executor chose —
    /// the `PlanReport` sink from `spec.md` §9's open question.
    pub fn to_vec_with_report(&self) -> Result<(Vec<Value>, PlanReport)> {
        self.run()
    }

    fn run(&self) -> Result<(Vec<Value>, PlanReport)> {
        let (pushed_down, remaining) = self.pipeline.split_pushdown();
        let (rows, report) = executor::execute(
            &self.collection,
            pushed_down,
            self.provider.storage(),
            self.provider.catalog(),
            self.provider.overlay(),
            self.provider.cancellable(),
        )?;
        let rows: Vec<Value> = rows.into_iter().map(Value::Document).collect();
        match crate::query::pipeline::run(remaining, rows)? {
            Stage::Rows(rows) => Ok((rows, report)),
            Stage::Grouped(groups) => Ok((
                groups
                    .into_iter()
                    .map(|g| {
                        let mut doc = crate::value::Document::new();
                        doc.insert("Key".to_string(), g.key);
                        doc.insert("Count".to_string(), Value::I32(g.count() as i32));
                        Value::Document(doc)
                    })
                    .collect(),
                report,
            )),
        }
    }

    pub fn count(&self) -> Result<i32> {
        Ok(self.to_vec()?.len() as i32)
    }

    pub fn long_count(&self) -> Result<i64> {
        Ok(self.to_vec()?.len() as i64)
    }

    pub fn any(&self) -> Result<bool> {
        Ok(!self.to_vec()?.is_empty())
    }

    pub fn all(&self, predicate: &Expr) -> Result<bool> {
        let predicate = parser::parse_predicate(Some(predicate))?.expect("Some in, Some out");
        let rows = self.to_vec()?;
        for row in &rows {
            if !crate::query::eval::evaluate_over_value(&predicate, row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn first(&self) -> Result<Value> {
        self.to_vec()?
            .into_iter()
            .next()
            .ok_or_else(|| ErrorKind::SequenceEmpty.into())
    }

    pub fn first_or_default(&self) -> Result<Value> {
        Ok(self.to_vec()?.into_iter().next().unwrap_or(Value::Null))
    }

    pub fn last(&self) -> Result<Value> {
        self.to_vec()?
            .into_iter()
            .last()
            .ok_or_else(|| ErrorKind::SequenceEmpty.into())
    }

    pub fn last_or_default(&self) -> Result<Value> {
        Ok(self.to_vec()?.into_iter().last().unwrap_or(Value::Null))
    }

    pub fn single(&self) -> Result<Value> {
        let mut rows = self.to_vec()?.into_iter();
        let first: Value = rows.next().ok_or_else(|| ErrorKind::SequenceEmpty.into())?;
        if rows.next().is_some() {
            return Err(ErrorKind::InvalidState.with_message("sequence contained more than one element"));
        }
        Ok(first)
    }

    pub fn single_or_default(&self) -> Result<Value> {
        let mut rows = self.to_vec()?.into_iter();
        let Some(first) = rows.next() else {
            return Ok(Value::Null);
        };
        if rows.next().is_some() {
            return Err(ErrorKind::InvalidState.with_message("sequence contained more than one element"));
        }
        Ok(first)
    }

    pub fn element_at(&self, index: usize) -> Result<Value> {
        self.to_vec()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| ErrorKind::SequenceEmpty.into())
    }

    pub fn element_at_or_default(&self, index: usize) -> Result<Value> {
        Ok(self.to_vec()?.into_iter().nth(index).unwrap_or(Value::Null))
    }

    pub fn sum(&self, selector: Option<&Expr>) -> Result<Value> {
        aggregate_rows(self.to_vec()?, selector, Reduce::Sum)
    }

    pub fn average(&self, selector: Option<&Expr>) -> Result<Value> {
        aggregate_rows(self.to_vec()?, selector, Reduce::Average)
    }

    pub fn min(&self, selector: Option<&Expr>) -> Result<Value> {
        aggregate_rows(self.to_vec()?, selector, Reduce::Min)
    }

    pub fn max(&self, selector: Option<&Expr>) -> Result<Value> {
        aggregate_rows(self.to_vec()?, selector, Reduce::Max)
    }
}

enum Reduce {
    Sum,
    Average,
    Min,
    Max,
}

fn aggregate_rows(rows: Vec<Value>, selector: Option<&Expr>, reduce: Reduce) -> Result<Value> {
    use rust_decimal::Decimal;

    let mut projected = Vec::with_capacity(rows.len());
    for row in &rows {
        let value = match selector {
            Some(expr) => crate::query::eval::evaluate_value_over_value(expr, row)?,
            None => row.clone(),
        };
        if !value.is_null() {
            projected.push(value);
        }
    }
    let decimal_of = |v: &Value| -> Option<Decimal> {
        match v {
            Value::Decimal(d) => Some(*d),
            other => other.as_f64().and_then(|n| Decimal::try_from(n).ok()),
        }
    };
    Ok(match reduce {
        Reduce::Sum => Value::Decimal(projected.iter().filter_map(decimal_of).fold(Decimal::ZERO, |a, b| a + b)),
        Reduce::Average => {
            if projected.is_empty() {
                Value::Decimal(Decimal::ZERO)
            } else {
                let sum = projected.iter().filter_map(decimal_of).fold(Decimal::ZERO, |a, b| a + b);
                Value::Decimal(sum / Decimal::from(projected.len() as i64))
            }
        }
        Reduce::Min => projected.into_iter().min_by(comparator::compare).unwrap_or(Value::Null),
        Reduce::Max => projected.into_iter().max_by(comparator::compare).unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{DocumentRef, EmptyOverlay, IndexAccess, IndexCatalog, IndexScanRange, IndexStatistics};
    use crate::query::algebra::BinaryOp;
    use crate::value::Document;

    struct VecStorage(Vec<Document>);
    impl StorageScanner for VecStorage {
        fn scan<'a>(&'a self, _collection: &str) -> Box<dyn Iterator<Item = Document> + 'a> {
            Box::new(self.0.iter().cloned())
        }
    }

    struct NoIndexes;
    impl IndexCatalog for NoIndexes {
        fn list(&self, _collection: &str) -> Vec<IndexStatistics> {
            Vec::new()
        }
        fn get(&self, _collection: &str, _name: &str) -> Option<&dyn IndexAccess> {
            None
        }
    }

    struct TestProvider {
        storage: VecStorage,
        catalog: NoIndexes,
        overlay: EmptyOverlay,
    }
    impl Provider for TestProvider {
        fn storage(&self) -> &dyn StorageScanner {
            &self.storage
        }
        fn catalog(&self) -> &dyn IndexCatalog {
            &self.catalog
        }
        fn overlay(&self) -> &dyn Overlay {
            &self.overlay
        }
        fn cancellable(&self) -> &dyn Cancellable {
            &()
        }
    }

    fn doc(id: i32, name: &str, age: i32) -> Document {
        let mut d = Document::new();
        d.insert("_id".to_string(), Value::I32(id));
        d.insert("name".to_string(), Value::from(name));
        d.insert("age".to_string(), Value::I32(age));
        d
    }

    fn provider() -> TestProvider {
        TestProvider {
            storage: VecStorage(vec![doc(1, "alice", 30), doc(2, "bob", 20), doc(3, "cara", 40)]),
            catalog: NoIndexes,
            overlay: EmptyOverlay,
        }
    }

    #[test]
    fn building_a_chain_performs_no_work_until_enumerated() {
        let provider = provider();
        let q = Queryable::new("people", &provider).unwrap();
        let _chain = q
            .where_(&Expr::compare(BinaryOp::Gt, Expr::member("age"), Expr::constant(25i32)))
            .unwrap();
        // No assertion needed beyond "this didn't touch storage"; enumerated below.
    }

    #[test]
    fn where_select_order_by_take_chain() {
        let provider = provider();
        let q = Queryable::new("people", &provider).unwrap();
        let rows = q
            .where_(&Expr::compare(BinaryOp::Gt, Expr::member("age"), Expr::constant(15i32)))
            .unwrap()
            .order_by_descending(&Expr::member("age"))
            .unwrap()
            .select(&Expr::member("name"))
            .unwrap()
            .take(&Expr::constant(2i32))
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(rows, vec![Value::from("cara"), Value::from("alice")]);
    }

    #[test]
    fn count_and_any_terminals() {
        let provider = provider();
        let q = Queryable::new("people", &provider).unwrap();
        assert_eq!(q.count().unwrap(), 3);
        assert!(q.any().unwrap());
        let empty = q
            .where_(&Expr::compare(BinaryOp::Eq, Expr::member("name"), Expr::constant("zzz")))
            .unwrap();
        assert!(!empty.any().unwrap());
    }

    #[test]
    fn all_checks_the_predicate_against_every_row() {
        let provider = provider();
        let q = Queryable::new("people", &provider).unwrap();
        assert!(q.all(&Expr::compare(BinaryOp::Gt, Expr::member("age"), Expr::constant(0i32))).unwrap());
        assert!(!q
            .all(&Expr::compare(BinaryOp::Gt, Expr::member("age"), Expr::constant(25i32)))
            .unwrap());
    }

    #[test]
    fn single_errors_when_more_than_one_row_matches() {
        let provider = provider();
        let q = Queryable::new("people", &provider).unwrap();
        let err = q.single().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn first_or_default_on_empty_result_is_null() {
        let provider = provider();
        let q = Queryable::new("people", &provider).unwrap();
        let empty = q
            .where_(&Expr::compare(BinaryOp::Eq, Expr::member("name"), Expr::constant("zzz")))
            .unwrap();
        assert_eq!(empty.first_or_default().unwrap(), Value::Null);
    }

    #[test]
    fn empty_collection_name_is_rejected_at_construction() {
        let provider = provider();
        let err = Queryable::new("  ", &provider).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn group_by_reports_key_and_count() {
        let provider = provider();
        let q = Queryable::new("people", &provider).unwrap();
        let rows = q
            .group_by(&Expr::Conditional {
                test: Box::new(Expr::compare(BinaryOp::Ge, Expr::member("age"), Expr::constant(30i32))),
                if_true: Box::new(Expr::constant("senior")),
                if_false: Box::new(Expr::constant("junior")),
            })
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
