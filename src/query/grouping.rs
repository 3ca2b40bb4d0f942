// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `GroupBy`'s result element (`spec.md` §4.7): a key paired with the rows
//! that produced it, plus the same aggregate helpers available as sequence
//! intrinsics (`spec.md` §4.3) so a grouped query can terminate directly in
//! `Sum`/`Average`/`Min`/`Max`/`Count` without a second pass through
//! `functions`.

use rust_decimal::Decimal;

use crate::error::Result;
use crate::query::algebra::Expr;
use crate::query::comparator;
use crate::query::eval;
use crate::value::Value;

/// One group produced by `GroupBy`. `spec.md` §4.7: "a `null` key groups
/// under an empty string; groups are emitted in first-encounter order."
#[derive(Clone, Debug, PartialEq)]
pub struct AotGrouping {
    pub key: Value,
    pub rows: Vec<Value>,
}

impl AotGrouping {
    pub fn new(key: Value, rows: Vec<Value>) -> Self {
        Self { key, rows }
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    fn projected(&self, selector: Option<&Expr>) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let value = match selector {
                Some(expr) => eval::evaluate_value_over_value(expr, row)?,
                None => row.clone(),
            };
            if !value.is_null() {
                out.push(value);
            }
        }
        Ok(out)
    }

    pub fn sum(&self, selector: Option<&Expr>) -> Result<Value> {
        let values = self.projected(selector)?;
        Ok(Value::Decimal(
            values.iter().filter_map(decimal_of).fold(Decimal::ZERO, |acc, v| acc + v),
        ))
    }

    pub fn average(&self, selector: Option<&Expr>) -> Result<Value> {
        let values = self.projected(selector)?;
        if values.is_empty() {
            return Ok(Value::Decimal(Decimal::ZERO));
        }
        let sum = values.iter().filter_map(decimal_of).fold(Decimal::ZERO, |acc, v| acc + v);
        Ok(Value::Decimal(sum / Decimal::from(values.len() as i64)))
    }

    pub fn min(&self, selector: Option<&Expr>) -> Result<Value> {
        Ok(self
            .projected(selector)?
            .into_iter()
            .min_by(comparator::compare)
            .unwrap_or(Value::Null))
    }

    pub fn max(&self, selector: Option<&Expr>) -> Result<Value> {
        Ok(self
            .projected(selector)?
            .into_iter()
            .max_by(comparator::compare)
            .unwrap_or(Value::Null))
    }
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Decimal(d) => Some(*d),
        other => other.as_f64().and_then(|n| Decimal::try_from(n).ok()),
    }
}
