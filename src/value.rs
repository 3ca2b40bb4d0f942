// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The value domain shared by the expression algebra, the evaluator and the
//! query-domain comparator (`spec.md` §3).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A schema-less mapping from string keys to [`Value`]s.
///
/// Field order is not semantically meaningful; a `BTreeMap` is used purely so
/// that two structurally-equal documents produce the same iteration order,
/// which keeps `Debug` output and hashing of canonicalized documents stable.
pub type Document = BTreeMap<String, Value>;

/// A single value in the document database's value domain.
///
/// `spec.md` §3: "Scalars: null, boolean, 32-bit and 64-bit signed integers,
/// 64-bit float, 128-bit decimal, UTF-8 string, binary blob, date-time (UTC),
/// unique identifier (128-bit). Composites: ordered sequence of values;
/// mapping from string key to value (document)."
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    Str(String),
    Binary(Vec<u8>),
    DateTime(DateTime<Utc>),
    Uuid(Uuid),
    Array(Vec<Value>),
    Document(Document),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` iff this value is one of the numeric scalar kinds.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::I32(_) | Value::I64(_) | Value::F64(_) | Value::Decimal(_)
        )
    }

    /// Widens any numeric kind to `f64`, used for cross-numeric comparisons
    /// and arithmetic per `spec.md` §4.2/§4.6 ("cross-numeric coerced to
    /// 64-bit float").
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            Value::Decimal(v) => v.to_string().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Stringifies the value. Used by `ToString`, by the `Convert` unary
    /// operator when converting to string, and as the last-resort comparison
    /// fallback between unrelated kinds (`spec.md` §3, §4.6).
    pub fn stringify(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Str(s) => s.clone(),
            Value::Binary(b) => b
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<String>(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            Value::Uuid(u) => u.to_string(),
            Value::Array(items) => format!(
                "[{}]",
                items
                    .iter()
                    .map(Value::stringify)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Value::Document(_) => "[object]".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
