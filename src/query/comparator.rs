// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The value-domain total order, shared by `OrderBy`/`ThenBy`, `Distinct`,
//! `Min`/`Max` and the optimizer's key ordering (`spec.md` §3, §4.6).
//!
//! Grounded on the teacher's `QueryClauseItem::compare`
//! (`azure_data_cosmos_engine::query::query_result`): a type-ordinal pass
//! first, then a same-kind comparison, falling back to stringification for
//! genuinely unrelated kinds.

use std::cmp::Ordering;

use crate::value::Value;

/// Type-ordinal used to order values of differing kinds when no more
/// specific rule applies. Lower sorts first.
fn type_ordinal(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::I32(_) | Value::I64(_) | Value::F64(_) | Value::Decimal(_) => 2,
        Value::Str(_) => 3,
        Value::DateTime(_) => 4,
        Value::Uuid(_) => 5,
        Value::Binary(_) => 6,
        Value::Array(_) => 7,
        Value::Document(_) => 8,
    }
}

/// Total order over the value domain (`spec.md` §4.6 "Object comparator").
///
/// 1. Both numeric kinds (including a mix of integer/float/decimal) compare
///    as 64-bit float.
/// 2. Both strings compare ordinally.
/// 3. Both date-times or both identifiers compare natively.
/// 4. Same comparable kind otherwise compares natively.
/// 5. Mixed kinds compare via stringification.
pub fn compare(left: &Value, right: &Value) -> Ordering {
    if let (Value::Null, Value::Null) = (left, right) {
        return Ordering::Equal;
    }
    match (left, right) {
        (Value::Null, _) => return Ordering::Less,
        (_, Value::Null) => return Ordering::Greater,
        _ => {}
    }

    if left.is_numeric() && right.is_numeric() {
        let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
            return stringified(left, right);
        };
        return l.partial_cmp(&r).unwrap_or(Ordering::Equal);
    }

    match (left, right) {
        (Value::Str(l), Value::Str(r)) => l.cmp(r),
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::DateTime(l), Value::DateTime(r)) => l.cmp(r),
        (Value::Uuid(l), Value::Uuid(r)) => l.cmp(r),
        (Value::Binary(l), Value::Binary(r)) => l.cmp(r),
        (Value::Array(l), Value::Array(r)) => compare_sequences(l, r),
        _ => stringified(left, right),
    }
}

fn compare_sequences(left: &[Value], right: &[Value]) -> Ordering {
    for (l, r) in left.iter().zip(right.iter()) {
        match compare(l, r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    left.len().cmp(&right.len())
}

fn stringified(left: &Value, right: &Value) -> Ordering {
    let ordinal = type_ordinal(left).cmp(&type_ordinal(right));
    if ordinal != Ordering::Equal {
        return ordinal;
    }
    left.stringify().cmp(&right.stringify())
}

/// Ordinal/structural equality used by `Eq`/`NotEq` and by `Distinct`.
///
/// Per `spec.md` §4.2: "Equality of strings is ordinal." and
/// "Eq(null, null) = true".
pub fn equals(left: &Value, right: &Value) -> bool {
    compare(left, right) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn numeric_kinds_compare_across_representations() {
        assert_eq!(compare(&Value::I32(1), &Value::F64(1.0)), Ordering::Equal);
        assert_eq!(
            compare(&Value::I64(2), &Value::Decimal(Decimal::new(15, 1))),
            Ordering::Greater
        );
        assert_eq!(compare(&Value::I32(1), &Value::I32(2)), Ordering::Less);
    }

    #[test]
    fn null_sorts_before_everything_but_itself() {
        assert_eq!(compare(&Value::Null, &Value::Null), Ordering::Equal);
        assert_eq!(compare(&Value::Null, &Value::Bool(false)), Ordering::Less);
        assert_eq!(compare(&Value::Bool(false), &Value::Null), Ordering::Greater);
    }

    #[test]
    fn strings_compare_ordinally() {
        assert_eq!(
            compare(&Value::from("aaa"), &Value::from("aab")),
            Ordering::Less
        );
    }

    #[test]
    fn mixed_kinds_fall_back_to_type_ordinal_then_stringification() {
        assert_eq!(
            compare(&Value::Bool(true), &Value::I32(1)),
            Ordering::Less
        );
    }

    #[test]
    fn equals_mirrors_compare_equal() {
        assert!(equals(&Value::Null, &Value::Null));
        assert!(!equals(&Value::Null, &Value::Bool(false)));
        assert!(equals(&Value::from("x"), &Value::from("x")));
    }
}
