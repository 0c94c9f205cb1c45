// SPDX-License-Identifier: MIT OR Apache-2.0

//! Value comparison for predicate evaluation.
//!
//! Ordering rules: numeric against numeric compares as numbers (strings
//! parsable as numbers are coerced), date against date compares by epoch,
//! string against string compares lexicographically. Anything else does not
//! order.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;

/// Epoch milliseconds of an RFC 3339 string value.
pub fn as_date_ms(v: &Value) -> Option<i64> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc).timestamp_millis()),
        _ => None,
    }
}

/// The value as a chrono timestamp: an RFC 3339 string or epoch
/// milliseconds.
pub fn as_datetime(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn numeric_coerce(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Ordered comparison; `None` when the operands do not order.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_date_ms(a), as_date_ms(b)) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (numeric_coerce(a), numeric_coerce(b)) {
        return x.partial_cmp(&y);
    }
    // a date against an epoch-millisecond number
    if let (Some(x), Some(y)) = (as_date_ms(a), numeric_coerce(b)) {
        return (x as f64).partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (numeric_coerce(a), as_date_ms(b)) {
        return x.partial_cmp(&(y as f64));
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Strict equality, with dates equal by epoch regardless of rendering and
/// numbers equal across integer/float representations.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (as_date_ms(a), as_date_ms(b)) {
        return x == y;
    }
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return x.as_f64() == y.as_f64();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_ordering() {
        assert_eq!(compare_values(&json!(3), &json!(5)), Some(Ordering::Less));
        assert_eq!(compare_values(&json!(5.5), &json!(5)), Some(Ordering::Greater));
        assert_eq!(compare_values(&json!(5), &json!(5.0)), Some(Ordering::Equal));
    }

    #[test]
    fn test_numeric_string_coercion() {
        assert_eq!(compare_values(&json!("10"), &json!(9)), Some(Ordering::Greater));
        assert_eq!(compare_values(&json!(2), &json!("10")), Some(Ordering::Less));
    }

    #[test]
    fn test_lexicographic_strings() {
        assert_eq!(compare_values(&json!("abc"), &json!("abd")), Some(Ordering::Less));
    }

    #[test]
    fn test_dates_compare_by_epoch() {
        assert_eq!(
            compare_values(
                &json!("2024-05-30T00:00:00Z"),
                &json!("2024-05-30T02:00:00+02:00")
            ),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_values(&json!("2024-06-01T00:00:00Z"), &json!("2024-05-30T00:00:00Z")),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_unorderable_pairs() {
        assert_eq!(compare_values(&json!(true), &json!(3)), None);
        assert_eq!(compare_values(&json!({"a": 1}), &json!({"a": 1})), None);
        assert_eq!(compare_values(&json!(null), &json!(1)), None);
    }

    #[test]
    fn test_equality_rules() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(
            &json!("2024-05-30T00:00:00Z"),
            &json!("2024-05-30T00:00:00.000Z")
        ));
        assert!(values_equal(&json!([1, "a"]), &json!([1, "a"])));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }
}
