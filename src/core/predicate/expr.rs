// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `$expr` mini-language: comparison operators over operands that are
//! literals, `$d.<path>` references, the `$$NOW` sentinel, or nested
//! date-arithmetic operator objects.

use serde_json::Value;

use super::compare::{as_datetime, compare_values, values_equal};
use super::date_math::{date_add, date_diff, date_subtract, DateUnit};
use super::{resolve_path, EvalContext};
use crate::core::fact::rfc3339_millis;

/// Evaluate an `$expr` tree to a boolean.
pub fn eval_expr_bool(doc: &Value, expr: &Value, ctx: &mut EvalContext) -> bool {
    match resolve_operand(doc, expr, ctx) {
        Some(Value::Bool(b)) => b,
        Some(Value::Null) | None => false,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(_) => true,
    }
}

/// Resolve an operand to a concrete value. Dates resolve to RFC 3339
/// strings, `$dateDiff` to a number, comparisons to booleans. `None` means
/// the operand could not be resolved (missing field, unsupported operator).
pub fn resolve_operand(doc: &Value, v: &Value, ctx: &mut EvalContext) -> Option<Value> {
    match v {
        Value::String(s) if s == "$$NOW" => {
            Some(Value::String(rfc3339_millis::format(&ctx.now)))
        }
        Value::String(s) => match s.strip_prefix('$') {
            // `$$<other>` variables are not part of the language
            Some(rest) if !rest.starts_with('$') => resolve_path(doc, rest).cloned(),
            Some(_) => {
                ctx.skip(s, "unknown variable");
                None
            }
            None => Some(v.clone()),
        },
        Value::Object(map) if map.len() == 1 => {
            // single-operator object; anything else is a literal
            let (op, arg) = map.iter().next()?;
            match op.as_str() {
                "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
                    eval_comparison(doc, op, arg, ctx).map(Value::Bool)
                }
                "$dateAdd" | "$dateSubtract" => {
                    let (start, unit, amount) = date_shift_args(doc, op, arg, ctx)?;
                    let shifted = if op == "$dateAdd" {
                        date_add(start, unit, amount)
                    } else {
                        date_subtract(start, unit, amount)
                    };
                    Some(Value::String(rfc3339_millis::format(&shifted)))
                }
                "$dateDiff" => {
                    let spec = arg.as_object().or_else(|| {
                        ctx.skip(op, "argument must be an object");
                        None
                    })?;
                    let start = resolve_date_field(doc, spec.get("startDate"), op, ctx)?;
                    let end = resolve_date_field(doc, spec.get("endDate"), op, ctx)?;
                    let unit = resolve_unit(spec.get("unit"), op, ctx)?;
                    Some(Value::from(date_diff(start, end, unit)))
                }
                other => {
                    ctx.skip(other, "unsupported expression operator");
                    None
                }
            }
        }
        _ => Some(v.clone()),
    }
}

fn eval_comparison(doc: &Value, op: &str, arg: &Value, ctx: &mut EvalContext) -> Option<bool> {
    let operands = match arg.as_array() {
        Some(a) if a.len() == 2 => a,
        _ => {
            ctx.skip(op, "expression comparison takes two operands");
            return None;
        }
    };
    let lhs = resolve_operand(doc, &operands[0], ctx).unwrap_or(Value::Null);
    let rhs = resolve_operand(doc, &operands[1], ctx).unwrap_or(Value::Null);

    match op {
        "$eq" => Some(values_equal(&lhs, &rhs)),
        "$ne" => Some(!values_equal(&lhs, &rhs)),
        _ => {
            let ord = compare_values(&lhs, &rhs)?;
            Some(match op {
                "$gt" => ord.is_gt(),
                "$gte" => ord.is_ge(),
                "$lt" => ord.is_lt(),
                "$lte" => ord.is_le(),
                _ => false,
            })
        }
    }
}

fn date_shift_args(
    doc: &Value,
    op: &str,
    arg: &Value,
    ctx: &mut EvalContext,
) -> Option<(chrono::DateTime<chrono::Utc>, DateUnit, i64)> {
    let spec = arg.as_object().or_else(|| {
        ctx.skip(op, "argument must be an object");
        None
    })?;
    let start = resolve_date_field(doc, spec.get("startDate"), op, ctx)?;
    let unit = resolve_unit(spec.get("unit"), op, ctx)?;
    let amount = match spec.get("amount").and_then(Value::as_i64) {
        Some(n) => n,
        None => {
            ctx.skip(op, "amount must be an integer");
            return None;
        }
    };
    Some((start, unit, amount))
}

fn resolve_date_field(
    doc: &Value,
    v: Option<&Value>,
    op: &str,
    ctx: &mut EvalContext,
) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = v?;
    let resolved = resolve_operand(doc, raw, ctx)?;
    match as_datetime(&resolved) {
        Some(d) => Some(d),
        None => {
            ctx.skip(op, "operand is not a date");
            None
        }
    }
}

fn resolve_unit(v: Option<&Value>, op: &str, ctx: &mut EvalContext) -> Option<DateUnit> {
    match v.and_then(Value::as_str).and_then(DateUnit::parse) {
        Some(u) => Some(u),
        None => {
            ctx.skip(op, "unit must be one of year..millisecond");
            None
        }
    }
}
