// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local predicate evaluation.
//!
//! Mirrors the store's query semantics for the supported operator set, so a
//! counter's `computationConditions` can be decided against a fact without a
//! round trip: for any supported predicate and any fact, this evaluator
//! returns the same boolean the store would return for a `$match` over a
//! singleton collection holding that fact.
//!
//! Unsupported operators never crash and never throw: the predicate
//! evaluates to false and the reason lands in the context's skip channel.

pub mod compare;
pub mod date_math;
pub mod expr;

pub use compare::{compare_values, values_equal};
pub use date_math::{date_add, date_diff, date_subtract, DateUnit};
pub use expr::eval_expr_bool;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Why an operator was skipped during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReason {
    pub operator: String,
    pub detail: String,
}

/// Per-evaluation state: the clock behind `$$NOW` and the skip channel.
#[derive(Debug)]
pub struct EvalContext {
    pub now: DateTime<Utc>,
    pub skipped: Vec<SkipReason>,
}

impl EvalContext {
    /// Context pinned to the server clock at millisecond resolution.
    pub fn new() -> Self {
        let now = Utc::now();
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Self {
            now,
            skipped: Vec::new(),
        }
    }

    /// Context with an explicit clock, for deterministic evaluation.
    pub fn with_now(now: DateTime<Utc>) -> Self {
        Self {
            now,
            skipped: Vec::new(),
        }
    }

    pub fn skip(&mut self, operator: &str, detail: &str) {
        self.skipped.push(SkipReason {
            operator: operator.to_string(),
            detail: detail.to_string(),
        });
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk a dotted path through a document. Array segments accept numeric
/// indexes.
pub fn resolve_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for seg in path.split('.') {
        match cur {
            Value::Object(map) => cur = map.get(seg)?,
            Value::Array(items) => cur = items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }
    Some(cur)
}

/// Evaluate a predicate tree against a document. The empty predicate
/// matches everything.
pub fn matches(doc: &Value, predicate: &Value, ctx: &mut EvalContext) -> bool {
    match predicate.as_object() {
        Some(map) => map.iter().all(|(k, v)| eval_entry(doc, k, v, ctx)),
        None => {
            ctx.skip("<predicate>", "predicate must be an object");
            false
        }
    }
}

fn eval_entry(doc: &Value, key: &str, v: &Value, ctx: &mut EvalContext) -> bool {
    match key {
        "$and" => match v.as_array() {
            Some(preds) => preds.iter().all(|p| matches(doc, p, ctx)),
            None => {
                ctx.skip("$and", "takes an array");
                false
            }
        },
        "$or" => match v.as_array() {
            Some(preds) => preds.iter().any(|p| matches(doc, p, ctx)),
            None => {
                ctx.skip("$or", "takes an array");
                false
            }
        },
        "$not" => !matches(doc, v, ctx),
        "$expr" => expr::eval_expr_bool(doc, v, ctx),
        op if op.starts_with('$') => {
            ctx.skip(op, "unsupported top-level operator");
            false
        }
        path => eval_field(doc, resolve_path(doc, path), v, ctx),
    }
}

fn eval_field(doc: &Value, field: Option<&Value>, cond: &Value, ctx: &mut EvalContext) -> bool {
    match cond {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, operand)| {
                // $options is consumed by the $regex arm
                if op == "$options" {
                    return true;
                }
                eval_operator(doc, field, op, operand, ops, ctx)
            })
        }
        // plain key with an array means membership in the array
        Value::Array(candidates) => {
            let effective = field.unwrap_or(&Value::Null);
            candidates.iter().any(|c| values_equal(effective, c))
        }
        literal => values_equal(field.unwrap_or(&Value::Null), literal),
    }
}

fn eval_operator(
    doc: &Value,
    field: Option<&Value>,
    op: &str,
    operand: &Value,
    siblings: &serde_json::Map<String, Value>,
    ctx: &mut EvalContext,
) -> bool {
    match op {
        "$eq" => {
            let rhs = resolve_comparison_operand(doc, operand, ctx);
            values_equal(field.unwrap_or(&Value::Null), &rhs)
        }
        "$ne" => {
            let rhs = resolve_comparison_operand(doc, operand, ctx);
            !values_equal(field.unwrap_or(&Value::Null), &rhs)
        }
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let rhs = resolve_comparison_operand(doc, operand, ctx);
            let lhs = match field {
                Some(v) => v,
                None => return false,
            };
            match compare_values(lhs, &rhs) {
                Some(ord) => match op {
                    "$gt" => ord.is_gt(),
                    "$gte" => ord.is_ge(),
                    "$lt" => ord.is_lt(),
                    _ => ord.is_le(),
                },
                None => false,
            }
        }
        "$in" => match operand.as_array() {
            Some(candidates) => in_matches(field, candidates),
            None => {
                ctx.skip("$in", "takes an array");
                false
            }
        },
        "$nin" => match operand.as_array() {
            Some(candidates) => !in_matches(field, candidates),
            None => {
                ctx.skip("$nin", "takes an array");
                false
            }
        },
        "$all" => match (field.and_then(Value::as_array), operand.as_array()) {
            (Some(items), Some(required)) => required
                .iter()
                .all(|r| items.iter().any(|i| values_equal(i, r))),
            (None, Some(_)) => false,
            _ => {
                ctx.skip("$all", "takes an array");
                false
            }
        },
        "$elemMatch" => match (field.and_then(Value::as_array), operand.as_object()) {
            (Some(items), Some(sub)) => {
                let operator_form = sub.keys().all(|k| k.starts_with('$'));
                items.iter().any(|item| {
                    if operator_form {
                        eval_field(doc, Some(item), operand, ctx)
                    } else {
                        matches(item, operand, ctx)
                    }
                })
            }
            (None, Some(_)) => false,
            _ => {
                ctx.skip("$elemMatch", "takes a predicate object");
                false
            }
        },
        "$size" => match (field.and_then(Value::as_array), operand.as_i64()) {
            (Some(items), Some(n)) => items.len() as i64 == n,
            (None, Some(_)) => false,
            _ => {
                ctx.skip("$size", "takes an integer");
                false
            }
        },
        "$regex" => eval_regex(field, operand, siblings.get("$options"), ctx),
        "$not" => !eval_field(doc, field, operand, ctx),
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(false);
            let present = matches!(field, Some(v) if !v.is_null());
            present == wanted
        }
        "$type" => match operand.as_str() {
            Some(class) => type_matches(field, class, ctx),
            None => {
                ctx.skip("$type", "takes a type-class string");
                false
            }
        },
        "$mod" => eval_mod(field, operand, ctx),
        // enumerated unsupported operators, and anything unknown
        other => {
            ctx.skip(other, "unsupported operator");
            false
        }
    }
}

/// Operands of comparison operators may be the `$$NOW` sentinel or a nested
/// date-arithmetic operator; both are resolved before comparing.
fn resolve_comparison_operand(doc: &Value, operand: &Value, ctx: &mut EvalContext) -> Value {
    match operand {
        Value::String(s) if s == "$$NOW" => {
            Value::String(crate::core::fact::rfc3339_millis::format(&ctx.now))
        }
        Value::Object(map)
            if map.len() == 1
                && matches!(
                    map.keys().next().map(String::as_str),
                    Some("$dateAdd" | "$dateSubtract" | "$dateDiff")
                ) =>
        {
            expr::resolve_operand(doc, operand, ctx).unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

fn in_matches(field: Option<&Value>, candidates: &[Value]) -> bool {
    let effective = field.unwrap_or(&Value::Null);
    if candidates.iter().any(|c| values_equal(effective, c)) {
        return true;
    }
    // an array field matches when any of its elements does
    match effective {
        Value::Array(items) => items
            .iter()
            .any(|i| candidates.iter().any(|c| values_equal(i, c))),
        _ => false,
    }
}

fn eval_regex(
    field: Option<&Value>,
    pattern: &Value,
    options: Option<&Value>,
    ctx: &mut EvalContext,
) -> bool {
    let pattern = match pattern.as_str() {
        Some(p) => p,
        None => {
            ctx.skip("$regex", "pattern must be a string");
            return false;
        }
    };
    let mut flags = String::new();
    if let Some(opts) = options.and_then(Value::as_str) {
        for c in opts.chars() {
            match c {
                'i' | 'm' | 's' | 'x' => flags.push(c),
                other => {
                    ctx.skip("$options", &format!("unsupported flag '{other}'"));
                    return false;
                }
            }
        }
    }
    let full = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{flags}){pattern}")
    };
    match regex::Regex::new(&full) {
        Ok(re) => field
            .and_then(Value::as_str)
            .map(|s| re.is_match(s))
            .unwrap_or(false),
        Err(e) => {
            ctx.skip("$regex", &format!("invalid pattern: {e}"));
            false
        }
    }
}

fn eval_mod(field: Option<&Value>, operand: &Value, ctx: &mut EvalContext) -> bool {
    let pair = match operand.as_array() {
        Some(a) if a.len() == 2 => a,
        _ => {
            ctx.skip("$mod", "takes [divisor, remainder]");
            return false;
        }
    };
    let (divisor, remainder) = match (pair[0].as_i64(), pair[1].as_i64()) {
        (Some(d), Some(r)) if d != 0 => (d, r),
        _ => {
            ctx.skip("$mod", "divisor and remainder must be integers, divisor non-zero");
            return false;
        }
    };
    match field.and_then(Value::as_f64) {
        Some(n) => (n.trunc() as i64) % divisor == remainder,
        None => false,
    }
}

fn type_matches(field: Option<&Value>, class: &str, ctx: &mut EvalContext) -> bool {
    match class {
        "undefined" => field.is_none(),
        "null" => matches!(field, Some(Value::Null)),
        "bool" => matches!(field, Some(Value::Bool(_))),
        "int" => matches!(field, Some(Value::Number(n)) if n.as_i64().is_some() || n.as_u64().is_some()),
        "double" => matches!(field, Some(Value::Number(n)) if n.as_f64().is_some() && n.as_i64().is_none() && n.as_u64().is_none()),
        "string" => matches!(field, Some(Value::String(_))),
        "array" => matches!(field, Some(Value::Array(_))),
        "object" => matches!(field, Some(Value::Object(_))),
        "date" => field.map(|v| compare::as_date_ms(v).is_some()).unwrap_or(false),
        other => {
            ctx.skip("$type", &format!("unknown type class '{other}'"));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "id": "B",
            "t": 61,
            "c": "2024-06-01T00:00:00.000Z",
            "d": {
                "s": "CI",
                "amt": 120,
                "tags": ["retail", "card"],
                "dt": "2024-05-30T00:00:00Z",
                "ratio": 0.5,
                "note": null
            }
        })
    }

    fn eval(pred: Value) -> bool {
        let mut ctx = EvalContext::new();
        matches(&doc(), &pred, &mut ctx)
    }

    #[test]
    fn test_empty_predicate_matches_everything() {
        assert!(eval(json!({})));
    }

    #[test]
    fn test_plain_equality_and_conjunction() {
        assert!(eval(json!({ "t": 61 })));
        assert!(eval(json!({ "t": 61, "d.s": "CI" })));
        assert!(!eval(json!({ "t": 61, "d.s": "CO" })));
    }

    #[test]
    fn test_plain_key_with_array_means_membership() {
        assert!(eval(json!({ "d.s": ["CI", "CO"] })));
        assert!(!eval(json!({ "d.s": ["CO", "XX"] })));
    }

    #[test]
    fn test_path_resolution_through_arrays() {
        assert!(eval(json!({ "d.tags.0": "retail" })));
        assert!(!eval(json!({ "d.tags.5": "retail" })));
    }

    #[test]
    fn test_ordered_comparisons() {
        assert!(eval(json!({ "d.amt": { "$gt": 100 } })));
        assert!(eval(json!({ "d.amt": { "$gte": 120, "$lte": 120 } })));
        assert!(!eval(json!({ "d.amt": { "$lt": 120 } })));
        // string-number coercion
        assert!(eval(json!({ "d.amt": { "$gt": "99" } })));
        // dates by epoch
        assert!(eval(json!({ "d.dt": { "$lt": "2024-06-01T00:00:00Z" } })));
    }

    #[test]
    fn test_eq_ne_and_missing_fields() {
        assert!(eval(json!({ "d.s": { "$eq": "CI" } })));
        assert!(eval(json!({ "d.s": { "$ne": "CO" } })));
        // $ne matches when the field is missing
        assert!(eval(json!({ "d.absent": { "$ne": "CO" } })));
        // ordered comparison on a missing field never matches
        assert!(!eval(json!({ "d.absent": { "$gt": 0 } })));
    }

    #[test]
    fn test_in_nin() {
        assert!(eval(json!({ "t": { "$in": [60, 61, 62] } })));
        assert!(!eval(json!({ "t": { "$nin": [61] } })));
        assert!(eval(json!({ "d.absent": { "$nin": ["x"] } })));
        // array fields match through their elements
        assert!(eval(json!({ "d.tags": { "$in": ["card"] } })));
    }

    #[test]
    fn test_array_operators() {
        assert!(eval(json!({ "d.tags": { "$all": ["retail", "card"] } })));
        assert!(!eval(json!({ "d.tags": { "$all": ["retail", "online"] } })));
        assert!(eval(json!({ "d.tags": { "$size": 2 } })));
        assert!(!eval(json!({ "d.tags": { "$size": 3 } })));
        assert!(eval(json!({ "d.tags": { "$elemMatch": { "$regex": "^ret" } } })));
    }

    #[test]
    fn test_elem_match_with_document_predicate() {
        let doc = json!({ "d": { "lines": [ { "qty": 1 }, { "qty": 5 } ] } });
        let mut ctx = EvalContext::new();
        assert!(matches(
            &doc,
            &json!({ "d.lines": { "$elemMatch": { "qty": { "$gte": 4 } } } }),
            &mut ctx
        ));
        assert!(!matches(
            &doc,
            &json!({ "d.lines": { "$elemMatch": { "qty": { "$gte": 6 } } } }),
            &mut ctx
        ));
    }

    #[test]
    fn test_regex_with_options() {
        assert!(eval(json!({ "d.s": { "$regex": "^c", "$options": "i" } })));
        assert!(!eval(json!({ "d.s": { "$regex": "^c" } })));
    }

    #[test]
    fn test_logical_operators() {
        assert!(eval(json!({ "$and": [ { "t": 61 }, { "d.s": "CI" } ] })));
        assert!(eval(json!({ "$or": [ { "t": 0 }, { "d.s": "CI" } ] })));
        assert!(!eval(json!({ "$or": [ { "t": 0 }, { "d.s": "CO" } ] })));
        assert!(eval(json!({ "$not": { "d.s": "CO" } })));
        assert!(eval(json!({ "d.amt": { "$not": { "$lt": 100 } } })));
    }

    #[test]
    fn test_exists_is_a_presence_test() {
        assert!(eval(json!({ "d.s": { "$exists": true } })));
        assert!(eval(json!({ "d.absent": { "$exists": false } })));
        // null counts as absent
        assert!(eval(json!({ "d.note": { "$exists": false } })));
    }

    #[test]
    fn test_type_classes() {
        assert!(eval(json!({ "d.s": { "$type": "string" } })));
        assert!(eval(json!({ "d.amt": { "$type": "int" } })));
        assert!(eval(json!({ "d.ratio": { "$type": "double" } })));
        assert!(eval(json!({ "d.tags": { "$type": "array" } })));
        assert!(eval(json!({ "d.note": { "$type": "null" } })));
        assert!(eval(json!({ "d.absent": { "$type": "undefined" } })));
        assert!(eval(json!({ "d.dt": { "$type": "date" } })));
        assert!(eval(json!({ "d": { "$type": "object" } })));
        assert!(!eval(json!({ "d.amt": { "$type": "double" } })));
    }

    #[test]
    fn test_mod() {
        assert!(eval(json!({ "d.amt": { "$mod": [100, 20] } })));
        assert!(!eval(json!({ "d.amt": { "$mod": [100, 0] } })));
    }

    #[test]
    fn test_now_sentinel_in_comparisons() {
        assert!(eval(json!({ "d.dt": { "$lt": "$$NOW" } })));
        assert!(eval(json!({ "c": { "$ne": "$$NOW" } })));
    }

    #[test]
    fn test_date_arithmetic_operand() {
        // dt is before NOW - 1 day (it is in 2024)
        assert!(eval(json!({ "d.dt": { "$lt": {
            "$dateSubtract": { "startDate": "$$NOW", "unit": "day", "amount": 1 }
        } } })));
    }

    #[test]
    fn test_expr_predicate() {
        assert!(eval(json!({ "$expr": { "$gt": ["$d.amt", 100] } })));
        assert!(!eval(json!({ "$expr": { "$gt": ["$d.amt", 200] } })));
    }

    #[test]
    fn test_unsupported_operators_skip_not_crash() {
        let mut ctx = EvalContext::new();
        assert!(!matches(&doc(), &json!({ "$where": "this.t == 61" }), &mut ctx));
        assert_eq!(ctx.skipped.len(), 1);
        assert_eq!(ctx.skipped[0].operator, "$where");

        let mut ctx = EvalContext::new();
        assert!(!matches(
            &doc(),
            &json!({ "d.loc": { "$near": { "x": 0 } } }),
            &mut ctx
        ));
        assert!(!ctx.skipped.is_empty());

        let mut ctx = EvalContext::new();
        assert!(!matches(&doc(), &json!({ "$text": { "$search": "ci" } }), &mut ctx));
        assert!(!ctx.skipped.is_empty());
    }

    #[test]
    fn test_object_literal_equality() {
        let doc = json!({ "d": { "meta": { "a": 1 } } });
        let mut ctx = EvalContext::new();
        assert!(matches(&doc, &json!({ "d.meta": { "a": 1 } }), &mut ctx));
        assert!(!matches(&doc, &json!({ "d.meta": { "a": 2 } }), &mut ctx));
    }
}
