// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline execution over in-memory documents.
//!
//! Covers exactly what the counter synthesizer emits: an optional `$match`
//! stage followed by a `$group` with `_id: null`. The `$match` stage runs
//! through the local predicate evaluator, which keeps the in-memory gateway
//! faithful to what the store would answer.

use log::warn;
use serde_json::{Map, Value};

use crate::core::error::{CounterdError, CounterdResult};
use crate::core::predicate::{self, compare_values, resolve_path, values_equal, EvalContext};

/// Run a synthesized pipeline over documents, returning the result rows.
pub fn run_pipeline(docs: &[Value], pipeline: &[Value]) -> CounterdResult<Vec<Value>> {
    let mut rows: Vec<Value> = docs.to_vec();

    for stage in pipeline {
        let (op, spec) = single_key(stage).ok_or_else(|| {
            CounterdError::internal(format!("malformed pipeline stage: {stage}"))
        })?;
        match op {
            "$match" => {
                rows.retain(|row| {
                    let mut ctx = EvalContext::new();
                    let keep = predicate::matches(row, spec, &mut ctx);
                    for skip in ctx.skipped {
                        warn!("$match skipped operator {}: {}", skip.operator, skip.detail);
                    }
                    keep
                });
            }
            "$group" => {
                let group = spec.as_object().ok_or_else(|| {
                    CounterdError::internal("$group stage must be an object")
                })?;
                rows = run_group(&rows, group)?;
            }
            other => {
                return Err(CounterdError::internal(format!(
                    "unsupported pipeline stage '{other}'"
                )));
            }
        }
    }

    Ok(rows)
}

fn single_key(v: &Value) -> Option<(&str, &Value)> {
    let map = v.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.iter().next().map(|(k, v)| (k.as_str(), v))
}

/// `$group` with `_id: null`: one output row when there is any input,
/// nothing otherwise.
fn run_group(rows: &[Value], spec: &Map<String, Value>) -> CounterdResult<Vec<Value>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Map::with_capacity(spec.len());
    out.insert("_id".to_string(), spec.get("_id").cloned().unwrap_or(Value::Null));

    for (name, aggregator) in spec {
        if name == "_id" {
            continue;
        }
        out.insert(name.clone(), apply_accumulator(rows, aggregator)?);
    }

    Ok(vec![Value::Object(out)])
}

fn apply_accumulator(rows: &[Value], aggregator: &Value) -> CounterdResult<Value> {
    let (op, arg) = single_key(aggregator).ok_or_else(|| {
        CounterdError::internal(format!("malformed accumulator: {aggregator}"))
    })?;

    match op {
        "$sum" => Ok(sum(rows, arg)),
        "$avg" => Ok(avg(rows, arg)),
        "$min" => Ok(extremum(rows, arg, true)),
        "$max" => Ok(extremum(rows, arg, false)),
        "$addToSet" => Ok(add_to_set(rows, arg)),
        "$push" => Ok(Value::Array(resolved(rows, arg).collect())),
        "$first" => Ok(resolved(rows, arg).next().unwrap_or(Value::Null)),
        "$last" => Ok(resolved(rows, arg).last().unwrap_or(Value::Null)),
        "$count" => Ok(Value::from(rows.len() as i64)),
        other => Err(CounterdError::internal(format!(
            "unsupported accumulator '{other}'"
        ))),
    }
}

/// Resolve the accumulator argument per row: a `$`-prefixed path reads from
/// the row, anything else is a literal. Rows where a path is missing are
/// skipped.
fn resolved<'a>(rows: &'a [Value], arg: &'a Value) -> impl Iterator<Item = Value> + 'a {
    rows.iter().filter_map(move |row| match arg {
        Value::String(s) => match s.strip_prefix('$') {
            Some(path) => resolve_path(row, path).cloned(),
            None => Some(arg.clone()),
        },
        _ => Some(arg.clone()),
    })
}

fn numerics<'a>(rows: &'a [Value], arg: &'a Value) -> impl Iterator<Item = f64> + 'a {
    resolved(rows, arg).filter_map(|v| v.as_f64())
}

/// Non-numeric values are ignored; the empty sum is 0. An all-integer sum
/// stays integral.
fn sum(rows: &[Value], arg: &Value) -> Value {
    let mut int_sum: i64 = 0;
    let mut float_sum: f64 = 0.0;
    let mut use_float = false;

    for v in resolved(rows, arg) {
        if let Some(i) = v.as_i64() {
            if use_float {
                float_sum += i as f64;
            } else {
                match int_sum.checked_add(i) {
                    Some(next) => int_sum = next,
                    None => {
                        use_float = true;
                        float_sum = int_sum as f64 + i as f64;
                    }
                }
            }
        } else if let Some(f) = v.as_f64() {
            if !use_float {
                use_float = true;
                float_sum = int_sum as f64;
            }
            float_sum += f;
        }
    }

    if use_float {
        Value::from(float_sum)
    } else {
        Value::from(int_sum)
    }
}

fn avg(rows: &[Value], arg: &Value) -> Value {
    let mut total = 0.0;
    let mut count = 0usize;
    for n in numerics(rows, arg) {
        total += n;
        count += 1;
    }
    if count == 0 {
        Value::Null
    } else {
        Value::from(total / count as f64)
    }
}

fn extremum(rows: &[Value], arg: &Value, minimum: bool) -> Value {
    let mut best: Option<Value> = None;
    for v in resolved(rows, arg) {
        if v.is_null() {
            continue;
        }
        best = Some(match best {
            None => v,
            Some(current) => match compare_values(&v, &current) {
                Some(ord) if (minimum && ord.is_lt()) || (!minimum && ord.is_gt()) => v,
                _ => current,
            },
        });
    }
    best.unwrap_or(Value::Null)
}

fn add_to_set(rows: &[Value], arg: &Value) -> Value {
    let mut set: Vec<Value> = Vec::new();
    for v in resolved(rows, arg) {
        if !set.iter().any(|existing| values_equal(existing, &v)) {
            set.push(v);
        }
    }
    Value::Array(set)
}
