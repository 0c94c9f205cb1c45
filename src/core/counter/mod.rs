// SPDX-License-Identifier: MIT OR Apache-2.0

//! Counter Producer.
//!
//! For a fact: decide which counters apply by evaluating their
//! `computationConditions` locally, synthesize an aggregation pipeline per
//! applicable counter, and assemble one `$facet` document keyed by counter
//! name for the Store Gateway to execute against the index collection.
//!
//! Counter selection is cached per message type: only counters whose type
//! gate admits `fact.t` are re-evaluated per fact.

use dashmap::DashMap;
use log::warn;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::core::config::{CounterCatalog, CounterDef};
use crate::core::fact::Fact;
use crate::core::predicate::{self, EvalContext};

/// The assembled per-fact facet: counter name to pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetSpec(pub Map<String, Value>);

impl FacetSpec {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn counter_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// A matching counter described without being executed. Diagnostic only;
/// the ingest path goes through [`CounterProducer::facet_for`].
#[derive(Debug, Clone, PartialEq)]
pub struct CounterDescriptor {
    pub name: String,
    pub index_type_name: Option<String>,
    pub pipeline: Vec<Value>,
}

#[derive(Debug)]
pub struct CounterProducer {
    catalog: Arc<CounterCatalog>,
    /// Message type to positions of counters whose type gate admits it.
    by_type: DashMap<i64, Arc<Vec<usize>>>,
}

impl CounterProducer {
    pub fn new(catalog: Arc<CounterCatalog>) -> Self {
        Self {
            catalog,
            by_type: DashMap::new(),
        }
    }

    /// Counters whose type gate admits `t`, by catalog position. Populated
    /// lazily; concurrent initializations agree, so losing a race is
    /// harmless.
    fn candidates_for(&self, t: i64) -> Arc<Vec<usize>> {
        self.by_type
            .entry(t)
            .or_insert_with(|| {
                let positions = self
                    .catalog
                    .counters()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| type_gate_admits(&c.computation_conditions, t))
                    .map(|(i, _)| i)
                    .collect();
                Arc::new(positions)
            })
            .clone()
    }

    /// Evaluate the catalog against a fact and assemble the facet.
    ///
    /// Counters whose conditions hit an unsupported operator are skipped
    /// with a warning, never an error.
    pub fn facet_for(&self, fact: &Fact) -> FacetSpec {
        let doc = fact.to_value();
        let mut facets = Map::new();

        for &pos in self.candidates_for(fact.t).iter() {
            let counter = &self.catalog.counters()[pos];
            let mut ctx = EvalContext::new();
            let applies = predicate::matches(&doc, &counter.computation_conditions, &mut ctx);
            for skip in &ctx.skipped {
                warn!(
                    "counter '{}' skipped for fact {}: operator {} ({})",
                    counter.name, fact.id, skip.operator, skip.detail
                );
            }
            if applies && ctx.skipped.is_empty() {
                facets.insert(counter.name.clone(), Value::Array(synth_pipeline(counter)));
            }
        }

        FacetSpec(facets)
    }

    /// The matching counters as raw descriptors, without execution.
    pub fn fact_counters(&self, fact: &Fact) -> Vec<CounterDescriptor> {
        let doc = fact.to_value();
        self.candidates_for(fact.t)
            .iter()
            .filter_map(|&pos| {
                let counter = &self.catalog.counters()[pos];
                let mut ctx = EvalContext::new();
                let applies = predicate::matches(&doc, &counter.computation_conditions, &mut ctx);
                (applies && ctx.skipped.is_empty()).then(|| CounterDescriptor {
                    name: counter.name.clone(),
                    index_type_name: counter.index_type_name.clone(),
                    pipeline: synth_pipeline(counter),
                })
            })
            .collect()
    }
}

/// Up to two stages: `$match` from the evaluation conditions (omitted when
/// empty) and a `$group` with `_id: null` carrying the attribute
/// aggregators.
fn synth_pipeline(counter: &CounterDef) -> Vec<Value> {
    let mut pipeline = Vec::with_capacity(2);

    let has_match = counter
        .evaluation_conditions
        .as_object()
        .map(|m| !m.is_empty())
        .unwrap_or(false);
    if has_match {
        pipeline.push(json!({ "$match": counter.evaluation_conditions }));
    }

    let mut group = Map::with_capacity(counter.attributes.len() + 1);
    group.insert("_id".to_string(), Value::Null);
    for (name, aggregator) in &counter.attributes {
        group.insert(name.clone(), aggregator.clone());
    }
    pipeline.push(Value::Object({
        let mut stage = Map::new();
        stage.insert("$group".to_string(), Value::Object(group));
        stage
    }));

    pipeline
}

/// Conservative static check of a counter's type gate. Recognizes scalar,
/// `$eq`, and `$in` gates on `t` (or the long-name `d.MessageTypeId`
/// equivalent); counters without a recognizable gate are admitted for every
/// type and decided by full evaluation.
fn type_gate_admits(conditions: &Value, t: i64) -> bool {
    let Some(map) = conditions.as_object() else {
        return true;
    };
    for key in ["t", "d.MessageTypeId"] {
        if let Some(gate) = map.get(key) {
            return match gate {
                Value::Number(n) => n.as_i64() == Some(t),
                Value::Array(options) => options.iter().any(|o| o.as_i64() == Some(t)),
                Value::Object(ops) => {
                    let eq_ok = ops
                        .get("$eq")
                        .map(|v| v.as_i64() == Some(t));
                    let in_ok = ops.get("$in").and_then(Value::as_array).map(|options| {
                        options.iter().any(|o| o.as_i64() == Some(t))
                    });
                    match (eq_ok, in_ok) {
                        (None, None) => true, // not a recognizable gate shape
                        (eq, in_) => eq.unwrap_or(true) && in_.unwrap_or(true),
                    }
                }
                _ => true,
            };
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn fact(t: i64, d: Value) -> Fact {
        Fact {
            id: "B".to_string(),
            t,
            c: Utc::now(),
            d: match d {
                Value::Object(m) => m,
                _ => Map::new(),
            },
        }
    }

    fn producer(counters: Value) -> CounterProducer {
        CounterProducer::new(Arc::new(CounterCatalog::from_value(counters).unwrap()))
    }

    #[test]
    fn test_matching_counter_produces_two_stage_pipeline() {
        let p = producer(json!([{
            "name": "C",
            "computationConditions": { "t": 61, "d.s": "CI" },
            "evaluationConditions": { "d.it": { "$in": [1, 2] } },
            "attributes": { "cnt": { "$sum": 1 } }
        }]));
        let facet = p.facet_for(&fact(61, json!({ "s": "CI" })));

        assert_eq!(
            Value::Object(facet.0),
            json!({
                "C": [
                    { "$match": { "d.it": { "$in": [1, 2] } } },
                    { "$group": { "_id": null, "cnt": { "$sum": 1 } } }
                ]
            })
        );
    }

    #[test]
    fn test_empty_match_stage_is_omitted() {
        let p = producer(json!([{
            "name": "C",
            "computationConditions": {},
            "evaluationConditions": {},
            "attributes": { "cnt": { "$sum": 1 } }
        }]));
        let facet = p.facet_for(&fact(61, json!({})));
        assert_eq!(
            facet.0["C"],
            json!([{ "$group": { "_id": null, "cnt": { "$sum": 1 } } }])
        );
    }

    #[test]
    fn test_non_matching_counter_is_absent() {
        let p = producer(json!([{
            "name": "C",
            "computationConditions": { "t": 61, "d.s": "CI" },
            "evaluationConditions": {},
            "attributes": { "cnt": { "$sum": 1 } }
        }]));
        assert!(p.facet_for(&fact(61, json!({ "s": "CO" }))).is_empty());
        assert!(p.facet_for(&fact(62, json!({ "s": "CI" }))).is_empty());
    }

    #[test]
    fn test_type_cache_prunes_gated_counters() {
        let p = producer(json!([
            {
                "name": "only61",
                "computationConditions": { "t": 61 },
                "evaluationConditions": {},
                "attributes": { "cnt": { "$sum": 1 } }
            },
            {
                "name": "in-list",
                "computationConditions": { "t": { "$in": [61, 62] } },
                "evaluationConditions": {},
                "attributes": { "cnt": { "$sum": 1 } }
            },
            {
                "name": "ungated",
                "computationConditions": {},
                "evaluationConditions": {},
                "attributes": { "cnt": { "$sum": 1 } }
            }
        ]));

        assert_eq!(*p.candidates_for(61), vec![0, 1, 2]);
        assert_eq!(*p.candidates_for(62), vec![1, 2]);
        assert_eq!(*p.candidates_for(99), vec![2]);
        // cached
        assert_eq!(*p.candidates_for(61), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsupported_operator_skips_counter() {
        let p = producer(json!([{
            "name": "geo",
            "computationConditions": { "d.loc": { "$geoWithin": {} } },
            "evaluationConditions": {},
            "attributes": { "cnt": { "$sum": 1 } }
        }]));
        assert!(p.facet_for(&fact(61, json!({ "loc": [0, 0] }))).is_empty());
    }

    #[test]
    fn test_fact_counters_descriptors() {
        let p = producer(json!([{
            "name": "C",
            "indexTypeName": "n1",
            "computationConditions": { "t": 61 },
            "evaluationConditions": { "it": 1 },
            "attributes": { "cnt": { "$sum": 1 } }
        }]));
        let descriptors = p.fact_counters(&fact(61, json!({})));
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "C");
        assert_eq!(descriptors[0].index_type_name.as_deref(), Some("n1"));
        assert_eq!(descriptors[0].pipeline.len(), 2);
    }

    #[test]
    fn test_facet_keys_are_counter_names() {
        let p = producer(json!([
            {
                "name": "A",
                "computationConditions": {},
                "evaluationConditions": {},
                "attributes": { "x": { "$sum": 1 } }
            },
            {
                "name": "B",
                "computationConditions": {},
                "evaluationConditions": {},
                "attributes": { "y": { "$max": "$v" } }
            }
        ]));
        let facet = p.facet_for(&fact(1, json!({})));
        let names: Vec<&str> = facet.counter_names().collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
