// SPDX-License-Identifier: MIT OR Apache-2.0

//! Properties of the counter path: local evaluation agrees with the store's
//! `$match`, `$$NOW` and the date arithmetic behave at the boundaries, and
//! the facet output shape matches what the gateway returns.

use chrono::{Duration, Utc};
use counterd::core::counter::{CounterProducer, FacetSpec};
use counterd::core::config::CounterCatalog;
use counterd::core::fact::{rfc3339_millis, Fact, IndexEntry};
use counterd::core::predicate::{self, date_add, DateUnit, EvalContext};
use counterd::core::store::{MemoryGateway, StoreGateway, INDEX_COLLECTION};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn entry(h: &str, i: &str, it: i64, v: Value, d: chrono::DateTime<Utc>) -> IndexEntry {
    IndexEntry {
        h: h.to_string(),
        it,
        v,
        i: i.to_string(),
        t: 61,
        d,
        c: d,
    }
}

/// For every supported predicate, evaluating locally against a document must
/// agree with running the same predicate as a `$match` over a singleton
/// collection holding that document.
#[tokio::test]
async fn local_evaluator_agrees_with_store_match() {
    let now = Utc::now();
    let doc_entry = entry("h1", "A", 1, json!(250), now - Duration::days(3));
    let doc = doc_entry.to_value();

    let predicates = vec![
        json!({}),
        json!({ "it": 1 }),
        json!({ "it": { "$in": [1, 2] } }),
        json!({ "it": { "$nin": [3] } }),
        json!({ "v": { "$gte": 100, "$lte": 300 } }),
        json!({ "i": { "$regex": "^a", "$options": "i" } }),
        json!({ "t": { "$mod": [2, 1] } }),
        json!({ "d": { "$lt": "$$NOW" } }),
        json!({ "missing": { "$exists": false } }),
        json!({ "v": { "$type": "int" } }),
        json!({ "$or": [ { "it": 9 }, { "i": "A" } ] }),
        json!({ "$expr": { "$gte": [
            "$d",
            { "$dateSubtract": { "startDate": "$$NOW", "unit": "day", "amount": 7 } }
        ] } }),
        json!({ "it": 2 }),
        json!({ "v": { "$gt": 900 } }),
    ];

    let store = MemoryGateway::new();
    store.insert_index_batch(&[doc_entry]).await.unwrap();

    for predicate in predicates {
        let mut ctx = EvalContext::new();
        let local = predicate::matches(&doc, &predicate, &mut ctx);

        let mut facet = Map::new();
        facet.insert(
            "probe".to_string(),
            json!([
                { "$match": predicate },
                { "$group": { "_id": null, "cnt": { "$sum": 1 } } }
            ]),
        );
        let results = store
            .run_counter_facet(INDEX_COLLECTION, &FacetSpec(facet))
            .await
            .unwrap();
        let store_matched = !results["probe"].is_empty();

        assert_eq!(
            local, store_matched,
            "evaluator and store disagree on {predicate}"
        );
    }
}

#[test]
fn now_sentinel_has_millisecond_resolution() {
    let ctx = EvalContext::new();
    // truncated to the millisecond: no sub-millisecond component
    assert_eq!(ctx.now.timestamp_subsec_nanos() % 1_000_000, 0);
}

#[test]
fn month_end_arithmetic_boundary() {
    let jan31 = chrono::DateTime::parse_from_rfc3339("2024-01-31T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    assert_eq!(
        rfc3339_millis::format(&date_add(jan31, DateUnit::Month, 1)),
        "2024-02-29T00:00:00.000Z"
    );
}

#[tokio::test]
async fn facet_results_cover_every_requested_counter() {
    let catalog = CounterCatalog::from_value(json!([
        {
            "name": "with_matches",
            "computationConditions": {},
            "evaluationConditions": { "it": 1 },
            "attributes": { "cnt": { "$sum": 1 }, "total": { "$sum": "$v" } }
        },
        {
            "name": "without_matches",
            "computationConditions": {},
            "evaluationConditions": { "it": 9 },
            "attributes": { "cnt": { "$sum": 1 } }
        }
    ]))
    .unwrap();
    let producer = CounterProducer::new(Arc::new(catalog));

    let fact = Fact {
        id: "A".to_string(),
        t: 61,
        c: Utc::now(),
        d: Map::new(),
    };
    let facet = producer.facet_for(&fact);
    assert_eq!(facet.counter_names().count(), 2);

    let store = MemoryGateway::new();
    let now = Utc::now();
    store
        .insert_index_batch(&[
            entry("h1", "A", 1, json!(10), now),
            entry("h2", "B", 1, json!(15), now),
        ])
        .await
        .unwrap();

    let results = store.run_counter_facet(INDEX_COLLECTION, &facet).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results["with_matches"][0]["cnt"], json!(2));
    assert_eq!(results["with_matches"][0]["total"], json!(25));
    assert!(results["without_matches"].is_empty());
}

#[test]
fn unsupported_operators_skip_the_counter_without_failing() {
    let catalog = CounterCatalog::from_value(json!([{
        "name": "geo",
        "computationConditions": { "d.loc": { "$geoWithin": { "$centerSphere": [[0, 0], 1] } } },
        "evaluationConditions": {},
        "attributes": { "cnt": { "$sum": 1 } }
    }]))
    .unwrap();
    let producer = CounterProducer::new(Arc::new(catalog));
    let fact = Fact {
        id: "A".to_string(),
        t: 61,
        c: Utc::now(),
        d: {
            let mut d = Map::new();
            d.insert("loc".to_string(), json!([0.5, 0.5]));
            d
        },
    };
    assert!(producer.facet_for(&fact).is_empty());
    assert!(producer.fact_counters(&fact).is_empty());
}
