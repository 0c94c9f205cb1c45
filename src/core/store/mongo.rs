// SPDX-License-Identifier: MIT OR Apache-2.0

//! MongoDB-backed Store Gateway.
//!
//! Duplicate tolerance relies on the store's unique keys: `_id` on `facts`
//! (the fact id) and the unique `(h, i)` compound on `factIndex`. Transient
//! driver errors are retried with bounded exponential backoff; the request
//! deadline is enforced by the caller around every gateway call.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use log::{info, warn};
use mongodb::error::{Error as DriverError, ErrorKind, WriteFailure};
use mongodb::event::cmap::{
    CmapEventHandler, ConnectionCheckedInEvent, ConnectionCheckedOutEvent,
    ConnectionCheckoutFailedEvent, ConnectionCheckoutStartedEvent, PoolClearedEvent,
    PoolClosedEvent, PoolCreatedEvent, PoolReadyEvent,
};
use mongodb::options::{ClientOptions, FindOptions, IndexOptions, InsertManyOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::{
    json_type_name, FactInsert, IndexBatchResult, PoolMetrics, PoolStatus, RetryPolicy,
    SchemaProbe, StoreGateway, FACTS_COLLECTION, INDEX_COLLECTION,
};
use crate::core::config::Settings;
use crate::core::counter::FacetSpec;
use crate::core::error::{CounterdError, CounterdResult};
use crate::core::fact::{Fact, IndexEntry};

const DUPLICATE_KEY: i32 = 11000;
const SCHEMA_PROBE_SAMPLE: i64 = 200;

struct PoolMetricsHandler {
    observer: Arc<PoolMetrics>,
}

impl CmapEventHandler for PoolMetricsHandler {
    fn handle_pool_created_event(&self, _event: PoolCreatedEvent) {
        self.observer.on_pool_created();
    }

    fn handle_pool_ready_event(&self, _event: PoolReadyEvent) {
        self.observer.on_pool_ready();
    }

    fn handle_pool_cleared_event(&self, _event: PoolClearedEvent) {
        self.observer.on_pool_cleared();
    }

    fn handle_pool_closed_event(&self, _event: PoolClosedEvent) {
        self.observer.on_pool_closed();
    }

    fn handle_connection_checkout_started_event(&self, _event: ConnectionCheckoutStartedEvent) {
        self.observer.on_checkout_started();
    }

    fn handle_connection_checkout_failed_event(&self, _event: ConnectionCheckoutFailedEvent) {
        self.observer.on_checkout_failed();
    }

    fn handle_connection_checked_out_event(&self, _event: ConnectionCheckedOutEvent) {
        self.observer.on_checked_out();
    }

    fn handle_connection_checked_in_event(&self, _event: ConnectionCheckedInEvent) {
        self.observer.on_checked_in();
    }
}

pub struct MongoGateway {
    facts: Collection<Document>,
    index: Collection<Document>,
    db: Database,
    metrics: Arc<PoolMetrics>,
    retry: RetryPolicy,
}

impl MongoGateway {
    /// Connect, wire up pool-event accounting, and fail fast if the store
    /// is unreachable.
    pub async fn connect(settings: &Settings) -> CounterdResult<Self> {
        let mut options = ClientOptions::parse(&settings.store_uri)
            .await
            .map_err(|e| {
                CounterdError::config_invalid("settings", format!("store URI: {e}"))
            })?;
        options.app_name = Some("counterd".to_string());

        let metrics = Arc::new(PoolMetrics::new());
        let observer = Arc::clone(&metrics);
        options.cmap_event_handler =
            Some(Arc::new(PoolMetricsHandler { observer }) as Arc<dyn CmapEventHandler>);

        let client = Client::with_options(options)
            .map_err(|e| CounterdError::config_invalid("settings", format!("store client: {e}")))?;
        let db = client.database(&settings.database);

        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                CounterdError::transient_with_source("store unreachable at startup", Box::new(e))
            })?;
        info!("connected to document store, database '{}'", settings.database);

        Ok(Self {
            facts: db.collection::<Document>(FACTS_COLLECTION),
            index: db.collection::<Document>(INDEX_COLLECTION),
            db,
            metrics,
            retry: RetryPolicy::default(),
        })
    }
}

#[async_trait]
impl StoreGateway for MongoGateway {
    async fn insert_fact(&self, fact: &Fact) -> CounterdResult<FactInsert> {
        let mut doc = to_document("fact", fact)?;
        doc.insert("_id", fact.id.clone());

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.facts.insert_one(doc.clone(), None).await {
                Ok(_) => return Ok(FactInsert::Inserted),
                Err(e) if duplicate_write(&e) => return Ok(FactInsert::AlreadyExisted),
                Err(e) if is_transient(&e) && attempt < self.retry.max_attempts => {
                    self.backoff("insert_fact", attempt, &e).await;
                }
                Err(e) => return Err(classify("insert_fact", attempt, e)),
            }
        }
    }

    async fn insert_index_batch(
        &self,
        entries: &[IndexEntry],
    ) -> CounterdResult<IndexBatchResult> {
        if entries.is_empty() {
            return Ok(IndexBatchResult::default());
        }
        let docs = entries
            .iter()
            .map(|e| to_document("index entry", e))
            .collect::<CounterdResult<Vec<_>>>()?;
        let options = InsertManyOptions::builder().ordered(false).build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .index
                .insert_many(docs.clone(), options.clone())
                .await
            {
                Ok(outcome) => {
                    return Ok(IndexBatchResult {
                        inserted: outcome.inserted_ids.len(),
                        duplicates_ignored: 0,
                        errors: Vec::new(),
                    });
                }
                Err(e) => {
                    if let ErrorKind::BulkWrite(failure) = &*e.kind {
                        let failed: Vec<(usize, i32, String)> = failure
                            .write_errors
                            .as_deref()
                            .unwrap_or(&[])
                            .iter()
                            .map(|we| (we.index, we.code, we.message.clone()))
                            .collect();
                        return Ok(triage_bulk(entries.len(), &failed));
                    }
                    if is_transient(&e) && attempt < self.retry.max_attempts {
                        self.backoff("insert_index_batch", attempt, &e).await;
                        continue;
                    }
                    return Err(classify("insert_index_batch", attempt, e));
                }
            }
        }
    }

    async fn run_counter_facet(
        &self,
        type_name: &str,
        facet: &FacetSpec,
    ) -> CounterdResult<HashMap<String, Vec<Value>>> {
        let mut facet_doc = Document::new();
        for (name, pipeline) in &facet.0 {
            facet_doc.insert(name.clone(), json_to_bson(pipeline));
        }
        let pipeline = vec![doc! { "$facet": facet_doc }];

        let mut attempt = 0;
        let result_doc = loop {
            attempt += 1;
            let run = async {
                let mut cursor = self.index.aggregate(pipeline.clone(), None).await?;
                cursor.try_next().await
            };
            match run.await {
                Ok(doc) => break doc,
                Err(e) if is_transient(&e) && attempt < self.retry.max_attempts => {
                    self.backoff("run_counter_facet", attempt, &e).await;
                }
                Err(e) => return Err(classify("run_counter_facet", attempt, e)),
            }
        };

        let mut results: HashMap<String, Vec<Value>> = facet
            .counter_names()
            .map(|name| (name.to_string(), Vec::new()))
            .collect();
        if let Some(doc) = result_doc {
            for (name, value) in doc {
                let rows = match value {
                    Bson::Array(items) => items.iter().map(bson_to_json).collect(),
                    other => vec![bson_to_json(&other)],
                };
                results.insert(name, rows);
            }
        } else {
            warn!("{type_name}: facet aggregation returned no document");
        }
        Ok(results)
    }

    async fn ensure_indexes(&self) -> CounterdResult<()> {
        let models = vec![
            IndexModel::builder()
                .keys(doc! { "h": 1, "i": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            IndexModel::builder().keys(doc! { "it": 1, "d": 1 }).build(),
            IndexModel::builder().keys(doc! { "t": 1, "d": 1 }).build(),
            IndexModel::builder().keys(doc! { "i": 1 }).build(),
        ];

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.index.create_indexes(models.clone(), None).await {
                Ok(_) => return Ok(()),
                Err(e) if is_transient(&e) && attempt < self.retry.max_attempts => {
                    self.backoff("ensure_indexes", attempt, &e).await;
                }
                Err(e) => return Err(classify("ensure_indexes", attempt, e)),
            }
        }
    }

    async fn probe_schema(&self) -> CounterdResult<Vec<SchemaProbe>> {
        let mut probes = Vec::with_capacity(2);
        for (name, coll) in [(FACTS_COLLECTION, &self.facts), (INDEX_COLLECTION, &self.index)] {
            let options = FindOptions::builder().limit(SCHEMA_PROBE_SAMPLE).build();
            let mut cursor = coll
                .find(None, options)
                .await
                .map_err(|e| classify("probe_schema", 1, e))?;

            let mut fields: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            let mut sampled = 0;
            while let Some(doc) = cursor
                .try_next()
                .await
                .map_err(|e| classify("probe_schema", 1, e))?
            {
                sampled += 1;
                for (key, value) in doc {
                    fields
                        .entry(key)
                        .or_default()
                        .insert(json_type_name(&bson_to_json(&value)).to_string());
                }
            }
            probes.push(SchemaProbe {
                collection: name.to_string(),
                sampled,
                fields,
            });
        }
        Ok(probes)
    }

    fn pool_status(&self) -> PoolStatus {
        self.metrics.snapshot()
    }
}

impl MongoGateway {
    async fn backoff(&self, op: &str, attempt: usize, e: &DriverError) {
        let delay = self.retry.delay_for(attempt);
        warn!("{op}: transient store error on attempt {attempt}: {e}; retrying in {delay:?}");
        tokio::time::sleep(delay).await;
    }

    /// The database handle, for diagnostics commands.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn to_document<T: serde::Serialize>(what: &str, value: &T) -> CounterdResult<Document> {
    bson::to_document(value)
        .map_err(|e| CounterdError::internal(format!("cannot serialize {what}: {e}")))
}

fn duplicate_write(e: &DriverError) -> bool {
    matches!(
        &*e.kind,
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY
    )
}

fn is_transient(e: &DriverError) -> bool {
    matches!(
        &*e.kind,
        ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
    )
}

fn classify(op: &str, attempts: usize, e: DriverError) -> CounterdError {
    if is_transient(&e) {
        CounterdError::transient_with_source(
            format!("{op} failed after {attempts} attempts"),
            Box::new(e),
        )
    } else {
        CounterdError::internal_with_source(format!("{op} failed"), Box::new(e))
    }
}

/// Split per-write failures of an unordered bulk insert into ignored
/// duplicates and real errors. Partial success is the normal case.
fn triage_bulk(total: usize, failed: &[(usize, i32, String)]) -> IndexBatchResult {
    let mut duplicates_ignored = 0;
    let mut errors = Vec::new();
    for (index, code, message) in failed {
        if *code == DUPLICATE_KEY {
            duplicates_ignored += 1;
        } else {
            errors.push(format!("entry {index}: {message} ({code})"));
        }
    }
    IndexBatchResult {
        inserted: total.saturating_sub(failed.len()),
        duplicates_ignored,
        errors,
    }
}

fn json_to_bson(v: &Value) -> Bson {
    match v {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                n.as_f64().map(Bson::Double).unwrap_or(Bson::Null)
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut doc = Document::new();
            for (k, val) in map {
                doc.insert(k.clone(), json_to_bson(val));
            }
            Bson::Document(doc)
        }
    }
}

fn bson_to_json(b: &Bson) -> Value {
    match b {
        Bson::Null => Value::Null,
        Bson::Boolean(v) => Value::Bool(*v),
        Bson::Int32(v) => Value::from(*v),
        Bson::Int64(v) => Value::from(*v),
        Bson::Double(v) => Value::from(*v),
        Bson::String(v) => Value::String(v.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_json(v)))
                .collect(),
        ),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or(Value::Null),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        other => Value::String(other.to_string()),
    }
}
