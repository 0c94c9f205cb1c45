// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingest Orchestrator.
//!
//! Per-request pipeline: Received → Validated → FactPersisted →
//! IndicesPersisted → CountersEvaluated → Responded. Writes are sequential
//! and fully ordered within a request; counter evaluation never starts
//! before both writes are acknowledged, so a reader never observes an index
//! entry without its fact. Requests carry a deadline observed at every
//! suspension point; partial progress already persisted stays in place
//! (writes are idempotent under the store's deduplication).

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::core::config::{Catalogs, IndexCatalog, Settings};
use crate::core::counter::CounterProducer;
use crate::core::error::{CounterdError, CounterdResult};
use crate::core::fact::normalizer::BatchWarning;
use crate::core::fact::{derive_entries, Fact, Normalizer};
use crate::core::store::{FactInsert, PoolStatus, StoreGateway, INDEX_COLLECTION};

/// Elapsed time per pipeline phase, reported with every response.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestTimings {
    pub total_ms: u64,
    pub fact_write_ms: u64,
    pub index_write_ms: u64,
    pub counters_ms: u64,
}

/// The per-request result: the fact id, phase timings, and the per-counter
/// result arrays.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub id: String,
    pub timings: IngestTimings,
    pub counters: HashMap<String, Vec<Value>>,
}

/// Outcome of a batch ingest: per-fact responses plus the messages dropped
/// along the way.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub responses: Vec<IngestResponse>,
    pub warnings: Vec<String>,
}

/// Watermark backpressure with hysteresis: engages after the pool stays
/// saturated past the window, releases once checked-out connections recede
/// below the low-water mark.
#[derive(Debug)]
pub struct OverloadGate {
    high_water: u32,
    low_water: u32,
    window: Duration,
    engaged: AtomicBool,
    saturated_since: Mutex<Option<Instant>>,
}

impl OverloadGate {
    pub fn new(high_water: u32, low_water: u32, window: Duration) -> Self {
        Self {
            high_water,
            low_water,
            window,
            engaged: AtomicBool::new(false),
            saturated_since: Mutex::new(None),
        }
    }

    /// Whether a new ingest must be refused given the current pool state.
    pub fn should_refuse(&self, status: &PoolStatus) -> bool {
        let mut saturated_since = match self.saturated_since.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };

        if self.engaged.load(Ordering::Acquire) {
            if status.checked_out <= self.low_water {
                self.engaged.store(false, Ordering::Release);
                *saturated_since = None;
                return false;
            }
            return true;
        }

        if status.checked_out >= self.high_water {
            let since = saturated_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= self.window {
                self.engaged.store(true, Ordering::Release);
                return true;
            }
        } else {
            *saturated_since = None;
        }
        false
    }
}

pub struct IngestOrchestrator {
    normalizer: Normalizer,
    indexes: Arc<IndexCatalog>,
    producer: CounterProducer,
    gateway: Arc<dyn StoreGateway>,
    deadline: Duration,
    gate: OverloadGate,
}

impl IngestOrchestrator {
    pub fn new(catalogs: &Catalogs, gateway: Arc<dyn StoreGateway>, settings: &Settings) -> Self {
        Self {
            normalizer: Normalizer::new(&catalogs.fields, Arc::clone(&catalogs.mapper)),
            indexes: Arc::clone(&catalogs.indexes),
            producer: CounterProducer::new(Arc::clone(&catalogs.counters)),
            gateway,
            deadline: settings.default_deadline,
            gate: OverloadGate::new(
                settings.pool_high_water,
                settings.pool_low_water,
                settings.pool_saturation_window,
            ),
        }
    }

    /// The counter producer, for diagnostics surfaces.
    pub fn producer(&self) -> &CounterProducer {
        &self.producer
    }

    /// The store gateway, for diagnostics surfaces.
    pub fn gateway(&self) -> &Arc<dyn StoreGateway> {
        &self.gateway
    }

    /// Ingest one message.
    pub async fn ingest(&self, message_type: i64, body: &Value) -> CounterdResult<IngestResponse> {
        let start = Instant::now();
        let deadline = start + self.deadline;

        if self.gate.should_refuse(&self.gateway.pool_status()) {
            return Err(CounterdError::overloaded(
                "connection pool saturated past the high-water mark",
            ));
        }

        let fact = self.normalizer.normalize(message_type, body)?;
        self.run_pipeline(fact, start, deadline).await
    }

    /// Ingest a batch: a bad message is dropped with a warning and the rest
    /// proceed.
    pub async fn ingest_batch(
        &self,
        message_type: i64,
        bodies: &[Value],
    ) -> CounterdResult<BatchOutcome> {
        let start = Instant::now();
        let deadline = start + self.deadline;

        if self.gate.should_refuse(&self.gateway.pool_status()) {
            return Err(CounterdError::overloaded(
                "connection pool saturated past the high-water mark",
            ));
        }

        let (facts, dropped) = self.normalizer.normalize_batch(message_type, bodies);
        let mut warnings: Vec<String> = dropped
            .iter()
            .map(|BatchWarning { position, reason }| format!("message {position}: {reason}"))
            .collect();

        let mut responses = Vec::with_capacity(facts.len());
        for fact in facts {
            let id = fact.id.clone();
            match self.run_pipeline(fact, Instant::now(), deadline).await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    warn!("dropping fact {id} from batch: {e}");
                    warnings.push(format!("fact {id}: {e}"));
                }
            }
        }

        Ok(BatchOutcome {
            responses,
            warnings,
        })
    }

    async fn run_pipeline(
        &self,
        fact: Fact,
        start: Instant,
        deadline: Instant,
    ) -> CounterdResult<IngestResponse> {
        let (entries, index_warnings) = derive_entries(&self.indexes, &fact);
        for w in &index_warnings {
            warn!(
                "fact {}: index rule '{}' skipped: {}",
                w.fact_id, w.index_type_name, w.reason
            );
        }

        let phase = Instant::now();
        let written = self
            .bounded(deadline, "fact write", self.gateway.insert_fact(&fact))
            .await?;
        if written == FactInsert::AlreadyExisted {
            debug!("fact {} already existed; write was a no-op", fact.id);
        }
        let fact_write_ms = phase.elapsed().as_millis() as u64;

        let phase = Instant::now();
        let batch = self
            .bounded(
                deadline,
                "index write",
                self.gateway.insert_index_batch(&entries),
            )
            .await?;
        for error in &batch.errors {
            warn!("fact {}: index write error: {error}", fact.id);
        }
        let index_write_ms = phase.elapsed().as_millis() as u64;

        // both writes acknowledged; counters may now observe the fact
        let phase = Instant::now();
        let facet = self.producer.facet_for(&fact);
        let counters = if facet.is_empty() {
            HashMap::new()
        } else {
            self.bounded(
                deadline,
                "counter evaluation",
                self.gateway.run_counter_facet(INDEX_COLLECTION, &facet),
            )
            .await?
        };
        let counters_ms = phase.elapsed().as_millis() as u64;

        Ok(IngestResponse {
            id: fact.id,
            timings: IngestTimings {
                total_ms: start.elapsed().as_millis() as u64,
                fact_write_ms,
                index_write_ms,
                counters_ms,
            },
            counters,
        })
    }

    /// Run a gateway call under the request deadline. Expiry cancels the
    /// outstanding call and surfaces as `Overloaded`; a `Conflict` from the
    /// gateway is not an error at this level.
    async fn bounded<T>(
        &self,
        deadline: Instant,
        stage: &str,
        fut: impl std::future::Future<Output = CounterdResult<T>>,
    ) -> CounterdResult<T> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CounterdError::overloaded(format!(
                "request deadline exceeded before {stage}"
            )));
        }
        match tokio::time::timeout(remaining, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) if e.is_transient() => Err(CounterdError::overloaded(format!(
                "{stage} kept failing within the deadline: {e}"
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CounterdError::overloaded(format!(
                "request deadline exceeded during {stage}"
            ))),
        }
    }
}
