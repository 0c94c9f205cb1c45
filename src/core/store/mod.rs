// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store Gateway: the thin abstraction over the document store.
//!
//! Two collections back the service: `facts` (keyed by fact id) and
//! `factIndex` (`{ h, it, v, i, t, d, c }`, unique on `(h, i)`). Writes are
//! append-only with duplicate tolerance; the one read is the per-fact
//! `$facet` aggregation. `MongoGateway` talks to the cluster;
//! `MemoryGateway` backs the tests with the same contract.

pub mod aggregate;
pub mod memory;
pub mod mongo;
pub mod pool;
pub mod retry;

pub use memory::MemoryGateway;
pub use mongo::MongoGateway;
pub use pool::{PoolMetrics, PoolStatus};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::counter::FacetSpec;
use crate::core::error::CounterdResult;
use crate::core::fact::{Fact, IndexEntry};

/// Name of the fact collection.
pub const FACTS_COLLECTION: &str = "facts";
/// Name of the index collection.
pub const INDEX_COLLECTION: &str = "factIndex";

/// Outcome of a fact insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactInsert {
    Inserted,
    /// A fact with this id already exists; the write was a no-op.
    AlreadyExisted,
}

/// Outcome of an unordered index batch insert. Partial success is normal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexBatchResult {
    pub inserted: usize,
    pub duplicates_ignored: usize,
    pub errors: Vec<String>,
}

/// Observed top-level fields and their value types, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaProbe {
    pub collection: String,
    pub sampled: usize,
    pub fields: BTreeMap<String, BTreeSet<String>>,
}

#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Insert a fact, ignoring a duplicate id.
    async fn insert_fact(&self, fact: &Fact) -> CounterdResult<FactInsert>;

    /// Unordered bulk insert of index entries with duplicate tolerance on
    /// `(h, i)`.
    async fn insert_index_batch(&self, entries: &[IndexEntry])
        -> CounterdResult<IndexBatchResult>;

    /// Run the per-fact `$facet` aggregation over the index collection.
    /// Returns counter name to (possibly empty) result array.
    async fn run_counter_facet(
        &self,
        type_name: &str,
        facet: &FacetSpec,
    ) -> CounterdResult<HashMap<String, Vec<Value>>>;

    /// Idempotently create the secondary indexes the service relies on:
    /// unique `(h, i)` plus helpers `(it, d)`, `(t, d)`, and `(i)`.
    async fn ensure_indexes(&self) -> CounterdResult<()>;

    /// Sample the collections and summarize observed fields and types.
    async fn probe_schema(&self) -> CounterdResult<Vec<SchemaProbe>>;

    /// Connection-pool counters for backpressure decisions.
    fn pool_status(&self) -> PoolStatus;
}

/// Name of a JSON value's type class as reported by the schema probe.
pub(crate) fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.as_i64().is_some() || n.as_u64().is_some() => "int",
        Value::Number(_) => "double",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
