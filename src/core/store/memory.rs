// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory Store Gateway.
//!
//! Backs the test suites with the production contract: duplicate-tolerant
//! inserts, `(h, i)` uniqueness, and `$facet` execution through the local
//! predicate evaluator and accumulator set.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use super::{
    aggregate, json_type_name, FactInsert, IndexBatchResult, PoolStatus, SchemaProbe,
    StoreGateway, FACTS_COLLECTION, INDEX_COLLECTION,
};
use crate::core::counter::FacetSpec;
use crate::core::error::{CounterdError, CounterdResult};
use crate::core::fact::{Fact, IndexEntry};

#[derive(Debug, Default)]
pub struct MemoryGateway {
    facts: RwLock<HashMap<String, Fact>>,
    entries: RwLock<Vec<IndexEntry>>,
    index_keys: RwLock<HashSet<(String, String)>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fact_count(&self) -> usize {
        self.facts.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn index_entries(&self) -> Vec<IndexEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    fn lock_poisoned() -> CounterdError {
        CounterdError::internal("memory store lock poisoned")
    }
}

#[async_trait]
impl StoreGateway for MemoryGateway {
    async fn insert_fact(&self, fact: &Fact) -> CounterdResult<FactInsert> {
        let mut facts = self.facts.write().map_err(|_| Self::lock_poisoned())?;
        if facts.contains_key(&fact.id) {
            return Ok(FactInsert::AlreadyExisted);
        }
        facts.insert(fact.id.clone(), fact.clone());
        Ok(FactInsert::Inserted)
    }

    async fn insert_index_batch(
        &self,
        entries: &[IndexEntry],
    ) -> CounterdResult<IndexBatchResult> {
        let mut keys = self.index_keys.write().map_err(|_| Self::lock_poisoned())?;
        let mut stored = self.entries.write().map_err(|_| Self::lock_poisoned())?;

        let mut result = IndexBatchResult::default();
        for entry in entries {
            if keys.insert((entry.h.clone(), entry.i.clone())) {
                stored.push(entry.clone());
                result.inserted += 1;
            } else {
                result.duplicates_ignored += 1;
            }
        }
        Ok(result)
    }

    async fn run_counter_facet(
        &self,
        _type_name: &str,
        facet: &FacetSpec,
    ) -> CounterdResult<HashMap<String, Vec<Value>>> {
        let docs: Vec<Value> = self
            .entries
            .read()
            .map_err(|_| Self::lock_poisoned())?
            .iter()
            .map(IndexEntry::to_value)
            .collect();

        let mut results = HashMap::with_capacity(facet.0.len());
        for (name, pipeline) in &facet.0 {
            let stages = pipeline.as_array().ok_or_else(|| {
                CounterdError::internal(format!("facet '{name}' pipeline is not an array"))
            })?;
            results.insert(name.clone(), aggregate::run_pipeline(&docs, stages)?);
        }
        Ok(results)
    }

    async fn ensure_indexes(&self) -> CounterdResult<()> {
        // uniqueness of (h, i) is enforced structurally
        Ok(())
    }

    async fn probe_schema(&self) -> CounterdResult<Vec<SchemaProbe>> {
        let facts = self.facts.read().map_err(|_| Self::lock_poisoned())?;
        let entries = self.entries.read().map_err(|_| Self::lock_poisoned())?;

        let mut probes = Vec::with_capacity(2);
        probes.push(probe_docs(
            FACTS_COLLECTION,
            facts.values().map(Fact::to_value),
        ));
        probes.push(probe_docs(
            INDEX_COLLECTION,
            entries.iter().map(IndexEntry::to_value),
        ));
        Ok(probes)
    }

    fn pool_status(&self) -> PoolStatus {
        PoolStatus::default()
    }
}

fn probe_docs(collection: &str, docs: impl Iterator<Item = Value>) -> SchemaProbe {
    let mut fields: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut sampled = 0;
    for doc in docs {
        sampled += 1;
        if let Value::Object(map) = doc {
            for (key, value) in map {
                fields
                    .entry(key)
                    .or_default()
                    .insert(json_type_name(&value).to_string());
            }
        }
    }
    SchemaProbe {
        collection: collection.to_string(),
        sampled,
        fields,
    }
}
