// SPDX-License-Identifier: MIT OR Apache-2.0

//! Counter Catalog: the aggregation counters evaluated on every ingest.
//!
//! `computation_conditions` is evaluated locally against the fact to decide
//! whether a counter applies; `evaluation_conditions` becomes the `$match`
//! stage of the counter's synthesized pipeline; `attributes` maps output
//! attribute names to aggregator expressions for the `$group` stage.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::core::error::{CounterdError, CounterdResult};
use crate::core::mapper::FieldNameMapper;

const CATALOG: &str = "counter";

/// One counter definition.
#[derive(Debug, Clone, Deserialize)]
pub struct CounterDef {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(rename = "indexTypeName", default)]
    pub index_type_name: Option<String>,
    #[serde(rename = "computationConditions")]
    pub computation_conditions: Value,
    #[serde(rename = "evaluationConditions")]
    pub evaluation_conditions: Value,
    pub attributes: Map<String, Value>,
}

/// The loaded, validated counter catalog.
#[derive(Debug, Clone)]
pub struct CounterCatalog {
    counters: Vec<CounterDef>,
}

impl CounterCatalog {
    /// Parse and validate a catalog from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` when a counter is missing its name, either
    /// condition tree is not an object, the attribute map is empty, or a
    /// counter name repeats (facet keys must be unique).
    pub fn from_value(v: Value) -> CounterdResult<Self> {
        let counters: Vec<CounterDef> = serde_json::from_value(v)
            .map_err(|e| CounterdError::config_invalid(CATALOG, e.to_string()))?;

        let mut names: HashSet<&str> = HashSet::new();
        for c in &counters {
            let invalid =
                |msg: String| CounterdError::config_invalid_entry(CATALOG, &c.name, msg);

            if c.name.is_empty() {
                return Err(CounterdError::config_invalid(
                    CATALOG,
                    "counter name must be a non-empty string",
                ));
            }
            if !c.computation_conditions.is_object() {
                return Err(invalid("computationConditions must be an object".into()));
            }
            if !c.evaluation_conditions.is_object() {
                return Err(invalid("evaluationConditions must be an object".into()));
            }
            if c.attributes.is_empty() {
                return Err(invalid("attributes must be a non-empty map".into()));
            }
            if !names.insert(c.name.as_str()) {
                return Err(invalid("duplicate counter name".into()));
            }
        }

        Ok(Self { counters })
    }

    /// Parse and validate a catalog from a JSON string.
    pub fn from_json(json: &str) -> CounterdResult<Self> {
        let v: Value = serde_json::from_str(json)
            .map_err(|e| CounterdError::config_invalid(CATALOG, e.to_string()))?;
        Self::from_value(v)
    }

    /// Rewrite every counter's conditions and attributes through the mapper
    /// (long names to wire names). Applied once at load when short-name mode
    /// is enabled, so the ingest path only ever sees wire names.
    pub fn rewritten(self, mapper: &FieldNameMapper) -> Self {
        let counters = self
            .counters
            .into_iter()
            .map(|c| {
                let CounterDef {
                    name,
                    comment,
                    index_type_name,
                    computation_conditions,
                    evaluation_conditions,
                    attributes,
                } = c;
                let attributes =
                    match mapper.transform_attributes(&Value::Object(attributes)) {
                        Value::Object(m) => m,
                        _ => Map::new(),
                    };
                CounterDef {
                    name,
                    comment,
                    index_type_name,
                    computation_conditions: mapper.transform_condition(&computation_conditions),
                    evaluation_conditions: mapper.transform_condition(&evaluation_conditions),
                    attributes,
                }
            })
            .collect();
        Self { counters }
    }

    pub fn counters(&self) -> &[CounterDef] {
        &self.counters
    }
}
