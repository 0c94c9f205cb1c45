// SPDX-License-Identifier: MIT OR Apache-2.0

//! Catalog loading and validation.
//!
//! Three declarative catalogs (fields, indexes, counters) are read once at
//! startup, validated, and exposed as immutable views. Validation failure is
//! fatal: the process must not start on a bad catalog.

pub mod counter_catalog;
pub mod field_catalog;
pub mod index_catalog;
pub mod settings;

pub use counter_catalog::{CounterCatalog, CounterDef};
pub use field_catalog::{FieldCatalog, FieldSpec, GeneratorKind, GeneratorSpec};
pub use index_catalog::{IndexCatalog, IndexRule, IndexValueKind};
pub use settings::Settings;

use std::path::Path;
use std::sync::Arc;

use crate::core::error::{CounterdError, CounterdResult};
use crate::core::mapper::FieldNameMapper;

/// The immutable catalog views shared by the rest of the service.
///
/// When short-name mode is enabled the counter catalog has already been
/// rewritten to wire names here; nothing downstream consults long names.
#[derive(Debug, Clone)]
pub struct Catalogs {
    pub fields: Arc<FieldCatalog>,
    pub indexes: Arc<IndexCatalog>,
    pub counters: Arc<CounterCatalog>,
    pub mapper: Arc<FieldNameMapper>,
}

impl Catalogs {
    /// Build the catalog views from already-parsed JSON values.
    pub fn from_values(
        fields: serde_json::Value,
        indexes: serde_json::Value,
        counters: serde_json::Value,
        short_names: bool,
    ) -> CounterdResult<Self> {
        let fields = FieldCatalog::from_value(fields, short_names)?;
        let mapper = FieldNameMapper::from_catalog(&fields, short_names)?;
        let indexes = IndexCatalog::from_value(indexes)?;
        let mut counters = CounterCatalog::from_value(counters)?;
        if short_names {
            counters = counters.rewritten(&mapper);
        }
        Ok(Self {
            fields: Arc::new(fields),
            indexes: Arc::new(indexes),
            counters: Arc::new(counters),
            mapper: Arc::new(mapper),
        })
    }

    /// Load the three catalog files from disk.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for unreadable files, malformed JSON, or any
    /// validation failure; callers exit non-zero on this at startup.
    pub fn load_from_files(
        field_path: &Path,
        index_path: &Path,
        counter_path: &Path,
        short_names: bool,
    ) -> CounterdResult<Self> {
        let fields = read_json(field_path, "field")?;
        let indexes = read_json(index_path, "index")?;
        let counters = read_json(counter_path, "counter")?;
        Self::from_values(fields, indexes, counters, short_names)
    }
}

fn read_json(path: &Path, catalog: &str) -> CounterdResult<serde_json::Value> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CounterdError::config_invalid(catalog, format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        CounterdError::config_invalid(catalog, format!("{}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn field_catalog_json() -> serde_json::Value {
        json!([
            { "src": "Amount", "dst": "transaction_amount", "shortDst": "amt",
              "message_types": [61] },
            { "src": "Status", "dst": "status", "shortDst": "s",
              "message_types": [61] }
        ])
    }

    #[test]
    fn test_catalogs_rewrite_counters_in_short_mode() {
        let catalogs = Catalogs::from_values(
            field_catalog_json(),
            json!([]),
            json!([{
                "name": "C",
                "computationConditions": { "d.status": "CI" },
                "evaluationConditions": { "d.transaction_amount": { "$gte": 100 } },
                "attributes": { "total": { "$sum": "$d.transaction_amount" } }
            }]),
            true,
        )
        .unwrap();

        let c = &catalogs.counters.counters()[0];
        assert_eq!(c.computation_conditions, json!({ "d.s": "CI" }));
        assert_eq!(c.evaluation_conditions, json!({ "d.amt": { "$gte": 100 } }));
        assert_eq!(c.attributes["total"], json!({ "$sum": "$d.amt" }));
    }

    #[test]
    fn test_catalogs_keep_long_names_when_disabled() {
        let catalogs = Catalogs::from_values(
            field_catalog_json(),
            json!([]),
            json!([{
                "name": "C",
                "computationConditions": { "d.status": "CI" },
                "evaluationConditions": {},
                "attributes": { "cnt": { "$sum": 1 } }
            }]),
            false,
        )
        .unwrap();
        let c = &catalogs.counters.counters()[0];
        assert_eq!(c.computation_conditions, json!({ "d.status": "CI" }));
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, v: &serde_json::Value| {
            let path = dir.path().join(name);
            let mut f = std::fs::File::create(&path).unwrap();
            write!(f, "{v}").unwrap();
            path
        };
        let fields = write("fields.json", &field_catalog_json());
        let indexes = write(
            "indexes.json",
            &json!([{ "fieldName": "f1", "dateName": "f2", "indexTypeName": "n1",
                       "indexType": 1, "indexValue": 1 }]),
        );
        let counters = write("counters.json", &json!([]));

        let catalogs = Catalogs::load_from_files(&fields, &indexes, &counters, true).unwrap();
        assert_eq!(catalogs.indexes.rules().len(), 1);
    }

    #[test]
    fn test_missing_file_is_config_invalid() {
        let err = Catalogs::load_from_files(
            Path::new("/nonexistent/fields.json"),
            Path::new("/nonexistent/indexes.json"),
            Path::new("/nonexistent/counters.json"),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CounterdError::ConfigInvalid { .. }));
    }
}
