// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index Catalog: the rules that turn a fact's payload fields into
//! content-addressed index entries.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use crate::core::error::{CounterdError, CounterdResult};

const CATALOG: &str = "index";

/// External naming of payload slots: f1 through f23.
static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^f([1-9]|1[0-9]|2[0-3])$").expect("field name pattern"));

/// Whether the indexed value is the content hash or the raw payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexValueKind {
    /// `v` is the content hash itself.
    Hash,
    /// `v` is the raw payload field; `h` is still the content hash.
    Raw,
}

impl IndexValueKind {
    pub fn code(self) -> u8 {
        match self {
            IndexValueKind::Hash => 1,
            IndexValueKind::Raw => 2,
        }
    }
}

/// One index derivation rule.
#[derive(Debug, Clone)]
pub struct IndexRule {
    /// Payload slot holding the indexed value (`f1`..`f23`).
    pub field_name: String,
    /// Payload slot holding the indexed date.
    pub date_name: String,
    /// Name of the index type; first half of the content-hash input.
    pub index_type_name: String,
    /// Positive numeric code, unique across the catalog.
    pub index_type: i64,
    pub index_value: IndexValueKind,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIndexRule {
    #[serde(rename = "fieldName")]
    field_name: String,
    #[serde(rename = "dateName")]
    date_name: String,
    #[serde(rename = "indexTypeName")]
    index_type_name: String,
    #[serde(rename = "indexType")]
    index_type: i64,
    #[serde(rename = "indexValue")]
    index_value: i64,
}

/// The loaded, validated index catalog. Rule order is declaration order and
/// is preserved through index derivation.
#[derive(Debug, Clone)]
pub struct IndexCatalog {
    rules: Vec<IndexRule>,
}

impl IndexCatalog {
    /// Parse and validate a catalog from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` on extra keys, a malformed `fieldName`, an
    /// out-of-range `indexValue`, a non-positive `indexType`, or a
    /// uniqueness violation.
    pub fn from_value(v: Value) -> CounterdResult<Self> {
        let raw: Vec<RawIndexRule> = serde_json::from_value(v)
            .map_err(|e| CounterdError::config_invalid(CATALOG, e.to_string()))?;

        let mut rules = Vec::with_capacity(raw.len());
        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
        let mut seen_types: HashSet<i64> = HashSet::new();

        for r in raw {
            let entry = format!("{}/{}", r.field_name, r.index_type_name);
            let invalid =
                |msg: String| CounterdError::config_invalid_entry(CATALOG, &entry, msg);

            if !FIELD_NAME_RE.is_match(&r.field_name) {
                return Err(invalid(format!(
                    "fieldName '{}' must match f1..f23",
                    r.field_name
                )));
            }
            if r.date_name.is_empty() {
                return Err(invalid("dateName must be a non-empty string".into()));
            }
            if r.index_type_name.is_empty() {
                return Err(invalid("indexTypeName must be a non-empty string".into()));
            }
            if r.index_type <= 0 {
                return Err(invalid(format!(
                    "indexType {} must be a positive integer",
                    r.index_type
                )));
            }
            let index_value = match r.index_value {
                1 => IndexValueKind::Hash,
                2 => IndexValueKind::Raw,
                other => {
                    return Err(invalid(format!("indexValue {other} must be 1 or 2")));
                }
            };
            if !seen_pairs.insert((r.field_name.clone(), r.index_type_name.clone())) {
                return Err(invalid("duplicate (fieldName, indexTypeName)".into()));
            }
            if !seen_types.insert(r.index_type) {
                return Err(invalid(format!("duplicate indexType {}", r.index_type)));
            }

            rules.push(IndexRule {
                field_name: r.field_name,
                date_name: r.date_name,
                index_type_name: r.index_type_name,
                index_type: r.index_type,
                index_value,
            });
        }

        Ok(Self { rules })
    }

    /// Parse and validate a catalog from a JSON string.
    pub fn from_json(json: &str) -> CounterdResult<Self> {
        let v: Value = serde_json::from_str(json)
            .map_err(|e| CounterdError::config_invalid(CATALOG, e.to_string()))?;
        Self::from_value(v)
    }

    pub fn rules(&self) -> &[IndexRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(field: &str, name: &str, it: i64, iv: i64) -> Value {
        json!({
            "fieldName": field, "dateName": "f2",
            "indexTypeName": name, "indexType": it, "indexValue": iv
        })
    }

    #[test]
    fn test_valid_catalog_loads() {
        let cat = IndexCatalog::from_value(json!([rule("f1", "n1", 1, 1), rule("f3", "n2", 2, 2)]))
            .unwrap();
        assert_eq!(cat.rules().len(), 2);
        assert_eq!(cat.rules()[0].index_value, IndexValueKind::Hash);
        assert_eq!(cat.rules()[1].index_value, IndexValueKind::Raw);
    }

    #[test]
    fn test_field_name_pattern() {
        assert!(IndexCatalog::from_value(json!([rule("f23", "n", 1, 1)])).is_ok());
        assert!(IndexCatalog::from_value(json!([rule("f24", "n", 1, 1)])).is_err());
        assert!(IndexCatalog::from_value(json!([rule("f0", "n", 1, 1)])).is_err());
        assert!(IndexCatalog::from_value(json!([rule("g1", "n", 1, 1)])).is_err());
    }

    #[test]
    fn test_extra_keys_rejected() {
        let err = IndexCatalog::from_value(json!([{
            "fieldName": "f1", "dateName": "f2", "indexTypeName": "n1",
            "indexType": 1, "indexValue": 1, "stray": true
        }]))
        .unwrap_err();
        assert!(err.to_string().contains("stray"));
    }

    #[test]
    fn test_index_value_domain() {
        assert!(IndexCatalog::from_value(json!([rule("f1", "n", 1, 3)])).is_err());
        assert!(IndexCatalog::from_value(json!([rule("f1", "n", 1, 0)])).is_err());
    }

    #[test]
    fn test_uniqueness() {
        // same (fieldName, indexTypeName)
        let err =
            IndexCatalog::from_value(json!([rule("f1", "n1", 1, 1), rule("f1", "n1", 2, 1)]))
                .unwrap_err();
        assert!(err.to_string().contains("duplicate (fieldName, indexTypeName)"));

        // same indexType
        let err =
            IndexCatalog::from_value(json!([rule("f1", "n1", 7, 1), rule("f2", "n2", 7, 1)]))
                .unwrap_err();
        assert!(err.to_string().contains("duplicate indexType"));
    }

    #[test]
    fn test_index_type_positive() {
        assert!(IndexCatalog::from_value(json!([rule("f1", "n1", -1, 1)])).is_err());
        assert!(IndexCatalog::from_value(json!([rule("f1", "n1", 0, 1)])).is_err());
    }
}
