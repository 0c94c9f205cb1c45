// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index derivation: one pass over the Index Catalog per fact.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::config::{IndexCatalog, IndexValueKind};
use crate::core::fact::{parse_timestamp, Fact, IndexEntry};

/// A rule skipped during derivation, keyed by the owning fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexWarning {
    pub fact_id: String,
    pub index_type_name: String,
    pub reason: String,
}

/// `SHA-256(indexTypeName + ":" + rawValue)` in lowercase hex.
///
/// String values hash their unquoted contents; everything else hashes its
/// canonical JSON rendering. Stable across processes.
pub fn content_hash(index_type_name: &str, raw: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index_type_name.as_bytes());
    hasher.update(b":");
    match raw {
        Value::String(s) => hasher.update(s.as_bytes()),
        other => hasher.update(other.to_string().as_bytes()),
    }
    format!("{:x}", hasher.finalize())
}

/// Derive the fact's index entries in catalog declaration order.
///
/// A rule only fires when its value field is present and non-null. A missing
/// or unparseable date skips the rule and records a warning; it never fails
/// the fact.
pub fn derive_entries(
    catalog: &IndexCatalog,
    fact: &Fact,
) -> (Vec<IndexEntry>, Vec<IndexWarning>) {
    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    for rule in catalog.rules() {
        let raw = match fact.d.get(&rule.field_name) {
            Some(v) if !v.is_null() => v,
            _ => continue,
        };

        let index_date = match fact.d.get(&rule.date_name).and_then(parse_timestamp) {
            Some(d) => d,
            None => {
                warnings.push(IndexWarning {
                    fact_id: fact.id.clone(),
                    index_type_name: rule.index_type_name.clone(),
                    reason: format!(
                        "date field '{}' is missing or not a timestamp",
                        rule.date_name
                    ),
                });
                continue;
            }
        };

        let h = content_hash(&rule.index_type_name, raw);
        let v = match rule.index_value {
            IndexValueKind::Hash => Value::String(h.clone()),
            IndexValueKind::Raw => raw.clone(),
        };

        entries.push(IndexEntry {
            h,
            it: rule.index_type,
            v,
            i: fact.id.clone(),
            t: fact.t,
            d: index_date,
            c: fact.c,
        });
    }

    (entries, warnings)
}
