// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fact and index-entry data model.
//!
//! A fact is the unit of ingestion: `{ id, t, c, d }` with the payload `d`
//! keyed by short wire names. Index entries are derived rows `{ h, it, v, i,
//! t, d, c }` enabling lookup by a content hash of a selected payload field.
//! Both are append-only; re-insertion under the same key is a no-op.

pub mod indexer;
pub mod normalizer;

pub use indexer::{content_hash, derive_entries, IndexWarning};
pub use normalizer::Normalizer;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::core::error::{CounterdError, CounterdResult};

/// Timestamps are carried as RFC 3339 strings with millisecond resolution,
/// in JSON and in the store alike.
pub mod rfc3339_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// An ingested typed event, stored once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Server-generated unique identifier.
    pub id: String,
    /// Message type.
    pub t: i64,
    /// Server-assigned ingest timestamp, millisecond resolution.
    #[serde(with = "rfc3339_millis")]
    pub c: DateTime<Utc>,
    /// Payload, keyed by short wire names.
    pub d: Map<String, Value>,
}

impl Fact {
    /// The fact as a JSON document, the shape predicates are evaluated
    /// against and the store persists.
    pub fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "t": self.t,
            "c": rfc3339_millis::format(&self.c),
            "d": Value::Object(self.d.clone()),
        })
    }

    /// Parse a fact document, requiring the top-level fields. A missing
    /// `id`, `t`, or `c` is a hard error for this fact.
    pub fn from_value(v: &Value) -> CounterdResult<Self> {
        serde_json::from_value(v.clone())
            .map_err(|e| CounterdError::bad_request(format!("malformed fact: {e}")))
    }
}

/// A derived secondary-index row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Content hash of `(indexTypeName, raw value)`, lowercase hex.
    pub h: String,
    /// Index-type code from the catalog rule.
    pub it: i64,
    /// Indexed value: the hash itself or the raw payload field.
    pub v: Value,
    /// Owning fact's id.
    pub i: String,
    /// Owning fact's message type.
    pub t: i64,
    /// Indexed date, drawn from the configured payload date field.
    #[serde(with = "rfc3339_millis")]
    pub d: DateTime<Utc>,
    /// Owning fact's ingest timestamp.
    #[serde(with = "rfc3339_millis")]
    pub c: DateTime<Utc>,
}

impl IndexEntry {
    /// The entry as a JSON document, the shape counter pipelines run over.
    pub fn to_value(&self) -> Value {
        json!({
            "h": self.h,
            "it": self.it,
            "v": self.v,
            "i": self.i,
            "t": self.t,
            "d": rfc3339_millis::format(&self.d),
            "c": rfc3339_millis::format(&self.c),
        })
    }
}

/// Server clock issuing ingest timestamps that are monotone non-decreasing
/// within this worker even across wall-clock slews.
#[derive(Debug, Default)]
pub struct IngestClock {
    last_ms: AtomicI64,
}

impl IngestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_millis();
        let prev = self.last_ms.fetch_max(wall, Ordering::SeqCst);
        let ms = prev.max(wall);
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }
}

/// Parse a payload value as a timestamp: an RFC 3339 string or an
/// epoch-millisecond integer.
pub fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
