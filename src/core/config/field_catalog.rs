// SPDX-License-Identifier: MIT OR Apache-2.0

//! Field Catalog: declares how source message fields map onto logical and
//! wire field names, which message types carry them, and how the synthetic
//! message generator fills them.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::core::error::{CounterdError, CounterdResult};

const CATALOG: &str = "field";

/// One field mapping plus its optional generator spec.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name in the source system's message.
    pub src: String,
    /// Long logical name.
    pub dst: String,
    /// Short wire name. Mandatory when short-name mode is enabled.
    pub short_dst: Option<String>,
    /// Message types carrying this field.
    pub message_types: Vec<i64>,
    pub generator: Option<GeneratorSpec>,
}

/// Validated generator spec for a field.
#[derive(Debug, Clone)]
pub struct GeneratorSpec {
    pub kind: GeneratorKind,
    /// Candidate default values; one is chosen uniformly when the default
    /// branch is taken.
    pub default_value: Option<Vec<Value>>,
    /// Probability of emitting a default value instead of a random one.
    pub default_random: f64,
}

/// Generator kinds, one per declared `type`.
#[derive(Debug, Clone)]
pub enum GeneratorKind {
    String { min_len: usize, max_len: usize },
    Integer { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Date {
        min: Option<DateTime<Utc>>,
        max: Option<DateTime<Utc>>,
    },
    Enum { values: Vec<Value> },
    ObjectId,
    Boolean,
}

impl GeneratorKind {
    fn type_name(&self) -> &'static str {
        match self {
            GeneratorKind::String { .. } => "string",
            GeneratorKind::Integer { .. } => "integer",
            GeneratorKind::Float { .. } => "float",
            GeneratorKind::Date { .. } => "date",
            GeneratorKind::Enum { .. } => "enum",
            GeneratorKind::ObjectId => "objectId",
            GeneratorKind::Boolean => "boolean",
        }
    }

    /// Whether `v` is a legal literal of this kind.
    fn admits(&self, v: &Value) -> bool {
        match self {
            GeneratorKind::String { .. } => v.is_string(),
            GeneratorKind::Integer { .. } => v.as_i64().is_some(),
            GeneratorKind::Float { .. } => v.as_f64().is_some(),
            GeneratorKind::Date { .. } => match v {
                Value::String(s) => DateTime::parse_from_rfc3339(s).is_ok(),
                Value::Number(n) => n.as_i64().is_some(),
                _ => false,
            },
            GeneratorKind::Enum { values } => values.contains(v),
            GeneratorKind::ObjectId => v
                .as_str()
                .map(|s| s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit()))
                .unwrap_or(false),
            GeneratorKind::Boolean => v.is_boolean(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFieldSpec {
    src: String,
    dst: String,
    #[serde(rename = "shortDst", default)]
    short_dst: Option<String>,
    message_types: Vec<i64>,
    #[serde(default)]
    generator: Option<RawGeneratorSpec>,
}

#[derive(Debug, Deserialize)]
struct RawGeneratorSpec {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    min: Option<Value>,
    #[serde(default)]
    max: Option<Value>,
    #[serde(default)]
    values: Option<Vec<Value>>,
    #[serde(default)]
    default_value: Option<Value>,
    #[serde(default)]
    default_random: Option<f64>,
}

/// The loaded, validated field catalog.
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    entries: Vec<FieldSpec>,
}

impl FieldCatalog {
    /// Parse and validate a catalog from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` naming the offending entry on any structural
    /// or semantic violation.
    pub fn from_value(v: Value, short_names: bool) -> CounterdResult<Self> {
        let raw: Vec<RawFieldSpec> = serde_json::from_value(v)
            .map_err(|e| CounterdError::config_invalid(CATALOG, e.to_string()))?;

        let mut entries = Vec::with_capacity(raw.len());
        for spec in raw {
            entries.push(validate_entry(spec, short_names)?);
        }
        Ok(Self { entries })
    }

    /// Parse and validate a catalog from a JSON string.
    pub fn from_json(json: &str, short_names: bool) -> CounterdResult<Self> {
        let v: Value = serde_json::from_str(json)
            .map_err(|e| CounterdError::config_invalid(CATALOG, e.to_string()))?;
        Self::from_value(v, short_names)
    }

    pub fn entries(&self) -> &[FieldSpec] {
        &self.entries
    }

    /// All message types declared anywhere in the catalog.
    pub fn message_types(&self) -> std::collections::BTreeSet<i64> {
        self.entries
            .iter()
            .flat_map(|e| e.message_types.iter().copied())
            .collect()
    }

    /// Entries carried by the given message type, in declaration order.
    pub fn entries_for_type(&self, t: i64) -> impl Iterator<Item = &FieldSpec> {
        self.entries
            .iter()
            .filter(move |e| e.message_types.contains(&t))
    }
}

fn validate_entry(raw: RawFieldSpec, short_names: bool) -> CounterdResult<FieldSpec> {
    let entry_name = raw.dst.clone();
    let invalid = |msg: String| CounterdError::config_invalid_entry(CATALOG, &entry_name, msg);

    if raw.src.is_empty() {
        return Err(invalid("src must be a non-empty string".into()));
    }
    if raw.dst.is_empty() {
        return Err(invalid("dst must be a non-empty string".into()));
    }
    if raw.message_types.is_empty() {
        return Err(invalid("message_types must be a non-empty sequence".into()));
    }
    if short_names && raw.short_dst.as_deref().map_or(true, str::is_empty) {
        return Err(invalid(
            "shortDst is required when short-name mode is enabled".into(),
        ));
    }

    let generator = match raw.generator {
        Some(g) => Some(validate_generator(g, &entry_name)?),
        None => None,
    };

    Ok(FieldSpec {
        src: raw.src,
        dst: raw.dst,
        short_dst: raw.short_dst,
        message_types: raw.message_types,
        generator,
    })
}

fn validate_generator(raw: RawGeneratorSpec, entry: &str) -> CounterdResult<GeneratorSpec> {
    let invalid =
        |msg: String| CounterdError::config_invalid_entry(CATALOG, entry, msg);

    let kind = match raw.kind.as_str() {
        "string" => {
            let min_len = opt_usize(raw.min.as_ref()).unwrap_or(1);
            let max_len = opt_usize(raw.max.as_ref()).unwrap_or(16);
            if min_len > max_len {
                return Err(invalid("string generator min exceeds max".into()));
            }
            GeneratorKind::String { min_len, max_len }
        }
        "integer" => {
            let min = opt_i64(raw.min.as_ref()).unwrap_or(0);
            let max = opt_i64(raw.max.as_ref()).unwrap_or(1_000_000);
            if min > max {
                return Err(invalid("integer generator min exceeds max".into()));
            }
            GeneratorKind::Integer { min, max }
        }
        "float" => {
            let min = opt_f64(raw.min.as_ref()).unwrap_or(0.0);
            let max = opt_f64(raw.max.as_ref()).unwrap_or(1_000.0);
            if min > max {
                return Err(invalid("float generator min exceeds max".into()));
            }
            GeneratorKind::Float { min, max }
        }
        "date" => {
            let min = opt_date(raw.min.as_ref())
                .map_err(|m| invalid(format!("date generator min: {m}")))?;
            let max = opt_date(raw.max.as_ref())
                .map_err(|m| invalid(format!("date generator max: {m}")))?;
            if let (Some(a), Some(b)) = (min, max) {
                if a > b {
                    return Err(invalid("date generator min exceeds max".into()));
                }
            }
            GeneratorKind::Date { min, max }
        }
        "enum" => {
            let values = raw
                .values
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| invalid("enum generator requires non-empty values".into()))?;
            GeneratorKind::Enum { values }
        }
        "objectId" => GeneratorKind::ObjectId,
        "boolean" => GeneratorKind::Boolean,
        other => {
            return Err(invalid(format!("unknown generator type '{other}'")));
        }
    };

    let default_random = raw.default_random.unwrap_or(0.0);
    if !(0.0..=1.0).contains(&default_random) {
        return Err(invalid("default_random must lie in [0, 1]".into()));
    }

    let default_value = match raw.default_value {
        None => None,
        Some(Value::Array(candidates)) => {
            if candidates.is_empty() {
                return Err(invalid("default_value sequence must be non-empty".into()));
            }
            if let Some(bad) = candidates.iter().find(|c| !kind.admits(c)) {
                return Err(invalid(format!(
                    "default_value {bad} does not match generator type '{}'",
                    kind.type_name()
                )));
            }
            Some(candidates)
        }
        Some(single) => {
            if !kind.admits(&single) {
                return Err(invalid(format!(
                    "default_value {single} does not match generator type '{}'",
                    kind.type_name()
                )));
            }
            Some(vec![single])
        }
    };

    Ok(GeneratorSpec {
        kind,
        default_value,
        default_random,
    })
}

fn opt_usize(v: Option<&Value>) -> Option<usize> {
    v.and_then(Value::as_u64).map(|n| n as usize)
}

fn opt_i64(v: Option<&Value>) -> Option<i64> {
    v.and_then(Value::as_i64)
}

fn opt_f64(v: Option<&Value>) -> Option<f64> {
    v.and_then(Value::as_f64)
}

fn opt_date(v: Option<&Value>) -> Result<Option<DateTime<Utc>>, String> {
    match v {
        None => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| format!("'{s}' is not an RFC 3339 timestamp ({e})")),
        Some(Value::Number(n)) => match n.as_i64().and_then(DateTime::from_timestamp_millis) {
            Some(d) => Ok(Some(d)),
            None => Err(format!("{n} is not a valid epoch-millisecond timestamp")),
        },
        Some(other) => Err(format!("{other} is not a timestamp")),
    }
}
