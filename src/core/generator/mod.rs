// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synthetic message generator.
//!
//! Builds a random payload for a message type from the Field Catalog's
//! generator specs. Drives the `GET /api/v1/message/{type}/json` test
//! surface and load tooling; the emitted field names are the canonical wire
//! names, so the output can be POSTed straight back to the same type.

use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::core::config::{FieldCatalog, GeneratorKind, GeneratorSpec};
use crate::core::error::{CounterdError, CounterdResult};
use crate::core::fact::rfc3339_millis;
use crate::core::mapper::FieldNameMapper;

#[derive(Debug)]
pub struct MessageGenerator {
    fields: Arc<FieldCatalog>,
    mapper: Arc<FieldNameMapper>,
}

impl MessageGenerator {
    pub fn new(fields: Arc<FieldCatalog>, mapper: Arc<FieldNameMapper>) -> Self {
        Self { fields, mapper }
    }

    /// Generate a payload for the message type.
    ///
    /// # Errors
    ///
    /// `UnknownMessageType` when no catalog entry declares the type.
    pub fn generate(&self, message_type: i64) -> CounterdResult<Value> {
        let mut rng = rand::thread_rng();
        let mut payload = Map::new();
        let mut known = false;

        for entry in self.fields.entries_for_type(message_type) {
            known = true;
            let Some(spec) = &entry.generator else {
                continue;
            };
            let key = self.mapper.field_name(&entry.dst).to_string();
            payload.insert(key, generate_value(spec, &mut rng));
        }

        if !known {
            return Err(CounterdError::unknown_message_type(message_type));
        }
        Ok(Value::Object(payload))
    }
}

fn generate_value(spec: &GeneratorSpec, rng: &mut impl Rng) -> Value {
    if let Some(candidates) = &spec.default_value {
        if spec.default_random > 0.0 && rng.gen::<f64>() < spec.default_random {
            return candidates
                .choose(rng)
                .cloned()
                .unwrap_or(Value::Null);
        }
    }

    match &spec.kind {
        GeneratorKind::String { min_len, max_len } => {
            let len = rng.gen_range(*min_len..=*max_len);
            let s: String = (0..len)
                .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
                .collect();
            Value::String(s)
        }
        GeneratorKind::Integer { min, max } => Value::from(rng.gen_range(*min..=*max)),
        GeneratorKind::Float { min, max } => {
            if min == max {
                Value::from(*min)
            } else {
                Value::from(rng.gen_range(*min..*max))
            }
        }
        GeneratorKind::Date { min, max } => {
            let now = Utc::now();
            let lo = min.unwrap_or(now - Duration::days(365)).timestamp_millis();
            let hi = max.unwrap_or(now).timestamp_millis().max(lo + 1);
            let ms = rng.gen_range(lo..hi);
            match chrono::DateTime::from_timestamp_millis(ms) {
                Some(dt) => Value::String(rfc3339_millis::format(&dt)),
                None => Value::Null,
            }
        }
        GeneratorKind::Enum { values } => values.choose(rng).cloned().unwrap_or(Value::Null),
        GeneratorKind::ObjectId => {
            let bytes: [u8; 12] = rng.gen();
            Value::String(bytes.iter().map(|b| format!("{b:02x}")).collect())
        }
        GeneratorKind::Boolean => Value::Bool(rng.gen_bool(0.5)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn generator() -> MessageGenerator {
        let fields = FieldCatalog::from_value(
            json!([
                { "src": "F1", "dst": "card_number", "shortDst": "f1", "message_types": [61],
                  "generator": { "type": "string", "min": 8, "max": 8 } },
                { "src": "F2", "dst": "operation_date", "shortDst": "f2", "message_types": [61],
                  "generator": { "type": "date" } },
                { "src": "A", "dst": "amount", "shortDst": "amt", "message_types": [61],
                  "generator": { "type": "integer", "min": 1, "max": 10 } },
                { "src": "S", "dst": "status", "shortDst": "s", "message_types": [61],
                  "generator": { "type": "enum", "values": ["CI", "CO"] } },
                { "src": "R", "dst": "ref", "shortDst": "r", "message_types": [61],
                  "generator": { "type": "objectId" } },
                { "src": "B", "dst": "flag", "shortDst": "b", "message_types": [61],
                  "generator": { "type": "boolean" } },
                { "src": "P", "dst": "ratio", "shortDst": "p", "message_types": [61],
                  "generator": { "type": "float", "min": 0.0, "max": 1.0 } },
                { "src": "N", "dst": "no_generator", "shortDst": "n", "message_types": [61] }
            ]),
            true,
        )
        .unwrap();
        let mapper = Arc::new(FieldNameMapper::from_catalog(&fields, true).unwrap());
        MessageGenerator::new(Arc::new(fields), mapper)
    }

    #[test]
    fn test_generated_payload_uses_wire_names_and_specs() {
        let g = generator();
        let payload = g.generate(61).unwrap();
        let obj = payload.as_object().unwrap();

        assert_eq!(obj["f1"].as_str().unwrap().len(), 8);
        assert!(obj["f2"].as_str().is_some());
        let amt = obj["amt"].as_i64().unwrap();
        assert!((1..=10).contains(&amt));
        assert!(["CI", "CO"].contains(&obj["s"].as_str().unwrap()));
        let oid = obj["r"].as_str().unwrap();
        assert_eq!(oid.len(), 24);
        assert!(oid.bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(obj["b"].is_boolean());
        let ratio = obj["p"].as_f64().unwrap();
        assert!((0.0..1.0).contains(&ratio));
        // fields without a generator spec are omitted
        assert!(!obj.contains_key("n"));
    }

    #[test]
    fn test_generated_dates_parse() {
        let g = generator();
        for _ in 0..20 {
            let payload = g.generate(61).unwrap();
            let date = payload["f2"].as_str().unwrap().to_string();
            assert!(chrono::DateTime::parse_from_rfc3339(&date).is_ok());
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = generator().generate(99).unwrap_err();
        assert!(matches!(err, CounterdError::UnknownMessageType { .. }));
    }

    #[test]
    fn test_default_value_always_taken_at_probability_one() {
        let fields = FieldCatalog::from_value(
            json!([
                { "src": "A", "dst": "amount", "shortDst": "amt", "message_types": [1],
                  "generator": { "type": "integer", "min": 1, "max": 10,
                                 "default_value": [77, 88], "default_random": 1.0 } }
            ]),
            true,
        )
        .unwrap();
        let mapper = Arc::new(FieldNameMapper::from_catalog(&fields, true).unwrap());
        let g = MessageGenerator::new(Arc::new(fields), mapper);
        for _ in 0..20 {
            let amt = g.generate(1).unwrap()["amt"].as_i64().unwrap();
            assert!(amt == 77 || amt == 88);
        }
    }
}
