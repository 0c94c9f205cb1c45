// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound message normalization: validated JSON body in, canonical fact out.

use log::warn;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::config::FieldCatalog;
use crate::core::error::{CounterdError, CounterdResult};
use crate::core::fact::{Fact, IngestClock};
use crate::core::mapper::FieldNameMapper;

/// A message dropped from a batch, with the position it held.
#[derive(Debug, Clone)]
pub struct BatchWarning {
    pub position: usize,
    pub reason: String,
}

/// Turns inbound message bodies into canonical facts.
#[derive(Debug)]
pub struct Normalizer {
    mapper: Arc<FieldNameMapper>,
    known_types: BTreeSet<i64>,
    clock: IngestClock,
}

impl Normalizer {
    pub fn new(fields: &FieldCatalog, mapper: Arc<FieldNameMapper>) -> Self {
        Self {
            mapper,
            known_types: fields.message_types(),
            clock: IngestClock::new(),
        }
    }

    /// Whether any catalog entry declares the message type.
    pub fn knows_type(&self, t: i64) -> bool {
        self.known_types.contains(&t)
    }

    /// Validate and canonicalize a single message.
    ///
    /// The payload's keys are rewritten to wire names through the mapper;
    /// `id` is assigned server-side (time-sortable UUID v7) and `c` from the
    /// worker's monotone clock.
    ///
    /// # Errors
    ///
    /// `UnknownMessageType` when no catalog entry declares `t`; `BadRequest`
    /// when the body is not a JSON object.
    pub fn normalize(&self, message_type: i64, body: &Value) -> CounterdResult<Fact> {
        if !self.knows_type(message_type) {
            return Err(CounterdError::unknown_message_type(message_type));
        }
        let payload = body
            .as_object()
            .ok_or_else(|| CounterdError::bad_request("message payload must be a JSON object"))?;

        let mut d = Map::with_capacity(payload.len());
        for (key, value) in payload {
            d.insert(self.mapper.field_name(key).to_string(), value.clone());
        }

        Ok(Fact {
            id: Uuid::now_v7().to_string(),
            t: message_type,
            c: self.clock.now(),
            d,
        })
    }

    /// Normalize a batch. A bad message is dropped with a warning and the
    /// rest proceed.
    pub fn normalize_batch(
        &self,
        message_type: i64,
        bodies: &[Value],
    ) -> (Vec<Fact>, Vec<BatchWarning>) {
        let mut facts = Vec::with_capacity(bodies.len());
        let mut warnings = Vec::new();
        for (position, body) in bodies.iter().enumerate() {
            match self.normalize(message_type, body) {
                Ok(fact) => facts.push(fact),
                Err(e) => {
                    warn!("dropping message {position} from batch: {e}");
                    warnings.push(BatchWarning {
                        position,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (facts, warnings)
    }
}
