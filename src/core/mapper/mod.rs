// SPDX-License-Identifier: MIT OR Apache-2.0

//! Field-Name Mapper.
//!
//! Rewrites predicate trees, aggregation expressions, and attribute specs
//! between long logical field names and short wire names. The mapper is a
//! bijective table over the names it knows and the identity everywhere else;
//! it is pure, performs no I/O, and understands no operator semantics — it
//! works syntactically on recognized shapes.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::core::config::FieldCatalog;
use crate::core::error::{CounterdError, CounterdResult};

#[derive(Debug, Clone)]
pub struct FieldNameMapper {
    enabled: bool,
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl FieldNameMapper {
    /// Build the long→short table from the field catalog.
    ///
    /// # Errors
    ///
    /// When short-name mode is enabled, any catalog entry lacking `shortDst`
    /// fails the load.
    pub fn from_catalog(catalog: &FieldCatalog, enabled: bool) -> CounterdResult<Self> {
        let mut forward = HashMap::new();
        let mut reverse = HashMap::new();
        for entry in catalog.entries() {
            match &entry.short_dst {
                Some(short) => {
                    forward.insert(entry.dst.clone(), short.clone());
                    reverse.insert(short.clone(), entry.dst.clone());
                }
                None if enabled => {
                    return Err(CounterdError::config_invalid_entry(
                        "field",
                        &entry.dst,
                        "shortDst is required when short-name mode is enabled",
                    ));
                }
                None => {}
            }
        }
        Ok(Self {
            enabled,
            forward,
            reverse,
        })
    }

    /// A disabled mapper: every transform is the identity.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// The mapper for the opposite direction (short names back to long).
    pub fn inverted(&self) -> Self {
        Self {
            enabled: self.enabled,
            forward: self.reverse.clone(),
            reverse: self.forward.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Short name for a long name; the input unchanged when the mapper is
    /// disabled or the name is unknown.
    pub fn field_name<'a>(&'a self, long: &'a str) -> &'a str {
        if !self.enabled {
            return long;
        }
        self.forward.get(long).map(String::as_str).unwrap_or(long)
    }

    /// Long name for a short name; the input unchanged when disabled or
    /// unknown.
    pub fn long_field_name<'a>(&'a self, short: &'a str) -> &'a str {
        if !self.enabled {
            return short;
        }
        self.reverse.get(short).map(String::as_str).unwrap_or(short)
    }

    /// Rewrite a `d.<field>[.<suffix>]` key path. Paths without the `d.`
    /// prefix are returned unchanged.
    pub fn transform_field_path(&self, path: &str) -> String {
        match path.strip_prefix("d.") {
            Some(rest) => {
                let (head, tail) = match rest.split_once('.') {
                    Some((head, tail)) => (head, Some(tail)),
                    None => (rest, None),
                };
                let mapped = self.field_name(head);
                match tail {
                    Some(tail) => format!("d.{mapped}.{tail}"),
                    None => format!("d.{mapped}"),
                }
            }
            None => path.to_string(),
        }
    }

    /// Rewrite a `$d.<field>[.<suffix>]` value path. Arrays are mapped
    /// elementwise; anything not of that shape is returned verbatim.
    pub fn transform_mongo_path(&self, v: &Value) -> Value {
        match v {
            Value::String(s) => match s.strip_prefix('$') {
                Some(path) if path.starts_with("d.") => {
                    Value::String(format!("${}", self.transform_field_path(path)))
                }
                _ => v.clone(),
            },
            Value::Array(items) => {
                Value::Array(items.iter().map(|i| self.transform_mongo_path(i)).collect())
            }
            _ => v.clone(),
        }
    }

    /// Rewrite a predicate tree. `d.`-prefixed keys are rewritten, `$expr`
    /// values go through [`Self::transform_expr_expression`], other `$`-keys
    /// are preserved with recursing values, arrays recurse elementwise.
    pub fn transform_condition(&self, expr: &Value) -> Value {
        match expr {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    if key == "$expr" {
                        out.insert(key.clone(), self.transform_expr_expression(value));
                    } else if key.starts_with("d.") {
                        out.insert(self.transform_field_path(key), self.transform_condition(value));
                    } else {
                        out.insert(key.clone(), self.transform_condition(value));
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|i| self.transform_condition(i)).collect())
            }
            _ => expr.clone(),
        }
    }

    /// Rewrite an aggregation expression: operator objects recurse, operand
    /// arrays recurse elementwise, `$d.<field>` path strings are rewritten.
    pub fn transform_expr_expression(&self, expr: &Value) -> Value {
        match expr {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.transform_expr_expression(value));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|i| self.transform_expr_expression(i))
                    .collect(),
            ),
            Value::String(_) => self.transform_mongo_path(expr),
            _ => expr.clone(),
        }
    }

    /// Rewrite an attribute spec: each aggregator whose argument is a
    /// `$d.<field>` path gets the argument rewritten, recursing through
    /// nested maps.
    pub fn transform_attributes(&self, attrs: &Value) -> Value {
        match attrs {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.transform_attributes(value));
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|i| self.transform_attributes(i)).collect())
            }
            Value::String(_) => self.transform_mongo_path(attrs),
            _ => attrs.clone(),
        }
    }
}
