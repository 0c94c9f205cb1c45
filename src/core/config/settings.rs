// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime settings resolved from environment variables.

use std::time::Duration;

use crate::core::error::{CounterdError, CounterdResult};

/// Environment-derived runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Document store connection string.
    pub store_uri: String,
    /// Database name inside the store.
    pub database: String,
    /// Checked-out connection count above which the pool counts as saturated.
    pub pool_high_water: u32,
    /// Checked-out connection count below which backpressure disengages.
    pub pool_low_water: u32,
    /// How long the pool must stay saturated before new ingests are refused.
    pub pool_saturation_window: Duration,
    /// Whether counter conditions are rewritten to short wire names at load.
    pub short_names: bool,
    /// Default per-request deadline.
    pub default_deadline: Duration,
    /// HTTP bind address.
    pub bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_uri: "mongodb://localhost:27017".to_string(),
            database: "counterd".to_string(),
            pool_high_water: 80,
            pool_low_water: 40,
            pool_saturation_window: Duration::from_millis(2_000),
            short_names: true,
            default_deadline: Duration::from_millis(5_000),
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment, falling back to the
    /// defaults above for anything unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` when a variable is set but unparseable, or
    /// when the low-water mark exceeds the high-water mark.
    pub fn from_env() -> CounterdResult<Self> {
        let mut settings = Self::default();

        if let Some(v) = read("COUNTERD_STORE_URI") {
            settings.store_uri = v;
        }
        if let Some(v) = read("COUNTERD_DATABASE") {
            settings.database = v;
        }
        if let Some(v) = read("COUNTERD_POOL_HIGH_WATER") {
            settings.pool_high_water = parse_u32("COUNTERD_POOL_HIGH_WATER", &v)?;
        }
        if let Some(v) = read("COUNTERD_POOL_LOW_WATER") {
            settings.pool_low_water = parse_u32("COUNTERD_POOL_LOW_WATER", &v)?;
        }
        if let Some(v) = read("COUNTERD_POOL_SATURATION_MS") {
            settings.pool_saturation_window =
                Duration::from_millis(parse_u64("COUNTERD_POOL_SATURATION_MS", &v)?);
        }
        if let Some(v) = read("COUNTERD_SHORT_NAMES") {
            settings.short_names = parse_bool("COUNTERD_SHORT_NAMES", &v)?;
        }
        if let Some(v) = read("COUNTERD_DEADLINE_MS") {
            settings.default_deadline =
                Duration::from_millis(parse_u64("COUNTERD_DEADLINE_MS", &v)?);
        }
        if let Some(v) = read("COUNTERD_BIND") {
            settings.bind = v;
        }

        if settings.pool_low_water > settings.pool_high_water {
            return Err(CounterdError::config_invalid(
                "settings",
                format!(
                    "COUNTERD_POOL_LOW_WATER ({}) exceeds COUNTERD_POOL_HIGH_WATER ({})",
                    settings.pool_low_water, settings.pool_high_water
                ),
            ));
        }

        Ok(settings)
    }
}

fn read(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_u32(name: &str, v: &str) -> CounterdResult<u32> {
    v.parse()
        .map_err(|_| CounterdError::config_invalid("settings", format!("{name}='{v}' is not an unsigned integer")))
}

fn parse_u64(name: &str, v: &str) -> CounterdResult<u64> {
    v.parse()
        .map_err(|_| CounterdError::config_invalid("settings", format!("{name}='{v}' is not an unsigned integer")))
}

fn parse_bool(name: &str, v: &str) -> CounterdResult<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CounterdError::config_invalid(
            "settings",
            format!("{name}='{v}' is not a boolean"),
        )),
    }
}
