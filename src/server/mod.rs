// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP surface.
//!
//! Thin axum handlers over the Ingest Orchestrator:
//!
//! - `POST /api/v1/message/{type}/json` ingests a message (or an array of
//!   messages as a batch) and answers with the fact id, per-phase timings,
//!   and the per-counter result map.
//! - `GET /api/v1/message/{type}/json` answers with a synthetic message.
//! - `GET /health` reports process id, uptime, and a memory summary.
//! - `GET /api/v1/schema` reports the store schema probe and pool counters.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::error;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::core::error::{CounterdError, CounterdResult};
use crate::core::generator::MessageGenerator;
use crate::core::ingest::IngestOrchestrator;

pub struct AppState {
    pub orchestrator: IngestOrchestrator,
    pub generator: MessageGenerator,
    pub started: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/message/:message_type/json",
            get(sample_message).post(ingest_message),
        )
        .route("/health", get(health))
        .route("/api/v1/schema", get(schema))
        .with_state(state)
}

/// Error envelope mapping the taxonomy onto HTTP statuses.
pub struct ApiError(pub CounterdError);

impl From<CounterdError> for ApiError {
    fn from(e: CounterdError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CounterdError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            CounterdError::UnknownMessageType { .. } => StatusCode::NOT_FOUND,
            CounterdError::Conflict { .. } => StatusCode::CONFLICT,
            CounterdError::Overloaded { .. } => StatusCode::TOO_MANY_REQUESTS,
            CounterdError::TransientStore { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CounterdError::ConfigInvalid { .. }
            | CounterdError::PredicateUnsupported { .. }
            | CounterdError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn ingest_message(
    State(state): State<Arc<AppState>>,
    Path(message_type): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let value = match &body {
        Value::Array(bodies) => {
            let outcome = state
                .orchestrator
                .ingest_batch(message_type, bodies)
                .await?;
            to_json(&outcome)?
        }
        single => {
            let response = state.orchestrator.ingest(message_type, single).await?;
            to_json(&response)?
        }
    };
    Ok(Json(value))
}

async fn sample_message(
    State(state): State<Arc<AppState>>,
    Path(message_type): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let message = state.generator.generate(message_type)?;
    Ok(Json(message))
}

#[derive(Debug, Serialize)]
struct HealthReport {
    pid: u32,
    uptime_seconds: u64,
    memory: MemorySummary,
}

#[derive(Debug, Default, Serialize)]
struct MemorySummary {
    rss_kb: u64,
    peak_rss_kb: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(HealthReport {
        pid: std::process::id(),
        uptime_seconds: state.started.elapsed().as_secs(),
        memory: memory_summary(),
    })
}

async fn schema(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let probes = state.orchestrator.gateway().probe_schema().await?;
    let value = json!({
        "collections": to_json(&probes)?,
        "pool": to_json(&state.orchestrator.gateway().pool_status())?,
    });
    Ok(Json(value))
}

fn to_json<T: Serialize>(value: &T) -> CounterdResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| CounterdError::internal(format!("cannot serialize response: {e}")))
}

/// Resident and peak-resident memory from procfs, zeros where the platform
/// does not expose it.
fn memory_summary() -> MemorySummary {
    let mut summary = MemorySummary::default();
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return summary;
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            summary.rss_kb = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("VmHWM:") {
            summary.peak_rss_kb = parse_kb(rest);
        }
    }
    summary
}

fn parse_kb(rest: &str) -> u64 {
    rest.trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (CounterdError::bad_request("x"), StatusCode::BAD_REQUEST),
            (CounterdError::unknown_message_type(9), StatusCode::NOT_FOUND),
            (CounterdError::overloaded("x"), StatusCode::TOO_MANY_REQUESTS),
            (CounterdError::transient("x"), StatusCode::SERVICE_UNAVAILABLE),
            (CounterdError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (CounterdError::conflict("x"), StatusCode::CONFLICT),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_memory_summary_parses_proc_lines() {
        assert_eq!(parse_kb("  123456 kB"), 123456);
        assert_eq!(parse_kb("garbage"), 0);
    }

    #[test]
    fn test_health_report_shape() {
        let report = HealthReport {
            pid: 1,
            uptime_seconds: 2,
            memory: MemorySummary::default(),
        };
        let v = serde_json::to_value(&report).unwrap();
        assert!(v["pid"].is_number());
        assert!(v["uptime_seconds"].is_number());
        assert!(v["memory"]["rss_kb"].is_number());
    }
}
