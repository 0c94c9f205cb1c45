// SPDX-License-Identifier: MIT OR Apache-2.0

//! Counterd error types.
//!
//! One taxonomy for the whole service. Anything derived from the client is
//! surfaced directly; anything derived from the store is retried locally
//! before being surfaced; anything derived from configuration is fatal at
//! startup and never occurs at runtime.

use thiserror::Error;

/// Result type for counterd operations
pub type CounterdResult<T> = Result<T, CounterdError>;

/// Counterd error taxonomy
#[derive(Error, Debug)]
pub enum CounterdError {
    /// Catalog failed validation at load. Fatal at startup.
    #[error("invalid {catalog} catalog (entry {}): {message}", .entry.as_deref().unwrap_or("-"))]
    ConfigInvalid {
        catalog: String,
        message: String,
        entry: Option<String>,
    },

    /// Malformed or missing required fields on ingest. Returned to the client.
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// Message type not recognized by any catalog. Returned to the client.
    #[error("unknown message type {message_type}")]
    UnknownMessageType { message_type: i64 },

    /// Duplicate fact id or duplicate `(h, i)` index key. Treated as a
    /// success-no-op by callers, never surfaced to the client.
    #[error("duplicate {key}")]
    Conflict { key: String },

    /// Network, timeout, or pool exhaustion talking to the store. Retried
    /// with bounded backoff before surfacing.
    #[error("transient store error: {message}")]
    TransientStore {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The service refuses the request to protect the connection pool.
    /// The client may retry.
    #[error("overloaded: {message}")]
    Overloaded { message: String },

    /// An unsupported operator in a counter condition. The counter is
    /// skipped for the fact with a warning; never fatal.
    #[error("unsupported predicate operator '{operator}'")]
    PredicateUnsupported { operator: String },

    /// Anything unexpected. Logged with context, surfaced generically.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CounterdError {
    /// Create a catalog validation error
    pub fn config_invalid(catalog: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            catalog: catalog.into(),
            message: message.into(),
            entry: None,
        }
    }

    /// Create a catalog validation error identifying the offending entry
    pub fn config_invalid_entry(
        catalog: impl Into<String>,
        entry: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ConfigInvalid {
            catalog: catalog.into(),
            message: message.into(),
            entry: Some(entry.into()),
        }
    }

    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create an unknown message type error
    pub fn unknown_message_type(message_type: i64) -> Self {
        Self::UnknownMessageType { message_type }
    }

    /// Create a duplicate-key conflict
    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into() }
    }

    /// Create a transient store error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientStore {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient store error wrapping a driver error
    pub fn transient_with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::TransientStore {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an overloaded error
    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::Overloaded {
            message: message.into(),
        }
    }

    /// Create an unsupported predicate operator error
    pub fn predicate_unsupported(operator: impl Into<String>) -> Self {
        Self::PredicateUnsupported {
            operator: operator.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error wrapping its cause
    pub fn internal_with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether the error is worth retrying against the store.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore { .. })
    }

    /// Whether the error is a duplicate-key conflict (success-no-op).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
