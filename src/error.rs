// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Error types for the telemetry engine

use std::io;
use thiserror::Error;

/// Result type alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Main error type for the telemetry engine
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Rejected configuration change (bad path, missing field, interval too short, ...)
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Operation not supported in the current state
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Already exists: {0}")]
    Exists(String),

    /// Datastore read failure
    #[error("Datastore error: {0}")]
    Datastore(String),

    /// Datastore read did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Notification could not be delivered
    #[error("Emit error: {0}")]
    Emit(String),

    /// Invariant violation or missing schema
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TelemetryError {
    /// Errors after which a sampling loop simply skips the tick
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Datastore(_) | Self::Timeout(_))
    }
}

/// Errors reported by the telemetry and subscription stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No telemetry entry for the key
    #[error("telemetry entry not found: request {request_id}, subscription {subscription_id}, path {path}")]
    TelemetryNotFound {
        request_id: u64,
        subscription_id: u64,
        path: String,
    },

    /// No subscribe request with that id
    #[error("subscribe request {0} not found")]
    SubscriptionNotFound(u64),

    /// A subscribe request with that id is already registered
    #[error("subscribe request {0} already exists")]
    SubscriptionExists(u64),
}

impl From<StoreError> for TelemetryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TelemetryNotFound { .. } | StoreError::SubscriptionNotFound(_) => {
                TelemetryError::NotFound(err.to_string())
            }
            StoreError::SubscriptionExists(_) => TelemetryError::Exists(err.to_string()),
        }
    }
}
