//! Error Types - Typed Failures for the Scan Engine
//!
//! Configuration errors are fatal at setup time, rate limiter errors
//! carry the instance key and job name, and scan errors carry the
//! scanner name so the orchestrator can log them meaningfully.

use std::sync::Arc;

use thiserror::Error;

/// Errors raised while wiring scanners, queries and limiters.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Scanner type string is not a member of `ScannerType`.
    #[error("Unknown scanner type: {0}")]
    UnknownScannerType(String),

    /// Scanner type is known but has no implementation.
    #[error("Scanner type '{0}' is not implemented")]
    NotImplemented(String),

    /// Scanner type used in the wrong role (asset vs price).
    #[error("Scanner type '{scanner_type}' cannot be used as {role} scanner")]
    WrongRole {
        scanner_type: String,
        role: &'static str,
    },

    /// A second price scanner was registered for the same type.
    #[error("Price scanner of type '{0}' is already registered")]
    DuplicatePriceScanner(String),

    /// A second asset scanner was registered under the same name.
    #[error("Asset scanner '{0}' is already registered")]
    DuplicateScanner(String),

    /// A query targets a scanner name nobody registered.
    #[error("No scanner registered under '{scanner}' for query '{query_id}'")]
    ScannerNotFound { scanner: String, query_id: String },

    /// A required construction parameter is absent.
    #[error("{component}: missing required parameter '{key}'")]
    MissingParameter { component: String, key: String },

    /// A parameter is present but has the wrong shape.
    #[error("{component}: invalid parameter '{key}': {reason}")]
    InvalidParameter {
        component: String,
        key: String,
        reason: String,
    },

    /// Cron expression could not be parsed.
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
}

/// Errors surfaced by a `RateLimiter` to the caller of `exec`.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Every attempt failed; carries the last observed error.
    #[error("Job '{name}' on limiter '{key}' failed after {attempts} attempts: {source}")]
    Exhausted {
        key: String,
        name: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The limiter was stopped while the job was still pending.
    #[error("Limiter '{key}' stopped before job '{name}' completed")]
    Stopped { key: String, name: String },
}

/// Errors raised by the price aggregation layer.
#[derive(Error, Debug, Clone)]
pub enum PriceError {
    /// No registered price scanner produced a price for the code.
    #[error("No valid price found for '{code}'")]
    NoValidPrice { code: String },

    /// Upstream price fetch failed (shared between waiting callers).
    #[error("Price fetch failed on '{scanner}': {message}")]
    FetchFailed { scanner: String, message: String },
}

/// Errors raised by the scanner query contract.
#[derive(Error, Debug, Clone)]
pub enum ScanError {
    /// Scanner initialisation failed; every later call sees the same error.
    #[error("Scanner '{scanner}' failed to initialise: {message}")]
    InitFailed { scanner: String, message: Arc<str> },

    /// Operation attempted on a closed scanner.
    #[error("Scanner '{0}' is closed")]
    Closed(String),

    /// A required query key is absent or null.
    #[error("{scanner}: query '{query_id}' is missing required key '{key}'")]
    MissingQueryKey {
        scanner: String,
        query_id: String,
        key: String,
    },

    /// The source did not settle within the query timeout.
    #[error("{scanner}: query '{query_id}' timed out after {timeout_ms}ms")]
    Timeout {
        scanner: String,
        query_id: String,
        timeout_ms: u64,
    },

    /// The source returned an error.
    #[error("{scanner}: query '{query_id}' failed: {message}")]
    Source {
        scanner: String,
        query_id: String,
        message: String,
    },
}
