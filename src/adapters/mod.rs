//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP price APIs, file I/O) and hosts the
//! infrastructure every scanner shares.
//!
//! Adapter categories:
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: JSONL batch log and latest snapshot
//! - `rate_limit`: Throttled retrying job queues and their registry
//! - `sources`: Asset and price source implementations and the type factory

pub mod metrics;
pub mod persistence;
pub mod rate_limit;
pub mod sources;
