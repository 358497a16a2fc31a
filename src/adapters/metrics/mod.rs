//! Metrics and Monitoring Adapters
//!
//! Prometheus metrics for scan cycles and rate limiters, plus the
//! axum health server exposing /live, /ready and /metrics.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use self::prometheus::MonitorMetrics;
