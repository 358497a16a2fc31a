//! Rate Limiting Adapters - Per-Endpoint Throttling
//!
//! - `limiter`: throttled job queue with bounded retry and backoff
//! - `registry`: owner of limiters shared by instance key

pub mod limiter;
pub mod registry;

pub use limiter::{JOB_TIMEOUT, RateLimiter, RateLimiterOptions};
pub use registry::RateLimiterRegistry;
