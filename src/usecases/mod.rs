//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement the
//! monitor's core workflows.
//!
//! Use cases:
//! - `AssetMonitor`: Scanner registry, concurrent scans, cron monitoring
//! - `AssetScanner`: Query contract around one asset source
//! - `PriceScanner`: Cached, throttled prices from one price source
//! - `PriceAggregator`: Consensus (mean) USD price across price scanners
//! - `ServiceLifecycle`: Background init and idempotent close

pub mod asset_monitor;
pub mod asset_scanner;
pub mod contract;
pub mod price_aggregator;
pub mod price_scanner;
pub mod service;

pub use asset_monitor::AssetMonitor;
pub use asset_scanner::AssetScanner;
pub use contract::{QUERY_TIMEOUT, STUCK_LOG_INTERVAL};
pub use price_aggregator::PriceAggregator;
pub use price_scanner::{PRICE_CACHE_TTL, PriceScanner};
pub use service::ServiceLifecycle;
