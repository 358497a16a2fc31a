//! Configuration Module - TOML-based Monitor Configuration
//!
//! Loads and validates `scanners.toml` (monitor settings, rate
//! limiters, address maps, scanner definitions) and `queries.toml`
//! (the balance queries). `${VAR}` placeholders are filled from the
//! environment, so credentials never live in the files themselves.

pub mod loader;

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::adapters::rate_limit::RateLimiterOptions;
use crate::domain::{AssetQuery, Params};

/// Top-level monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Monitor identity and scheduling.
  pub monitor: MonitorConfig,
  /// Named shared rate limiters.
  #[serde(default)]
  pub rate_limiters: HashMap<String, RateLimiterOptions>,
  /// Per-chain code -> address tables.
  #[serde(default)]
  pub address_maps: BTreeMap<String, BTreeMap<String, String>>,
  /// Asset scanner definitions.
  #[serde(default)]
  pub asset_scanners: Vec<AssetScannerConfig>,
  /// Price scanner definitions.
  #[serde(default)]
  pub price_scanners: Vec<PriceScannerConfig>,
  #[serde(default)]
  pub persistence: PersistenceConfig,
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Monitor identity and scheduling.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
  /// Human-readable monitor name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Group for snapshots nobody else assigned.
  #[serde(default = "default_group")]
  pub default_group: String,
  /// Cron expression for `monitor` mode (5 or 6 fields).
  #[serde(default = "default_cron")]
  pub cron: String,
}

/// One `[[asset_scanners]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetScannerConfig {
  /// Scanner type; parsed when the scanner is registered.
  #[serde(rename = "type")]
  pub scanner_type: String,
  /// Explicit name. Defaults to `<type>` or `<type>:<chain>`.
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub chain: Option<String>,
  /// Key of a shared `[rate_limiters.<key>]` entry.
  #[serde(default)]
  pub rate_limiter: Option<String>,
  /// Inline limiter settings for a private limiter.
  #[serde(default)]
  pub rate_limit: Option<RateLimiterOptions>,
  #[serde(default)]
  pub params: Params,
}

/// One `[[price_scanners]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceScannerConfig {
  #[serde(rename = "type")]
  pub scanner_type: String,
  #[serde(default)]
  pub rate_limiter: Option<String>,
  #[serde(default)]
  pub rate_limit: Option<RateLimiterOptions>,
  #[serde(default)]
  pub params: Params,
  /// Asset code -> source identifier (e.g. `BTC = "bitcoin"`).
  #[serde(default)]
  pub code_map: BTreeMap<String, String>,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for the batch log and `latest.json`.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
    }
  }
}

/// Metrics and health endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Serve `/live`, `/ready` and `/metrics`.
  #[serde(default)]
  pub enabled: bool,
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      bind_address: default_metrics_addr(),
    }
  }
}

/// Contents of `queries.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueriesConfig {
  #[serde(default)]
  pub queries: Vec<AssetQuery>,
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_group() -> String {
  "default".to_string()
}

fn default_cron() -> String {
  "*/15 * * * *".to_string()
}

fn default_data_dir() -> String {
  "data".to_string()
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}
