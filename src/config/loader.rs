//! Configuration Loader - File Loading, Interpolation and Validation
//!
//! Handles loading `scanners.toml` and `queries.toml`, substituting
//! `${VAR}` placeholders from the environment, and providing clear
//! error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{AppConfig, QueriesConfig};
use crate::domain::{AssetQuery, CronSchedule};

/// Load and validate the scanner configuration from a TOML file.
///
/// Runs before logging is initialised, so it logs nothing itself.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - A `${VAR}` placeholder names an unset variable
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
  let path = path.as_ref();
  let content = read_interpolated(path)?;
  let config = parse_config(&content)
    .with_context(|| format!("Invalid config file: {}", path.display()))?;
  Ok(config)
}

/// Load the query list, assigning `<scanner>-<index>` ids where missing.
pub fn load_queries(path: impl AsRef<Path>) -> Result<Vec<AssetQuery>> {
  let path = path.as_ref();
  let content = read_interpolated(path)?;
  let queries = parse_queries(&content)
    .with_context(|| format!("Invalid queries file: {}", path.display()))?;

  info!(queries = queries.len(), "Queries loaded");
  Ok(queries)
}

/// Parse and validate already-interpolated config text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse scanner config")?;
  validate_config(&config)?;
  Ok(config)
}

/// Parse already-interpolated query text.
pub fn parse_queries(content: &str) -> Result<Vec<AssetQuery>> {
  let parsed: QueriesConfig = toml::from_str(content).context("Failed to parse queries")?;

  let mut queries = parsed.queries;
  for (index, query) in queries.iter_mut().enumerate() {
    anyhow::ensure!(
      !query.scanner.is_empty(),
      "Query {index} has an empty scanner name"
    );
    if query.id.is_empty() {
      query.id = format!("{}-{index}", query.scanner);
    }
  }

  let mut seen = HashSet::new();
  for query in &queries {
    anyhow::ensure!(seen.insert(query.id.as_str()), "Duplicate query id '{}'", query.id);
  }

  Ok(queries)
}

fn read_interpolated(path: &Path) -> Result<String> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read {}", path.display()))?;
  interpolate(&raw).with_context(|| format!("Failed to interpolate {}", path.display()))
}

/// Replace `${VAR}` placeholders with environment values.
pub fn interpolate(raw: &str) -> Result<String> {
  shellexpand::env(raw)
    .map(|expanded| expanded.into_owned())
    .map_err(|e| anyhow::anyhow!("environment variable {} is not set: {}", e.var_name, e.cause))
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - A parseable cron expression
/// - Sensible rate limiter settings
/// - Scanner references to configured rate limiters
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(!config.monitor.name.is_empty(), "monitor.name must not be empty");
  CronSchedule::parse(&config.monitor.cron)?;

  for (key, options) in &config.rate_limiters {
    if let Some(cps) = options.calls_per_second {
      anyhow::ensure!(
        cps.is_finite() && cps >= 0.0,
        "rate_limiters.{key}.calls_per_second must be a non-negative number, got {cps}"
      );
    }
  }

  let limiter_refs = config
    .asset_scanners
    .iter()
    .map(|s| (&s.scanner_type, &s.rate_limiter))
    .chain(config.price_scanners.iter().map(|s| (&s.scanner_type, &s.rate_limiter)));
  for (scanner_type, limiter) in limiter_refs {
    anyhow::ensure!(!scanner_type.is_empty(), "Scanner entry with an empty type");
    if let Some(key) = limiter {
      anyhow::ensure!(
        config.rate_limiters.contains_key(key),
        "Scanner '{scanner_type}' references unknown rate limiter '{key}'"
      );
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const CONFIG: &str = r#"
    [monitor]
    name = "family-office"
    cron = "0 * * * *"

    [rate_limiters.coingecko]
    calls_per_second = 0.5
    retry_count = 4

    [address_maps.ethereum]
    USDC = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"

    [[asset_scanners]]
    type = "manual"
    chain = "ethereum"

    [[price_scanners]]
    type = "coingecko"
    rate_limiter = "coingecko"
    code_map = { BTC = "bitcoin", ETH = "ethereum" }

    [[price_scanners]]
    type = "fixed"
    params = { prices = { USDC = 1.0 } }
  "#;

  #[test]
  fn test_load_nonexistent_file() {
    assert!(load_config("nonexistent.toml").is_err());
  }

  #[test]
  fn test_load_config_and_queries_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("scanners.toml");
    let queries_path = dir.path().join("queries.toml");
    std::fs::write(&config_path, CONFIG).unwrap();
    std::fs::write(&queries_path, "[[queries]]\nscanner = \"manual\"\n").unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.price_scanners.len(), 2);
    let queries = load_queries(&queries_path).unwrap();
    assert_eq!(queries[0].id, "manual-0");
  }

  #[test]
  fn test_parse_full_config() {
    let config = parse_config(CONFIG).unwrap();
    assert_eq!(config.monitor.default_group, "default");
    assert_eq!(config.rate_limiters["coingecko"].retry_count, 4);
    assert_eq!(config.rate_limiters["coingecko"].pause_ms, 1000);
    assert_eq!(config.price_scanners[0].code_map["BTC"], "bitcoin");
    assert!(config.price_scanners[1].params.contains_key("prices"));
    assert_eq!(config.persistence.data_dir, "data");
    assert!(!config.metrics.enabled);
  }

  #[test]
  fn test_unknown_limiter_reference_rejected() {
    let broken = CONFIG.replace("rate_limiter = \"coingecko\"", "rate_limiter = \"missing\"");
    let err = parse_config(&broken).unwrap_err();
    assert!(format!("{err:#}").contains("missing"));
  }

  #[test]
  fn test_bad_cron_rejected() {
    let broken = CONFIG.replace("0 * * * *", "every hour");
    assert!(parse_config(&broken).is_err());
  }

  #[test]
  fn test_query_ids_derived() {
    let queries = parse_queries(
      r#"
        [[queries]]
        scanner = "manual:ethereum"
        address = "0xabc"

        [[queries]]
        id = "treasury"
        scanner = "manual:ethereum"
        enabled = false
      "#,
    )
    .unwrap();

    assert_eq!(queries[0].id, "manual:ethereum-0");
    assert!(queries[0].enabled);
    assert_eq!(queries[1].id, "treasury");
    assert!(!queries[1].enabled);
  }

  #[test]
  fn test_duplicate_query_ids_rejected() {
    let err = parse_queries(
      r#"
        [[queries]]
        id = "a"
        scanner = "manual"

        [[queries]]
        id = "a"
        scanner = "manual"
      "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("Duplicate"));
  }

  #[test]
  fn test_interpolation() {
    // SAFETY: test-local variable name, no other thread reads it.
    unsafe { std::env::set_var("ASSET_MONITOR_TEST_KEY", "s3cret") };
    let out = interpolate("api_key = \"${ASSET_MONITOR_TEST_KEY}\"").unwrap();
    assert_eq!(out, "api_key = \"s3cret\"");

    assert!(interpolate("x = \"${ASSET_MONITOR_SURELY_UNSET_VAR}\"").is_err());
  }
}
