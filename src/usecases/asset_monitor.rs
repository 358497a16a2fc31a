//! Asset Monitor - Scanner Registry and Scan Orchestration
//!
//! The top-level use case that:
//! 1. Builds asset and price scanners from configuration
//! 2. Routes each query to its named scanner
//! 3. Runs every enabled query concurrently, isolating failures
//! 4. Persists each cycle as a batch on a cron schedule
//!
//! A cron firing that lands while the previous cycle is still running
//! is skipped, never queued.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::adapters::metrics::MonitorMetrics;
use crate::adapters::rate_limit::{RateLimiter, RateLimiterOptions, RateLimiterRegistry};
use crate::adapters::sources;
use crate::config::{AppConfig, AssetScannerConfig, PriceScannerConfig};
use crate::domain::{AssetQuery, CodeAddressMap, CronSchedule, QueryFailure, ScanResult, ScannerType};
use crate::error::{ConfigError, ScanError};
use crate::ports::{Batch, BatchRepository, PriceLookup, SourceContext};

use super::asset_scanner::AssetScanner;
use super::contract::QUERY_TIMEOUT;
use super::price_aggregator::PriceAggregator;
use super::price_scanner::PriceScanner;

/// Orchestrator owning every scanner, query and limiter.
pub struct AssetMonitor {
  name: String,
  default_group: String,
  limiters: Arc<RateLimiterRegistry>,
  prices: Arc<PriceAggregator>,
  /// Code <-> address tables keyed by chain.
  address_maps: HashMap<String, Arc<CodeAddressMap>>,
  scanners: RwLock<BTreeMap<String, Arc<AssetScanner>>>,
  queries: RwLock<Vec<AssetQuery>>,
  metrics: Option<Arc<MonitorMetrics>>,
  /// Set while a scheduled cycle is running.
  scanning: Arc<AtomicBool>,
  query_timeout: Duration,
}

impl AssetMonitor {
  pub fn new(
    name: impl Into<String>,
    default_group: impl Into<String>,
    limiters: Arc<RateLimiterRegistry>,
  ) -> Self {
    Self {
      name: name.into(),
      default_group: default_group.into(),
      limiters,
      prices: Arc::new(PriceAggregator::new()),
      address_maps: HashMap::new(),
      scanners: RwLock::new(BTreeMap::new()),
      queries: RwLock::new(Vec::new()),
      metrics: None,
      scanning: Arc::new(AtomicBool::new(false)),
      query_timeout: QUERY_TIMEOUT,
    }
  }

  /// Build a monitor with every scanner from `config` registered.
  ///
  /// Price scanners are registered first so asset scanners can price
  /// their holdings from the start. Must be called inside a tokio
  /// runtime.
  pub fn from_config(
    config: &AppConfig,
    metrics: Option<Arc<MonitorMetrics>>,
  ) -> Result<Self, ConfigError> {
    let mut registry = RateLimiterRegistry::new(config.rate_limiters.clone());
    if let Some(metrics) = &metrics {
      registry = registry.with_metrics(Arc::clone(metrics));
    }

    let mut monitor = Self::new(
      &config.monitor.name,
      &config.monitor.default_group,
      Arc::new(registry),
    )
    .with_address_maps(&config.address_maps);
    if let Some(metrics) = metrics {
      monitor = monitor.with_metrics(metrics);
    }

    for price in &config.price_scanners {
      monitor.add_price_scanner(price)?;
    }
    for asset in &config.asset_scanners {
      monitor.add_asset_scanner(asset)?;
    }

    info!(
      monitor = %monitor.name,
      asset_scanners = config.asset_scanners.len(),
      price_scanners = config.price_scanners.len(),
      "Monitor configured"
    );
    Ok(monitor)
  }

  pub fn with_address_maps(mut self, maps: &BTreeMap<String, BTreeMap<String, String>>) -> Self {
    self.address_maps = maps
      .iter()
      .map(|(chain, pairs)| {
        let map: CodeAddressMap = pairs.iter().map(|(c, a)| (c.clone(), a.clone())).collect();
        (chain.clone(), Arc::new(map))
      })
      .collect();
    self
  }

  pub fn with_metrics(mut self, metrics: Arc<MonitorMetrics>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Timeout applied to scanners registered afterwards.
  pub fn with_query_timeout(mut self, limit: Duration) -> Self {
    self.query_timeout = limit;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn limiters(&self) -> &Arc<RateLimiterRegistry> {
    &self.limiters
  }

  pub fn prices(&self) -> &Arc<PriceAggregator> {
    &self.prices
  }

  /// Consensus price handle for asset sources.
  pub fn price_lookup(&self) -> Arc<dyn PriceLookup> {
    Arc::clone(&self.prices) as Arc<dyn PriceLookup>
  }

  /// Address table for `chain`; empty when none is configured.
  pub fn address_map(&self, chain: &str) -> Arc<CodeAddressMap> {
    self
      .address_maps
      .get(chain)
      .cloned()
      .unwrap_or_default()
  }

  pub fn scanner(&self, name: &str) -> Option<Arc<AssetScanner>> {
    self.scanners.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
  }

  pub fn scanner_names(&self) -> Vec<String> {
    self.scanners.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
  }

  pub fn query_count(&self) -> usize {
    self.queries.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_scanning(&self) -> bool {
    self.scanning.load(Ordering::SeqCst)
  }

  /// Register an asset scanner from its configuration entry.
  pub fn add_asset_scanner(&self, config: &AssetScannerConfig) -> Result<Arc<AssetScanner>, ConfigError> {
    let scanner_type: ScannerType = config.scanner_type.parse()?;
    let source = sources::asset_source(scanner_type, &config.params)?;
    let name = config
      .name
      .clone()
      .unwrap_or_else(|| derive_name(scanner_type, config.chain.as_deref()));
    let chain = config.chain.clone().unwrap_or_default();

    let mut scanners = self.scanners.write().unwrap_or_else(PoisonError::into_inner);
    if scanners.contains_key(&name) {
      return Err(ConfigError::DuplicateScanner(name));
    }

    let ctx = SourceContext {
      scanner: name.clone(),
      address_map: self.address_map(&chain),
      chain,
      params: config.params.clone(),
      limiter: self.limiter_for(&name, config.rate_limiter.as_deref(), config.rate_limit.as_ref()),
      prices: Some(self.price_lookup()),
    };
    let scanner = Arc::new(
      AssetScanner::new(scanner_type, source, ctx, self.default_group.clone())
        .with_query_timeout(self.query_timeout),
    );

    info!(scanner = %name, scanner_type = %scanner_type, "Asset scanner registered");
    scanners.insert(name, Arc::clone(&scanner));
    Ok(scanner)
  }

  /// Register a prebuilt asset scanner under its own name.
  pub fn insert_asset_scanner(&self, scanner: AssetScanner) -> Result<Arc<AssetScanner>, ConfigError> {
    let mut scanners = self.scanners.write().unwrap_or_else(PoisonError::into_inner);
    if scanners.contains_key(scanner.name()) {
      scanner.close();
      return Err(ConfigError::DuplicateScanner(scanner.name().to_string()));
    }
    let scanner = Arc::new(scanner);
    scanners.insert(scanner.name().to_string(), Arc::clone(&scanner));
    Ok(scanner)
  }

  /// Register a price scanner from its configuration entry.
  pub fn add_price_scanner(&self, config: &PriceScannerConfig) -> Result<Arc<PriceScanner>, ConfigError> {
    let scanner_type: ScannerType = config.scanner_type.parse()?;
    if self.prices.get_scanner(scanner_type).is_some() {
      return Err(ConfigError::DuplicatePriceScanner(scanner_type.to_string()));
    }
    let source = sources::price_source(scanner_type, &config.params)?;
    let name = scanner_type.to_string();

    let ctx = SourceContext {
      scanner: name.clone(),
      chain: String::new(),
      params: config.params.clone(),
      limiter: self.limiter_for(&name, config.rate_limiter.as_deref(), config.rate_limit.as_ref()),
      address_map: Arc::new(CodeAddressMap::new()),
      prices: None,
    };
    let scanner = PriceScanner::new(scanner_type, source, ctx, config.code_map.clone())
      .with_query_timeout(self.query_timeout);
    self.insert_price_scanner(scanner)
  }

  /// Register a prebuilt price scanner under its type.
  pub fn insert_price_scanner(&self, scanner: PriceScanner) -> Result<Arc<PriceScanner>, ConfigError> {
    let scanner = Arc::new(scanner);
    if let Err(e) = self.prices.add_price_scanner(Arc::clone(&scanner)) {
      scanner.close();
      return Err(e);
    }
    Ok(scanner)
  }

  /// Add a query; its scanner must already be registered.
  pub fn add_query(&self, query: AssetQuery) -> Result<(), ConfigError> {
    if self.scanner(&query.scanner).is_none() {
      return Err(ConfigError::ScannerNotFound {
        scanner: query.scanner,
        query_id: query.id,
      });
    }
    self.queries.write().unwrap_or_else(PoisonError::into_inner).push(query);
    Ok(())
  }

  /// Wait for every price and asset scanner to initialise.
  ///
  /// Missing required parameters and failed setup hooks surface here,
  /// before the first scan, as the first `InitFailed` found.
  pub async fn ready(&self) -> Result<(), ScanError> {
    self.prices.ready().await?;

    let scanners: Vec<_> = self
      .scanners
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();
    join_all(scanners.iter().map(|scanner| scanner.ready()))
      .await
      .into_iter()
      .collect::<Result<(), ScanError>>()?;

    info!(monitor = %self.name, scanners = scanners.len(), prices = self.prices.len(), "All scanners ready");
    Ok(())
  }

  /// Run every enabled query once, concurrently.
  ///
  /// A failing query never aborts the cycle; it is logged and recorded
  /// in `ScanResult::failures` next to the other queries' snapshots.
  #[instrument(skip(self), fields(monitor = %self.name))]
  pub async fn scan(&self) -> ScanResult {
    let started_at = Utc::now();

    let work: Vec<(AssetQuery, Option<Arc<AssetScanner>>)> = {
      let queries = self.queries.read().unwrap_or_else(PoisonError::into_inner);
      queries
        .iter()
        .filter(|q| q.enabled)
        .map(|q| (q.clone(), self.scanner(&q.scanner)))
        .collect()
    };

    info!(queries = work.len(), "Scan started");

    let outcomes = join_all(work.iter().map(|(query, scanner)| async move {
      match scanner {
        Some(scanner) => scanner.query(query).await.map_err(|e| e.to_string()),
        None => Err(format!("no scanner registered under '{}'", query.scanner)),
      }
    }))
    .await;

    let mut snapshots = Vec::new();
    let mut failures = Vec::new();
    for ((query, _), outcome) in work.iter().zip(outcomes) {
      match outcome {
        Ok(found) => snapshots.extend(found),
        Err(message) => {
          warn!(query_id = %query.id, scanner = %query.scanner, error = %message, "Query failed");
          if let Some(metrics) = &self.metrics {
            metrics.query_failures.with_label_values(&[query.scanner.as_str()]).inc();
          }
          failures.push(QueryFailure {
            query_id: query.id.clone(),
            scanner: query.scanner.clone(),
            error: message,
          });
        }
      }
    }

    let result = ScanResult::assemble(snapshots, failures, started_at, Utc::now());
    self.record(&result, work.len());

    info!(
      snapshots = result.snapshots.len(),
      failures = result.failures.len(),
      total_usd_value = result.total_usd_value,
      elapsed_ms = result.elapsed_ms,
      "Scan finished"
    );
    result
  }

  /// Scan once and persist the result. Persistence failure fails the cycle.
  pub async fn run_cycle(&self, repository: &dyn BatchRepository) -> Result<Batch> {
    let result = self.scan().await;
    repository
      .store_batch(&result)
      .await
      .context("Failed to store scan batch")
  }

  /// Run a cycle at every firing of `schedule` until shutdown.
  ///
  /// Waits for an in-flight cycle before returning.
  #[instrument(skip_all, fields(monitor = %self.name, cron = %schedule.expr()))]
  pub async fn monitor(
    self: Arc<Self>,
    schedule: CronSchedule,
    repository: Arc<dyn BatchRepository>,
    mut shutdown_rx: broadcast::Receiver<()>,
  ) -> Result<()> {
    info!("Monitor started");
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
      let now = Utc::now();
      let Some(next) = schedule.next_after(now) else {
        warn!("Cron schedule has no further firings, stopping monitor");
        break;
      };
      let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

      tokio::select! {
        _ = shutdown_rx.recv() => {
          info!("Shutdown signal received, stopping monitor");
          break;
        }
        _ = tokio::time::sleep(wait) => {}
      }

      let Some(guard) = CycleGuard::acquire(&self.scanning) else {
        warn!(firing = %next, "Previous scan still running, skipping firing");
        if let Some(metrics) = &self.metrics {
          metrics.skipped_firings.inc();
        }
        continue;
      };

      let monitor = Arc::clone(&self);
      let repository = Arc::clone(&repository);
      in_flight = Some(tokio::spawn(async move {
        let _guard = guard;
        if let Err(e) = monitor.run_cycle(repository.as_ref()).await {
          error!(error = %format!("{e:#}"), "Scan cycle failed");
        }
      }));
    }

    if let Some(handle) = in_flight.take() {
      if !handle.is_finished() {
        info!("Waiting for in-flight scan to finish");
      }
      if let Err(e) = handle.await {
        error!(error = %e, "Scan cycle task aborted");
      }
    }
    Ok(())
  }

  /// Close the aggregator, every scanner, then every limiter.
  pub async fn close(&self) {
    self.prices.close().await;

    let scanners: Vec<_> = self
      .scanners
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();
    join_all(scanners.iter().map(|scanner| async move { scanner.close() })).await;

    self.limiters.stop_all();
    info!(monitor = %self.name, "Monitor closed");
  }

  fn limiter_for(
    &self,
    scanner: &str,
    shared_key: Option<&str>,
    inline: Option<&RateLimiterOptions>,
  ) -> Arc<RateLimiter> {
    let options = inline.cloned().unwrap_or_default();
    match shared_key {
      Some(key) => self.limiters.get(key, &options),
      None => self.limiters.private(scanner, options),
    }
  }

  fn record(&self, result: &ScanResult, dispatched: usize) {
    let Some(metrics) = &self.metrics else {
      return;
    };
    let outcome = if result.is_complete() {
      "complete"
    } else if result.failures.len() == dispatched {
      "failed"
    } else {
      "partial"
    };
    metrics.scans_total.with_label_values(&[outcome]).inc();
    metrics.scan_duration_seconds.observe(result.elapsed_ms as f64 / 1000.0);
    metrics.total_usd_value.set(result.total_usd_value);
    metrics.snapshots.set(result.snapshots.len() as i64);
  }
}

impl std::fmt::Debug for AssetMonitor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AssetMonitor")
      .field("name", &self.name)
      .field("scanners", &self.scanner_names())
      .field("queries", &self.query_count())
      .finish()
  }
}

/// `<type>` or `<type>:<chain>`.
fn derive_name(scanner_type: ScannerType, chain: Option<&str>) -> String {
  match chain {
    Some(chain) if !chain.is_empty() => format!("{scanner_type}:{chain}"),
    _ => scanner_type.to_string(),
  }
}

/// Holds the in-flight flag for one scheduled cycle.
struct CycleGuard(Arc<AtomicBool>);

impl CycleGuard {
  fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
    if flag.swap(true, Ordering::SeqCst) {
      None
    } else {
      Some(Self(Arc::clone(flag)))
    }
  }
}

impl Drop for CycleGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}
