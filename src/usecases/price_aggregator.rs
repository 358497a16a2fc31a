//! Price Aggregator - Consensus USD Price Across Price Scanners
//!
//! Every registered price scanner is asked concurrently. Scanners
//! without a price for the code are left out; the consensus price is
//! the arithmetic mean of what remains. A failing scanner fails the
//! lookup.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::domain::ScannerType;
use crate::error::{ConfigError, PriceError, ScanError};
use crate::ports::PriceLookup;

use super::price_scanner::PriceScanner;

/// Registry of price scanners, one per scanner type.
#[derive(Default)]
pub struct PriceAggregator {
  scanners: RwLock<BTreeMap<ScannerType, Arc<PriceScanner>>>,
}

impl PriceAggregator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `scanner` under its type.
  pub fn add_price_scanner(&self, scanner: Arc<PriceScanner>) -> Result<(), ConfigError> {
    let scanner_type = scanner.scanner_type();
    let mut scanners = self.scanners.write().unwrap_or_else(PoisonError::into_inner);
    if scanners.contains_key(&scanner_type) {
      return Err(ConfigError::DuplicatePriceScanner(scanner_type.to_string()));
    }
    info!(scanner = %scanner.name(), "Price scanner registered");
    scanners.insert(scanner_type, scanner);
    Ok(())
  }

  pub fn get_scanner(&self, scanner_type: ScannerType) -> Option<Arc<PriceScanner>> {
    self
      .scanners
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&scanner_type)
      .cloned()
  }

  pub fn len(&self) -> usize {
    self.scanners.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Mean USD price of `code` across every scanner that has one.
  ///
  /// Any scanner error rejects the lookup so a valuation never rests
  /// on fewer sources than configured without a trace.
  pub async fn get_price(&self, code: &str) -> Result<f64, PriceError> {
    let scanners: Vec<_> = self
      .scanners
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();

    let answers = join_all(scanners.iter().map(|scanner| scanner.get_price(code))).await;

    let mut prices = Vec::with_capacity(answers.len());
    for (scanner, answer) in scanners.iter().zip(answers) {
      match answer {
        Ok(Some(price)) => prices.push(price),
        Ok(None) => {}
        Err(e) => {
          warn!(
            scanner = %scanner.name(),
            code = %code,
            error = %e,
            "Price scanner failed, rejecting lookup"
          );
          return Err(e);
        }
      }
    }

    let price = mean(&prices).ok_or_else(|| PriceError::NoValidPrice {
      code: code.to_string(),
    })?;
    debug!(code = %code, sources = prices.len(), price, "Consensus price");
    Ok(price)
  }

  /// Wait for every scanner to finish initialising.
  ///
  /// Returns the first initialisation failure.
  pub async fn ready(&self) -> Result<(), ScanError> {
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
      .collect()
  }

  /// Close every scanner. Safe to call more than once.
  pub async fn close(&self) {
    let scanners: Vec<_> = self
      .scanners
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();
    join_all(scanners.iter().map(|scanner| async move { scanner.close() })).await;
  }
}

#[async_trait]
impl PriceLookup for PriceAggregator {
  async fn usd_price(&self, code: &str) -> Result<f64, PriceError> {
    self.get_price(code).await
  }
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
  if values.is_empty() {
    return None;
  }
  Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use anyhow::Result;

  use super::*;
  use crate::adapters::rate_limit::{RateLimiter, RateLimiterOptions};
  use crate::domain::{CodeAddressMap, Params};
  use crate::ports::{PriceSource, SourceContext};

  struct TableSource(Option<HashMap<String, f64>>);

  #[async_trait]
  impl PriceSource for TableSource {
    async fn fetch_prices(&self, _ids: &[String], _ctx: &SourceContext) -> Result<HashMap<String, f64>> {
      self.0.clone().ok_or_else(|| anyhow::anyhow!("source offline"))
    }
  }

  fn scanner(scanner_type: ScannerType, table: Option<&[(&str, f64)]>) -> Arc<PriceScanner> {
    let ctx = SourceContext {
      scanner: scanner_type.to_string(),
      chain: String::new(),
      params: Params::new(),
      limiter: Arc::new(RateLimiter::new(scanner_type.as_str(), RateLimiterOptions::default())),
      address_map: Arc::new(CodeAddressMap::new()),
      prices: None,
    };
    let table = table.map(|rows| rows.iter().map(|(c, p)| (c.to_string(), *p)).collect());
    Arc::new(PriceScanner::new(
      scanner_type,
      Arc::new(TableSource(table)),
      ctx,
      BTreeMap::new(),
    ))
  }

  #[tokio::test]
  async fn test_mean_of_available_prices() {
    let aggregator = PriceAggregator::new();
    aggregator
      .add_price_scanner(scanner(ScannerType::Fixed, Some(&[("ETH", 2000.0)])))
      .unwrap();
    aggregator
      .add_price_scanner(scanner(ScannerType::Coingecko, Some(&[("ETH", 2100.0)])))
      .unwrap();
    aggregator
      .add_price_scanner(scanner(ScannerType::Coinmarketcap, Some(&[("BTC", 1.0)])))
      .unwrap();

    assert_eq!(aggregator.get_price("ETH").await.unwrap(), 2050.0);
  }

  #[tokio::test]
  async fn test_failing_scanner_rejects_lookup() {
    let aggregator = PriceAggregator::new();
    aggregator
      .add_price_scanner(scanner(ScannerType::Fixed, Some(&[("ETH", 2000.0)])))
      .unwrap();
    aggregator
      .add_price_scanner(scanner(ScannerType::Coingecko, None))
      .unwrap();

    let err = aggregator.get_price("ETH").await.unwrap_err();
    assert!(matches!(err, PriceError::FetchFailed { ref message, .. } if message.contains("source offline")));
  }

  #[tokio::test]
  async fn test_scanner_without_price_is_excluded() {
    let aggregator = PriceAggregator::new();
    aggregator
      .add_price_scanner(scanner(ScannerType::Fixed, Some(&[("ETH", 2000.0)])))
      .unwrap();
    aggregator
      .add_price_scanner(scanner(ScannerType::Coingecko, Some(&[("BTC", 60_000.0)])))
      .unwrap();

    assert_eq!(aggregator.get_price("ETH").await.unwrap(), 2000.0);
  }

  #[tokio::test]
  async fn test_ready_reports_init_failure() {
    let aggregator = PriceAggregator::new();
    aggregator
      .add_price_scanner(scanner(ScannerType::Fixed, Some(&[("ETH", 2000.0)])))
      .unwrap();
    assert!(aggregator.ready().await.is_ok());

    let ctx = SourceContext {
      scanner: "fixed-empty".into(),
      chain: String::new(),
      params: Params::new(),
      limiter: Arc::new(RateLimiter::new("fixed-empty", RateLimiterOptions::default())),
      address_map: Arc::new(CodeAddressMap::new()),
      prices: None,
    };
    let source = crate::adapters::sources::FixedPriceSource::from_params(&Params::new()).unwrap();
    aggregator
      .add_price_scanner(Arc::new(PriceScanner::new(
        ScannerType::Coingecko,
        Arc::new(source),
        ctx,
        BTreeMap::new(),
      )))
      .unwrap();

    let err = aggregator.ready().await.unwrap_err();
    assert!(matches!(err, ScanError::InitFailed { ref message, .. } if message.contains("prices")));
  }

  #[tokio::test]
  async fn test_no_price_is_an_error() {
    let aggregator = PriceAggregator::new();
    aggregator
      .add_price_scanner(scanner(ScannerType::Fixed, Some(&[("ETH", 2000.0)])))
      .unwrap();

    let err = aggregator.get_price("XYZ").await.unwrap_err();
    assert!(matches!(err, PriceError::NoValidPrice { ref code } if code == "XYZ"));
  }

  #[tokio::test]
  async fn test_duplicate_type_rejected() {
    let aggregator = PriceAggregator::new();
    aggregator
      .add_price_scanner(scanner(ScannerType::Fixed, Some(&[])))
      .unwrap();
    let err = aggregator
      .add_price_scanner(scanner(ScannerType::Fixed, Some(&[])))
      .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicatePriceScanner(_)));
    assert!(aggregator.get_scanner(ScannerType::Fixed).is_some());
    assert!(aggregator.get_scanner(ScannerType::Coingecko).is_none());
  }

  #[tokio::test]
  async fn test_close_twice_is_safe() {
    let aggregator = PriceAggregator::new();
    aggregator
      .add_price_scanner(scanner(ScannerType::Fixed, Some(&[("ETH", 1.0)])))
      .unwrap();
    aggregator.close().await;
    aggregator.close().await;
    assert!(aggregator.get_price("ETH").await.is_err());
  }

  #[test]
  fn test_mean() {
    assert_eq!(mean(&[]), None);
    assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
  }
}
