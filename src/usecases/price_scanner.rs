//! Price Scanner - Cached USD Prices from One Source
//!
//! One upstream call returns prices for every configured code. The
//! result is cached for `PRICE_CACHE_TTL`; cache misses that overlap
//! share the same in-flight fetch instead of each hitting the source.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::domain::ScannerType;
use crate::error::{PriceError, ScanError};
use crate::ports::{PriceSource, SourceContext};

use super::contract::{QUERY_TIMEOUT, run_watched};
use super::service::ServiceLifecycle;

/// How long a fetched price table is served without refetching.
pub const PRICE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Prices keyed by asset code.
type PriceTable = Arc<HashMap<String, f64>>;
type PendingFetch = Shared<BoxFuture<'static, Result<PriceTable, PriceError>>>;

enum CacheSlot {
  Empty,
  Fresh {
    prices: PriceTable,
    fetched_at: Instant,
  },
  Pending(PendingFetch),
}

/// One registered price scanner.
pub struct PriceScanner {
  scanner_type: ScannerType,
  source: Arc<dyn PriceSource>,
  ctx: Arc<SourceContext>,
  /// Asset code to source identifier (e.g. `BTC` -> `bitcoin`).
  code_map: Arc<BTreeMap<String, String>>,
  cache: Mutex<CacheSlot>,
  ttl: Duration,
  query_timeout: Duration,
  lifecycle: ServiceLifecycle,
}

impl PriceScanner {
  /// Build the scanner and start its initialisation in the background.
  pub fn new(
    scanner_type: ScannerType,
    source: Arc<dyn PriceSource>,
    ctx: SourceContext,
    code_map: BTreeMap<String, String>,
  ) -> Self {
    let ctx = Arc::new(ctx);
    let setup_source = Arc::clone(&source);
    let setup_ctx = Arc::clone(&ctx);

    let lifecycle = ServiceLifecycle::start(
      ctx.scanner.clone(),
      &ctx.params,
      source.required_params(),
      Arc::clone(&ctx.limiter),
      async move { setup_source.setup(&setup_ctx).await },
    );

    Self {
      scanner_type,
      source,
      ctx,
      code_map: Arc::new(code_map),
      cache: Mutex::new(CacheSlot::Empty),
      ttl: PRICE_CACHE_TTL,
      query_timeout: QUERY_TIMEOUT,
      lifecycle,
    }
  }

  pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_query_timeout(mut self, limit: Duration) -> Self {
    self.query_timeout = limit;
    self
  }

  pub fn name(&self) -> &str {
    self.lifecycle.name()
  }

  pub fn scanner_type(&self) -> ScannerType {
    self.scanner_type
  }

  /// Wait for initialisation.
  pub async fn ready(&self) -> Result<(), ScanError> {
    self.lifecycle.ready().await
  }

  /// USD price for `code`, or `None` when this source has no price.
  ///
  /// Codes outside a non-empty code map are answered without a fetch.
  /// Non-positive and non-finite prices count as "no price".
  #[instrument(skip(self), fields(scanner = %self.name()))]
  pub async fn get_price(&self, code: &str) -> Result<Option<f64>, PriceError> {
    self.lifecycle.ready().await.map_err(|e| self.failed(e))?;

    if !self.code_map.is_empty() && !self.code_map.contains_key(code) {
      return Ok(None);
    }

    let prices = self.prices().await?;
    Ok(prices.get(code).copied().filter(|p| p.is_finite() && *p > 0.0))
  }

  /// Close the scanner and drop any cached prices.
  pub fn close(&self) -> bool {
    *self.lock_cache() = CacheSlot::Empty;
    self.lifecycle.close()
  }

  async fn prices(&self) -> Result<PriceTable, PriceError> {
    let pending = {
      let mut slot = self.lock_cache();
      match &*slot {
        CacheSlot::Fresh { prices, fetched_at } if fetched_at.elapsed() < self.ttl => {
          return Ok(Arc::clone(prices));
        }
        CacheSlot::Pending(fetch) => fetch.clone(),
        _ => {
          let fetch = self.start_fetch();
          *slot = CacheSlot::Pending(fetch.clone());
          fetch
        }
      }
    };

    let outcome = pending.await;

    let mut slot = self.lock_cache();
    if matches!(*slot, CacheSlot::Pending(_)) {
      *slot = match &outcome {
        Ok(prices) => CacheSlot::Fresh {
          prices: Arc::clone(prices),
          fetched_at: Instant::now(),
        },
        Err(_) => CacheSlot::Empty,
      };
    }
    outcome
  }

  fn start_fetch(&self) -> PendingFetch {
    let source = Arc::clone(&self.source);
    let ctx = Arc::clone(&self.ctx);
    let code_map = Arc::clone(&self.code_map);
    let limit = self.query_timeout;

    async move {
      let scanner = ctx.scanner.clone();
      let limiter = Arc::clone(&ctx.limiter);
      let ids: Vec<String> = code_map.values().cloned().collect();

      let job = {
        let ctx = Arc::clone(&ctx);
        move || {
          let source = Arc::clone(&source);
          let ctx = Arc::clone(&ctx);
          let ids = ids.clone();
          async move { source.fetch_prices(&ids, &ctx).await }
        }
      };

      let by_id = run_watched(&scanner, "fetch_prices", limit, async {
        limiter
          .exec_named("fetch_prices", job)
          .await
          .map_err(anyhow::Error::from)
      })
      .await
      .map_err(|e| {
        warn!(scanner = %scanner, error = %e, "Price fetch failed");
        PriceError::FetchFailed {
          scanner: scanner.clone(),
          message: e.to_string(),
        }
      })?;

      let prices = by_code(&code_map, by_id);
      debug!(scanner = %scanner, prices = prices.len(), "Price table refreshed");
      Ok(Arc::new(prices))
    }
    .boxed()
    .shared()
  }

  fn lock_cache(&self) -> std::sync::MutexGuard<'_, CacheSlot> {
    self.cache.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn failed(&self, error: impl std::fmt::Display) -> PriceError {
    PriceError::FetchFailed {
      scanner: self.name().to_string(),
      message: error.to_string(),
    }
  }
}

/// Re-key a source answer from source identifiers to asset codes.
fn by_code(code_map: &BTreeMap<String, String>, by_id: HashMap<String, f64>) -> HashMap<String, f64> {
  if code_map.is_empty() {
    return by_id;
  }
  code_map
    .iter()
    .filter_map(|(code, id)| by_id.get(id).map(|price| (code.clone(), *price)))
    .collect()
}

impl std::fmt::Debug for PriceScanner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PriceScanner")
      .field("name", &self.name())
      .field("type", &self.scanner_type)
      .field("codes", &self.code_map.len())
      .finish()
  }
}
