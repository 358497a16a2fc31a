//! Asset Scanner - Query Execution for One Registered Source
//!
//! Wraps an `AssetSource` with the lifecycle and query contract:
//! 1. Await initialisation
//! 2. Validate the query's required keys
//! 3. Fetch under the query timeout with stuck-logging
//! 4. Normalize raw holdings into attributed snapshots

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::domain::{AssetQuery, AssetSnapshot, NormalizeDefaults, ScannerType, normalize};
use crate::error::ScanError;
use crate::ports::{AssetSource, SourceContext};

use super::contract::{QUERY_TIMEOUT, run_watched, validate_query};
use super::service::ServiceLifecycle;

/// One registered asset scanner.
pub struct AssetScanner {
  scanner_type: ScannerType,
  source: Arc<dyn AssetSource>,
  ctx: Arc<SourceContext>,
  /// Group applied when neither the result nor the query sets one.
  default_group: String,
  lifecycle: ServiceLifecycle,
  query_timeout: Duration,
}

impl AssetScanner {
  /// Build the scanner and start its initialisation in the background.
  pub fn new(
    scanner_type: ScannerType,
    source: Arc<dyn AssetSource>,
    ctx: SourceContext,
    default_group: impl Into<String>,
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
      default_group: default_group.into(),
      lifecycle,
      query_timeout: QUERY_TIMEOUT,
    }
  }

  /// Override the per-query timeout.
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

  pub fn chain(&self) -> &str {
    &self.ctx.chain
  }

  pub async fn ready(&self) -> Result<(), ScanError> {
    self.lifecycle.ready().await
  }

  /// Run one query and return its attributed snapshots.
  ///
  /// Holdings with a non-positive quantity are dropped, so an empty
  /// list is a valid answer.
  #[instrument(skip(self, query), fields(scanner = %self.name(), query_id = %query.id))]
  pub async fn query(&self, query: &AssetQuery) -> Result<Vec<AssetSnapshot>, ScanError> {
    self.lifecycle.ready().await?;
    validate_query(self.name(), self.source.required_query_keys(), query)?;

    let raw = run_watched(
      self.name(),
      &query.id,
      self.query_timeout,
      self.source.fetch(query, &self.ctx),
    )
    .await?;

    let fetched = raw.len();
    let captured_at = Utc::now();
    let defaults = NormalizeDefaults {
      chain: &self.ctx.chain,
      group: &self.default_group,
    };
    let snapshots: Vec<_> = raw
      .into_iter()
      .filter_map(|asset| normalize(asset, query, defaults, captured_at))
      .collect();

    debug!(
      fetched,
      kept = snapshots.len(),
      "Query normalized"
    );
    Ok(snapshots)
  }

  /// Close the scanner. Returns `false` when already closed.
  pub fn close(&self) -> bool {
    self.lifecycle.close()
  }
}

impl std::fmt::Debug for AssetScanner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AssetScanner")
      .field("name", &self.name())
      .field("type", &self.scanner_type)
      .field("chain", &self.ctx.chain)
      .finish()
  }
}
