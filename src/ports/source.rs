//! Source Ports - Asset and Price Scanner Plugin Interfaces
//!
//! A source only knows how to fetch raw data from one external system.
//! Validation, timeouts, caching and result attribution live in the
//! scanner wrappers in `crate::usecases`, so every source gets them
//! uniformly.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::adapters::rate_limit::RateLimiter;
use crate::domain::{AssetQuery, CodeAddressMap, Params, RawAsset};
use crate::error::PriceError;

/// Consensus USD price lookup available to asset sources.
#[async_trait]
pub trait PriceLookup: Send + Sync + 'static {
    async fn usd_price(&self, code: &str) -> Result<f64, PriceError>;
}

/// Everything a source may use while fetching.
pub struct SourceContext {
    /// Registered scanner name, for logs and errors.
    pub scanner: String,
    /// Chain the scanner was configured for.
    pub chain: String,
    /// Scanner parameters from configuration.
    pub params: Params,
    /// Limiter every remote call must go through.
    pub limiter: Arc<RateLimiter>,
    /// Code ↔ address table for `chain`.
    pub address_map: Arc<CodeAddressMap>,
    /// Consensus prices; absent for price sources themselves.
    pub prices: Option<Arc<dyn PriceLookup>>,
}

impl SourceContext {
    /// String parameter, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Deserialize a required parameter.
    pub fn require_param<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .params
            .get(key)
            .with_context(|| format!("{}: missing parameter '{key}'", self.scanner))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("{}: invalid parameter '{key}'", self.scanner))
    }

    /// Price lookup handle; errors for price sources.
    pub fn price_lookup(&self) -> Result<&Arc<dyn PriceLookup>> {
        self.prices
            .as_ref()
            .with_context(|| format!("{}: no price lookup available", self.scanner))
    }
}

impl std::fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceContext")
            .field("scanner", &self.scanner)
            .field("chain", &self.chain)
            .field("limiter", &self.limiter.key())
            .field("address_map", &self.address_map.len())
            .finish()
    }
}

/// A plugin fetching holdings from one external system.
#[async_trait]
pub trait AssetSource: Send + Sync + 'static {
    /// Scanner parameters that must be present at construction.
    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    /// Query keys that must be present and non-null on every query.
    ///
    /// `None` means the source never declared them; queries then run
    /// with a warning instead of being rejected.
    fn required_query_keys(&self) -> Option<&'static [&'static str]>;

    /// One-time async setup run during scanner initialisation.
    async fn setup(&self, _ctx: &SourceContext) -> Result<()> {
        Ok(())
    }

    /// Fetch the raw holdings for one query.
    async fn fetch(&self, query: &AssetQuery, ctx: &SourceContext) -> Result<Vec<RawAsset>>;
}

/// A plugin fetching USD prices from one external system.
#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn setup(&self, _ctx: &SourceContext) -> Result<()> {
        Ok(())
    }

    /// Fetch prices keyed by source identifier.
    ///
    /// `ids` are the identifiers from the scanner's code map. When the
    /// map is empty `ids` is empty and the source returns everything it
    /// tracks, keyed by asset code. A missing key means "no price".
    async fn fetch_prices(&self, ids: &[String], ctx: &SourceContext) -> Result<HashMap<String, f64>>;
}
