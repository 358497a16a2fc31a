//! Manual Asset Source - Holdings Declared on the Query
//!
//! Each query carries a `holdings` list in its `params`. Holdings name
//! an asset by `code` or by `token` address (resolved through the
//! scanner chain's address map) and are valued at the consensus USD
//! price unless an explicit `usd_price` is given.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{AssetQuery, AssetState, AssetType, RawAsset, TagMap};
use crate::ports::{AssetSource, SourceContext};

const QUERY_KEYS: &[&str] = &["holdings"];

/// One declared holding.
#[derive(Debug, Clone, Deserialize)]
struct Holding {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    token: Option<String>,
    quantity: f64,
    #[serde(default, rename = "type")]
    asset_type: AssetType,
    #[serde(default)]
    state: AssetState,
    /// Fixed valuation; skips the price lookup.
    #[serde(default)]
    usd_price: Option<f64>,
    #[serde(default)]
    tags: TagMap,
}

/// Asset source reading holdings straight from query parameters.
#[derive(Debug, Default)]
pub struct ManualSource;

impl ManualSource {
    pub fn new() -> Self {
        Self
    }

    fn resolve_code(holding: &Holding, ctx: &SourceContext) -> Result<String> {
        if let Some(code) = &holding.code {
            return Ok(code.clone());
        }
        let Some(token) = &holding.token else {
            bail!("holding has neither 'code' nor 'token'");
        };
        ctx.address_map
            .code_of(token)
            .map(str::to_string)
            .with_context(|| format!("token {token} is not in the {} address map", ctx.chain))
    }
}

#[async_trait]
impl AssetSource for ManualSource {
    fn required_query_keys(&self) -> Option<&'static [&'static str]> {
        Some(QUERY_KEYS)
    }

    async fn fetch(&self, query: &AssetQuery, ctx: &SourceContext) -> Result<Vec<RawAsset>> {
        let holdings: Vec<Holding> = query
            .params
            .get("holdings")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .with_context(|| format!("query {}: invalid 'holdings'", query.id))?
            .unwrap_or_default();

        let mut assets = Vec::with_capacity(holdings.len());
        for holding in holdings {
            let code = Self::resolve_code(&holding, ctx)
                .with_context(|| format!("query {}", query.id))?;

            let price = match holding.usd_price {
                Some(price) => price,
                None => ctx
                    .price_lookup()?
                    .usd_price(&code)
                    .await
                    .with_context(|| format!("query {}: pricing {code}", query.id))?,
            };

            let mut asset = RawAsset::new(code, holding.quantity, price)
                .with_type(holding.asset_type)
                .with_state(holding.state);
            asset.tags = holding.tags;
            if let Some(token) = holding.token {
                asset.tags.entry("token".to_string()).or_insert(token);
            }
            assets.push(asset);
        }

        debug!(scanner = %ctx.scanner, query_id = %query.id, holdings = assets.len(), "Manual holdings read");
        Ok(assets)
    }
}
