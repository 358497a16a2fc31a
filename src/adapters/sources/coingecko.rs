//! CoinGecko Price Source - `simple/price` REST Endpoint
//!
//! One request per cache refresh, covering every id in the scanner's
//! code map. Throttling and retries come from the scanner's limiter.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::domain::Params;
use crate::error::ConfigError;
use crate::ports::{PriceSource, SourceContext};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const DEFAULT_API_KEY_HEADER: &str = "x-cg-demo-api-key";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// `{ "bitcoin": { "usd": 61234.5 } }`
type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

/// CoinGecko HTTP price source.
#[derive(Debug, Clone)]
pub struct CoinGeckoSource {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_key_header: String,
}

impl CoinGeckoSource {
    /// Build from scanner parameters: `base_url`, `api_key`,
    /// `api_key_header`, `timeout_ms`, all optional.
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let string = |key: &str| params.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let timeout_ms = match params.get("timeout_ms") {
            None => DEFAULT_TIMEOUT_MS,
            Some(value) => value.as_u64().ok_or_else(|| invalid("timeout_ms", "expected a positive integer"))?,
        };

        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| invalid("timeout_ms", &e.to_string()))?;

        Ok(Self {
            http,
            base_url: string("base_url")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: string("api_key"),
            api_key_header: string("api_key_header").unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        component: "coingecko".to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn fetch_prices(&self, ids: &[String], ctx: &SourceContext) -> Result<HashMap<String, f64>> {
        if ids.is_empty() {
            warn!(scanner = %ctx.scanner, "No code_map configured, nothing to price");
            return Ok(HashMap::new());
        }

        let url = format!("{}/simple/price", self.base_url);
        let mut request = self
            .http
            .get(&url)
            .query(&[("ids", ids.join(",")), ("vs_currencies", "usd".to_string())]);
        if let Some(key) = &self.api_key {
            request = request.header(self.api_key_header.as_str(), key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?;

        let body: SimplePriceResponse = response
            .json()
            .await
            .context("Failed to decode simple/price response")?;

        let prices: HashMap<String, f64> = body
            .into_iter()
            .filter_map(|(id, quotes)| quotes.get("usd").map(|usd| (id, *usd)))
            .collect();

        debug!(scanner = %ctx.scanner, requested = ids.len(), priced = prices.len(), "CoinGecko prices fetched");
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults() {
        let source = CoinGeckoSource::from_params(&Params::new()).unwrap();
        assert_eq!(source.base_url(), DEFAULT_BASE_URL);
        assert!(source.api_key.is_none());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let params = Params::from([("base_url".to_string(), json!("http://localhost:9000/api/"))]);
        let source = CoinGeckoSource::from_params(&params).unwrap();
        assert_eq!(source.base_url(), "http://localhost:9000/api");
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let params = Params::from([("timeout_ms".to_string(), json!("soon"))]);
        assert!(matches!(
            CoinGeckoSource::from_params(&params),
            Err(ConfigError::InvalidParameter { ref key, .. }) if key == "timeout_ms"
        ));
    }

    #[test]
    fn test_response_shape() {
        let body: SimplePriceResponse =
            serde_json::from_value(json!({ "bitcoin": { "usd": 60000.5 }, "ethereum": {} })).unwrap();
        assert_eq!(body["bitcoin"]["usd"], 60000.5);
        assert!(body["ethereum"].is_empty());
    }
}
