//! Fixed Price Source - Static Price Table from Configuration

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::Params;
use crate::error::ConfigError;
use crate::ports::{PriceSource, SourceContext};

const REQUIRED_PARAMS: &[&str] = &["prices"];

/// Price source answering from the `prices` parameter.
#[derive(Debug, Clone, Default)]
pub struct FixedPriceSource {
    prices: HashMap<String, f64>,
}

impl FixedPriceSource {
    /// Parse the `prices` table. An absent table is reported by scanner
    /// initialisation, not here.
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let Some(value) = params.get("prices") else {
            return Ok(Self::default());
        };
        let prices: HashMap<String, f64> =
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidParameter {
                component: "fixed".to_string(),
                key: "prices".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { prices })
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    fn required_params(&self) -> &'static [&'static str] {
        REQUIRED_PARAMS
    }

    async fn fetch_prices(&self, ids: &[String], _ctx: &SourceContext) -> Result<HashMap<String, f64>> {
        if ids.is_empty() {
            return Ok(self.prices.clone());
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.prices.get(id).map(|price| (id.clone(), *price)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::adapters::rate_limit::{RateLimiter, RateLimiterOptions};
    use crate::domain::CodeAddressMap;

    fn ctx() -> SourceContext {
        SourceContext {
            scanner: "fixed".into(),
            chain: String::new(),
            params: Params::new(),
            limiter: Arc::new(RateLimiter::new("fixed", RateLimiterOptions::default())),
            address_map: Arc::new(CodeAddressMap::new()),
            prices: None,
        }
    }

    #[tokio::test]
    async fn test_filters_by_requested_ids() {
        let params = Params::from([("prices".to_string(), json!({ "USDC": 1.0, "EUR": 1.08 }))]);
        let source = FixedPriceSource::from_params(&params).unwrap();

        let all = source.fetch_prices(&[], &ctx()).await.unwrap();
        assert_eq!(all.len(), 2);

        let some = source.fetch_prices(&["EUR".to_string(), "JPY".to_string()], &ctx()).await.unwrap();
        assert_eq!(some, HashMap::from([("EUR".to_string(), 1.08)]));
    }

    #[test]
    fn test_malformed_table_rejected() {
        let params = Params::from([("prices".to_string(), json!(["USDC", 1.0]))]);
        assert!(matches!(
            FixedPriceSource::from_params(&params),
            Err(ConfigError::InvalidParameter { .. })
        ));
    }
}
