//! Asset snapshots and result normalization.
//!
//! Sources produce `RawAsset` values with optional attribution fields.
//! `normalize` patches the missing fields from the originating query
//! and scanner, never overwriting what the source already set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::asset::{AssetQuery, AssetState, AssetType, TagMap};

/// A holding as reported by a source, before attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAsset {
    pub code: String,
    pub quantity: f64,
    pub usd_value_per_quantity: f64,
    pub asset_type: AssetType,
    pub state: AssetState,
    pub chain: Option<String>,
    pub account: Option<String>,
    pub group: Option<String>,
    pub query_id: Option<String>,
    pub tags: TagMap,
}

impl RawAsset {
    /// Liquid native holding with no attribution set.
    pub fn new(code: impl Into<String>, quantity: f64, usd_value_per_quantity: f64) -> Self {
        Self {
            code: code.into(),
            quantity,
            usd_value_per_quantity,
            asset_type: AssetType::default(),
            state: AssetState::default(),
            chain: None,
            account: None,
            group: None,
            query_id: None,
            tags: TagMap::new(),
        }
    }

    pub fn with_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = asset_type;
        self
    }

    pub fn with_state(mut self, state: AssetState) -> Self {
        self.state = state;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// One valued holding captured at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub code: String,
    pub chain: String,
    pub asset_type: AssetType,
    pub state: AssetState,
    pub quantity: f64,
    /// `quantity * usd_value_per_quantity`, fixed at creation.
    pub usd_value: f64,
    pub usd_value_per_quantity: f64,
    pub account: String,
    pub group: String,
    pub captured_at: DateTime<Utc>,
    pub tags: TagMap,
    pub query_id: String,
}

/// Scanner-level defaults used while normalizing.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeDefaults<'a> {
    /// Chain the scanner was configured for.
    pub chain: &'a str,
    /// Group used when neither result nor query sets one.
    pub group: &'a str,
}

/// Attribute a raw result to its query and value it.
///
/// Returns `None` for non-positive or non-finite quantities; those
/// holdings are dropped before leaving the scanner.
pub fn normalize(
    raw: RawAsset,
    query: &AssetQuery,
    defaults: NormalizeDefaults<'_>,
    captured_at: DateTime<Utc>,
) -> Option<AssetSnapshot> {
    if !raw.quantity.is_finite() || raw.quantity <= 0.0 {
        return None;
    }

    let mut tags = query.extra_tags.clone();
    tags.extend(raw.tags);

    let account = raw
        .account
        .or_else(|| query.address.clone())
        .or_else(|| query.api_key.clone())
        .or_else(|| query.api_secret.as_deref().map(mask_secret))
        .unwrap_or_else(|| query.id.clone());

    let group = raw
        .group
        .or_else(|| query.group.clone())
        .unwrap_or_else(|| defaults.group.to_string());

    Some(AssetSnapshot {
        usd_value: raw.quantity * raw.usd_value_per_quantity,
        code: raw.code,
        chain: raw.chain.unwrap_or_else(|| defaults.chain.to_string()),
        asset_type: raw.asset_type,
        state: raw.state,
        quantity: raw.quantity,
        usd_value_per_quantity: raw.usd_value_per_quantity,
        account,
        group,
        captured_at,
        tags,
        query_id: raw.query_id.unwrap_or_else(|| query.id.clone()),
    })
}

/// Keep the first three characters of a secret and star out the rest.
pub fn mask_secret(secret: &str) -> String {
    secret
        .chars()
        .enumerate()
        .map(|(i, c)| if i < 3 { c } else { '*' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: NormalizeDefaults<'static> = NormalizeDefaults {
        chain: "ethereum",
        group: "default",
    };

    fn query() -> AssetQuery {
        AssetQuery::new("q-1", "evm")
    }

    #[test]
    fn test_result_tags_win_over_query_tags() {
        let mut q = query();
        q.extra_tags.insert("a".into(), "1".into());
        let raw = RawAsset::new("ETH", 1.0, 2000.0)
            .with_tag("a", "2")
            .with_tag("b", "3");

        let snap = normalize(raw, &q, DEFAULTS, Utc::now()).unwrap();
        assert_eq!(snap.tags.get("a").map(String::as_str), Some("2"));
        assert_eq!(snap.tags.get("b").map(String::as_str), Some("3"));
        assert_eq!(snap.tags.len(), 2);
    }

    #[test]
    fn test_masked_secret_becomes_account() {
        let mut q = query();
        q.api_secret = Some("abcdef123".into());
        let snap = normalize(RawAsset::new("BTC", 0.5, 1.0), &q, DEFAULTS, Utc::now()).unwrap();
        assert_eq!(snap.account, "abc******");
    }

    #[test]
    fn test_account_precedence() {
        let mut q = query();
        q.api_key = Some("key".into());
        q.api_secret = Some("secret".into());
        let snap = normalize(RawAsset::new("BTC", 1.0, 1.0), &q, DEFAULTS, Utc::now()).unwrap();
        assert_eq!(snap.account, "key");

        q.address = Some("0xabc".into());
        let snap = normalize(RawAsset::new("BTC", 1.0, 1.0), &q, DEFAULTS, Utc::now()).unwrap();
        assert_eq!(snap.account, "0xabc");

        let mut raw = RawAsset::new("BTC", 1.0, 1.0);
        raw.account = Some("own".into());
        let snap = normalize(raw, &q, DEFAULTS, Utc::now()).unwrap();
        assert_eq!(snap.account, "own");
    }

    #[test]
    fn test_defaults_do_not_overwrite() {
        let mut q = query();
        q.group = Some("treasury".into());
        let mut raw = RawAsset::new("USDC", 10.0, 1.0);
        raw.chain = Some("polygon".into());
        raw.query_id = Some("origin".into());

        let snap = normalize(raw, &q, DEFAULTS, Utc::now()).unwrap();
        assert_eq!(snap.chain, "polygon");
        assert_eq!(snap.group, "treasury");
        assert_eq!(snap.query_id, "origin");

        let snap = normalize(RawAsset::new("USDC", 10.0, 1.0), &query(), DEFAULTS, Utc::now())
            .unwrap();
        assert_eq!(snap.chain, "ethereum");
        assert_eq!(snap.group, "default");
        assert_eq!(snap.query_id, "q-1");
    }

    #[test]
    fn test_non_positive_quantity_dropped() {
        let q = query();
        assert!(normalize(RawAsset::new("ETH", 0.0, 1.0), &q, DEFAULTS, Utc::now()).is_none());
        assert!(normalize(RawAsset::new("ETH", -3.0, 1.0), &q, DEFAULTS, Utc::now()).is_none());
        assert!(normalize(RawAsset::new("ETH", f64::NAN, 1.0), &q, DEFAULTS, Utc::now()).is_none());
    }

    #[test]
    fn test_usd_value_computed_once() {
        let snap = normalize(RawAsset::new("ETH", 2.5, 1000.0), &query(), DEFAULTS, Utc::now())
            .unwrap();
        assert!((snap.usd_value - 2500.0).abs() < 1e-9);
    }

    #[test]
    fn test_mask_short_secret() {
        assert_eq!(mask_secret("ab"), "ab");
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("abcd"), "abc*");
    }
}
