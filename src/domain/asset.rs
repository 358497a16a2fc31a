//! Asset query and classification types.
//!
//! An `AssetQuery` is one request descriptor read from `queries.toml`.
//! It is immutable for the duration of a scan cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form parameter map used by scanner definitions and queries.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Tag map attached to queries and snapshots.
pub type TagMap = BTreeMap<String, String>;

/// Kind of holding a snapshot represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    /// Native coin of a chain (ETH on Ethereum, SOL on Solana).
    #[default]
    Native,
    /// Token issued on top of a chain.
    Secondary,
    /// Balance held on a centralised exchange.
    Cex,
    /// Non-fungible token.
    Nft,
    /// Anything else.
    Other,
}

/// Availability of a holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    #[default]
    Liquid,
    Locked,
    Claimable,
}

/// One balance query routed to a named scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetQuery {
    /// Stable identifier; derived as `<scanner>-<index>` when omitted.
    #[serde(default)]
    pub id: String,
    /// Name of the scanner that owns this query.
    pub scanner: String,
    /// Chain override (informational; scanners default to their own chain).
    #[serde(default)]
    pub chain: Option<String>,
    /// On-chain address to query.
    #[serde(default)]
    pub address: Option<String>,
    /// Exchange API key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Exchange API secret. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_secret: Option<String>,
    /// Target group for produced snapshots.
    #[serde(default)]
    pub group: Option<String>,
    /// Tags merged under every produced snapshot's own tags.
    #[serde(default)]
    pub extra_tags: TagMap,
    /// Disabled queries are accepted but never dispatched.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Source-specific keys.
    #[serde(default)]
    pub params: Params,
}

impl AssetQuery {
    /// Create an enabled query with only the scanner name set.
    pub fn new(id: impl Into<String>, scanner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scanner: scanner.into(),
            chain: None,
            address: None,
            api_key: None,
            api_secret: None,
            group: None,
            extra_tags: TagMap::new(),
            enabled: true,
            params: Params::new(),
        }
    }

    /// Whether `key` is present and non-null on this query.
    ///
    /// Well-known keys map to the typed fields; anything else is looked
    /// up in `params`.
    pub fn has_key(&self, key: &str) -> bool {
        match key {
            "id" => !self.id.is_empty(),
            "scanner" => !self.scanner.is_empty(),
            "chain" => self.chain.is_some(),
            "address" => self.address.is_some(),
            "api_key" => self.api_key.is_some(),
            "api_secret" => self.api_secret.is_some(),
            "group" => self.group.is_some(),
            other => self.params.get(other).is_some_and(|v| !v.is_null()),
        }
    }
}

fn default_true() -> bool {
    true
}
