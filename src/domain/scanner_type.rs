//! Closed set of scanner variants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Whether a scanner produces holdings or prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerRole {
    Asset,
    Price,
}

/// Every scanner type the configuration may name.
///
/// Types without an adapter in this crate still parse; the factory
/// rejects them with `ConfigError::NotImplemented`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerType {
    /// Holdings declared directly on the query.
    Manual,
    Evm,
    Solana,
    Bitcoin,
    Cosmos,
    Binance,
    Okx,
    /// Static price table.
    Fixed,
    Coingecko,
    Coinmarketcap,
}

impl ScannerType {
    pub const ALL: [ScannerType; 10] = [
        Self::Manual,
        Self::Evm,
        Self::Solana,
        Self::Bitcoin,
        Self::Cosmos,
        Self::Binance,
        Self::Okx,
        Self::Fixed,
        Self::Coingecko,
        Self::Coinmarketcap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Evm => "evm",
            Self::Solana => "solana",
            Self::Bitcoin => "bitcoin",
            Self::Cosmos => "cosmos",
            Self::Binance => "binance",
            Self::Okx => "okx",
            Self::Fixed => "fixed",
            Self::Coingecko => "coingecko",
            Self::Coinmarketcap => "coinmarketcap",
        }
    }

    pub fn role(&self) -> ScannerRole {
        match self {
            Self::Fixed | Self::Coingecko | Self::Coinmarketcap => ScannerRole::Price,
            _ => ScannerRole::Asset,
        }
    }
}

impl fmt::Display for ScannerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScannerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownScannerType(s.to_string()))
    }
}
