//! Source Adapters - Scanner Type Factory
//!
//! Maps a `ScannerType` to its source implementation. Every type in
//! the enum has a row here; types without an adapter are rejected with
//! `ConfigError::NotImplemented` instead of being silently ignored.

pub mod coingecko;
pub mod fixed;
pub mod manual;

use std::sync::Arc;

use crate::domain::{Params, ScannerRole, ScannerType};
use crate::error::ConfigError;
use crate::ports::{AssetSource, PriceSource};

pub use coingecko::CoinGeckoSource;
pub use fixed::FixedPriceSource;
pub use manual::ManualSource;

/// Build the asset source for `scanner_type`.
pub fn asset_source(scanner_type: ScannerType, _params: &Params) -> Result<Arc<dyn AssetSource>, ConfigError> {
    ensure_role(scanner_type, ScannerRole::Asset)?;
    match scanner_type {
        ScannerType::Manual => Ok(Arc::new(ManualSource::new())),
        ScannerType::Evm
        | ScannerType::Solana
        | ScannerType::Bitcoin
        | ScannerType::Cosmos
        | ScannerType::Binance
        | ScannerType::Okx => Err(ConfigError::NotImplemented(scanner_type.to_string())),
        ScannerType::Fixed | ScannerType::Coingecko | ScannerType::Coinmarketcap => {
            Err(wrong_role(scanner_type, ScannerRole::Asset))
        }
    }
}

/// Build the price source for `scanner_type`.
pub fn price_source(scanner_type: ScannerType, params: &Params) -> Result<Arc<dyn PriceSource>, ConfigError> {
    ensure_role(scanner_type, ScannerRole::Price)?;
    match scanner_type {
        ScannerType::Fixed => Ok(Arc::new(FixedPriceSource::from_params(params)?)),
        ScannerType::Coingecko => Ok(Arc::new(CoinGeckoSource::from_params(params)?)),
        ScannerType::Coinmarketcap => Err(ConfigError::NotImplemented(scanner_type.to_string())),
        _ => Err(wrong_role(scanner_type, ScannerRole::Price)),
    }
}

fn ensure_role(scanner_type: ScannerType, role: ScannerRole) -> Result<(), ConfigError> {
    if scanner_type.role() == role {
        Ok(())
    } else {
        Err(wrong_role(scanner_type, role))
    }
}

fn wrong_role(scanner_type: ScannerType, role: ScannerRole) -> ConfigError {
    ConfigError::WrongRole {
        scanner_type: scanner_type.to_string(),
        role: match role {
            ScannerRole::Asset => "an asset",
            ScannerRole::Price => "a price",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_a_factory_answer() {
        for scanner_type in ScannerType::ALL {
            let asset = asset_source(scanner_type, &Params::new());
            let price = price_source(scanner_type, &Params::new());
            match scanner_type.role() {
                ScannerRole::Asset => assert!(matches!(price, Err(ConfigError::WrongRole { .. }))),
                ScannerRole::Price => assert!(matches!(asset, Err(ConfigError::WrongRole { .. }))),
            }
        }
    }

    #[test]
    fn test_unimplemented_types() {
        for scanner_type in [ScannerType::Evm, ScannerType::Binance] {
            assert!(matches!(
                asset_source(scanner_type, &Params::new()),
                Err(ConfigError::NotImplemented(_))
            ));
        }
        assert!(matches!(
            price_source(ScannerType::Coinmarketcap, &Params::new()),
            Err(ConfigError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_implemented_types() {
        assert!(asset_source(ScannerType::Manual, &Params::new()).is_ok());
        assert!(price_source(ScannerType::Fixed, &Params::new()).is_ok());
        assert!(price_source(ScannerType::Coingecko, &Params::new()).is_ok());
    }
}
