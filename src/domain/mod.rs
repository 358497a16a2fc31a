//! Domain layer - Core asset and scan models.
//!
//! Pure types and functions with no I/O: queries, snapshots and their
//! normalization, scan results, the code/address table, scanner types
//! and the cron schedule.

pub mod address_map;
pub mod asset;
pub mod scan;
pub mod scanner_type;
pub mod schedule;
pub mod snapshot;

pub use address_map::CodeAddressMap;
pub use asset::{AssetQuery, AssetState, AssetType, Params, TagMap};
pub use scan::{QueryFailure, ScanResult};
pub use scanner_type::{ScannerRole, ScannerType};
pub use schedule::CronSchedule;
pub use snapshot::{AssetSnapshot, NormalizeDefaults, RawAsset, mask_secret, normalize};
