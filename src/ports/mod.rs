//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `AssetSource` / `PriceSource`: scanner plugins for one external system
//! - `PriceLookup`: consensus prices handed to asset sources
//! - `BatchRepository`: scan batch persistence

pub mod repository;
pub mod source;

pub use repository::{Batch, BatchRepository};
pub use source::{AssetSource, PriceLookup, PriceSource, SourceContext};
