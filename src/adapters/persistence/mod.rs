//! Persistence Adapters - JSONL-based File Storage
//!
//! Implements the `BatchRepository` port with append-only JSONL batch
//! logs and an atomically replaced `latest.json`. No database
//! dependency.

pub mod batch_store;

pub use batch_store::JsonlBatchStore;
