//! Repository Port - Batch Persistence Interface
//!
//! Every scan cycle is stored as one batch. Failures here are scan
//! cycle failures; callers must not swallow them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ScanResult;

/// Persisted grouping of one scan cycle's snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Unique batch identifier.
    pub id: Uuid,
    /// When the batch was written.
    pub stored_at: DateTime<Utc>,
    /// The scan cycle output.
    pub result: ScanResult,
}

impl Batch {
    pub fn new(result: ScanResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            stored_at: Utc::now(),
            result,
        }
    }
}

/// Trait for batch persistence providers.
#[async_trait]
pub trait BatchRepository: Send + Sync + 'static {
    /// Store a scan result as a new batch.
    async fn store_batch(&self, result: &ScanResult) -> anyhow::Result<Batch>;

    /// The most recently stored batch, if any.
    async fn latest_batch(&self) -> anyhow::Result<Option<Batch>>;

    /// Check if the repository is healthy (disk space, permissions).
    async fn is_healthy(&self) -> bool;
}
