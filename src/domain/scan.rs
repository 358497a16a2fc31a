//! Scan cycle output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::AssetSnapshot;

/// A query that failed during a cycle, recorded next to the successes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub query_id: String,
    pub scanner: String,
    pub error: String,
}

/// Everything one scan cycle produced.
///
/// Assembled once by `ScanResult::assemble` and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub snapshots: Vec<AssetSnapshot>,
    /// Sum of every snapshot's `usd_value`.
    pub total_usd_value: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub failures: Vec<QueryFailure>,
}

impl ScanResult {
    pub fn assemble(
        snapshots: Vec<AssetSnapshot>,
        failures: Vec<QueryFailure>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let total_usd_value = snapshots.iter().map(|s| s.usd_value).sum();
        let elapsed_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            snapshots,
            total_usd_value,
            started_at,
            ended_at,
            elapsed_ms,
            failures,
        }
    }

    /// True when no query failed during the cycle.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::{AssetState, AssetType, TagMap};

    fn snapshot(value: f64) -> AssetSnapshot {
        AssetSnapshot {
            code: "ETH".into(),
            chain: "ethereum".into(),
            asset_type: AssetType::Native,
            state: AssetState::Liquid,
            quantity: 1.0,
            usd_value: value,
            usd_value_per_quantity: value,
            account: "0x1".into(),
            group: "default".into(),
            captured_at: Utc::now(),
            tags: TagMap::new(),
            query_id: "q".into(),
        }
    }

    #[test]
    fn test_assemble_sums_values() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(1500);
        let result = ScanResult::assemble(vec![snapshot(10.0), snapshot(2.5)], vec![], start, end);

        assert!((result.total_usd_value - 12.5).abs() < 1e-9);
        assert_eq!(result.elapsed_ms, 1500);
        assert!(result.is_complete());
    }

    #[test]
    fn test_failures_make_result_incomplete() {
        let now = Utc::now();
        let failure = QueryFailure {
            query_id: "q".into(),
            scanner: "evm".into(),
            error: "boom".into(),
        };
        let result = ScanResult::assemble(vec![], vec![failure], now, now);
        assert!(!result.is_complete());
        assert_eq!(result.total_usd_value, 0.0);
    }
}
