//! Scanner Query Contract - Validation and Watched Execution
//!
//! Shared by asset and price scanners:
//! - required query keys are checked before any remote call
//! - source work races a fixed timeout
//! - a periodic warning reports work that is still running

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, interval_at, sleep};
use tracing::warn;

use crate::domain::AssetQuery;
use crate::error::ScanError;

/// Ceiling on one scanner query. Not retried by the scanner.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval of the "still running" warning.
pub const STUCK_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Check every declared key is present and non-null on `query`.
pub fn validate_query(
  scanner: &str,
  required: Option<&[&str]>,
  query: &AssetQuery,
) -> Result<(), ScanError> {
  let Some(required) = required else {
    warn!(
      scanner = %scanner,
      query_id = %query.id,
      "Scanner declares no required query keys, skipping validation"
    );
    return Ok(());
  };

  match required.iter().find(|key| !query.has_key(key)) {
    Some(key) => Err(ScanError::MissingQueryKey {
      scanner: scanner.to_string(),
      query_id: query.id.clone(),
      key: key.to_string(),
    }),
    None => Ok(()),
  }
}

/// Drive `work` to completion or until `limit` elapses.
///
/// Logs a warning every `STUCK_LOG_INTERVAL` while `work` is pending.
/// The ticker and the losing branch are dropped on every exit path.
pub async fn run_watched<T, F>(
  scanner: &str,
  label: &str,
  limit: Duration,
  work: F,
) -> Result<T, ScanError>
where
  F: Future<Output = anyhow::Result<T>>,
{
  let started = Instant::now();
  let deadline = sleep(limit);
  let mut ticker = interval_at(started + STUCK_LOG_INTERVAL, STUCK_LOG_INTERVAL);
  tokio::pin!(deadline);
  tokio::pin!(work);

  loop {
    tokio::select! {
      biased;
      outcome = &mut work => {
        return outcome.map_err(|e| ScanError::Source {
          scanner: scanner.to_string(),
          query_id: label.to_string(),
          message: format!("{e:#}"),
        });
      }
      _ = &mut deadline => {
        warn!(
          scanner = %scanner,
          query_id = %label,
          timeout_ms = limit.as_millis() as u64,
          "Query timed out"
        );
        return Err(ScanError::Timeout {
          scanner: scanner.to_string(),
          query_id: label.to_string(),
          timeout_ms: limit.as_millis() as u64,
        });
      }
      _ = ticker.tick() => {
        warn!(
          scanner = %scanner,
          query_id = %label,
          elapsed_s = started.elapsed().as_secs(),
          "Query still running"
        );
      }
    }
  }
}
