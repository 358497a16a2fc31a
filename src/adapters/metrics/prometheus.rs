//! Prometheus Metrics Registry - Scan Observability
//!
//! Registers the `asset_monitor_*` metrics: scan outcomes and
//! durations, per-scanner query failures, portfolio value, skipped
//! cron firings and rate limiter retries/exhaustions.

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

/// Centralized Prometheus metrics for the monitor.
pub struct MonitorMetrics {
    /// Prometheus registry.
    registry: Registry,
    /// Completed scan cycles by outcome (complete / partial / failed).
    pub scans_total: IntCounterVec,
    /// Scan cycle duration in seconds.
    pub scan_duration_seconds: Histogram,
    /// Failed queries by scanner name.
    pub query_failures: IntCounterVec,
    /// Total USD value of the last scan.
    pub total_usd_value: Gauge,
    /// Snapshots produced by the last scan.
    pub snapshots: IntGauge,
    /// Cron firings skipped because a scan was still running.
    pub skipped_firings: IntCounter,
    /// Rate limiter retries by limiter key.
    pub limiter_retries: IntCounterVec,
    /// Rate limiter jobs that exhausted their retries.
    pub limiter_exhausted: IntCounterVec,
}

impl MonitorMetrics {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let scans_total = IntCounterVec::new(
            Opts::new("asset_monitor_scans_total", "Scan cycles by outcome"),
            &["outcome"],
        )?;

        let scan_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "asset_monitor_scan_duration_seconds",
                "Scan cycle duration in seconds",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )?;

        let query_failures = IntCounterVec::new(
            Opts::new(
                "asset_monitor_query_failures_total",
                "Failed queries by scanner",
            ),
            &["scanner"],
        )?;

        let total_usd_value = Gauge::new(
            "asset_monitor_total_usd_value",
            "Total USD value reported by the last scan",
        )?;

        let snapshots = IntGauge::new(
            "asset_monitor_snapshots",
            "Snapshots produced by the last scan",
        )?;

        let skipped_firings = IntCounter::new(
            "asset_monitor_skipped_firings_total",
            "Scheduled scans skipped because the previous one was still running",
        )?;

        let limiter_retries = IntCounterVec::new(
            Opts::new(
                "asset_monitor_limiter_retries_total",
                "Rate limiter job retries",
            ),
            &["limiter"],
        )?;

        let limiter_exhausted = IntCounterVec::new(
            Opts::new(
                "asset_monitor_limiter_exhausted_total",
                "Rate limiter jobs rejected after exhausting retries",
            ),
            &["limiter"],
        )?;

        registry.register(Box::new(scans_total.clone()))?;
        registry.register(Box::new(scan_duration_seconds.clone()))?;
        registry.register(Box::new(query_failures.clone()))?;
        registry.register(Box::new(total_usd_value.clone()))?;
        registry.register(Box::new(snapshots.clone()))?;
        registry.register(Box::new(skipped_firings.clone()))?;
        registry.register(Box::new(limiter_retries.clone()))?;
        registry.register(Box::new(limiter_exhausted.clone()))?;

        Ok(Self {
            registry,
            scans_total,
            scan_duration_seconds,
            query_failures,
            total_usd_value,
            snapshots,
            skipped_firings,
            limiter_retries,
            limiter_exhausted,
        })
    }

    /// Render every registered metric in the text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for MonitorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_metrics() {
        let metrics = MonitorMetrics::new().unwrap();
        metrics.scans_total.with_label_values(&["complete"]).inc();
        metrics.limiter_retries.with_label_values(&["coingecko"]).inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("asset_monitor_scans_total"));
        assert!(text.contains("limiter=\"coingecko\""));
    }
}
