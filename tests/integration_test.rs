//! Integration Tests - End-to-end Monitor Component Testing
//!
//! Tests the interaction between usecases, ports, and mock adapters.
//! Uses mockall for trait mocking and tokio::test for async tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use mockall::mock;
use serde_json::json;
use tokio::sync::broadcast;

use asset_monitor::adapters::metrics::MonitorMetrics;
use asset_monitor::adapters::persistence::JsonlBatchStore;
use asset_monitor::adapters::rate_limit::{RateLimiterOptions, RateLimiterRegistry};
use asset_monitor::config::loader::parse_config;
use asset_monitor::domain::{AssetQuery, CronSchedule, Params, RawAsset, ScanResult, ScannerType};
use asset_monitor::ports::{AssetSource, Batch, BatchRepository, SourceContext};
use asset_monitor::usecases::{AssetMonitor, AssetScanner};

// ---- Mock Definitions ----

mock! {
    pub Repo {}

    #[async_trait::async_trait]
    impl BatchRepository for Repo {
        async fn store_batch(&self, result: &ScanResult) -> anyhow::Result<Batch>;
        async fn latest_batch(&self) -> anyhow::Result<Option<Batch>>;
        async fn is_healthy(&self) -> bool;
    }
}

// ---- Test Sources ----

const ADDRESS_KEY: &[&str] = &["address"];

/// Answers one fixed holding per query after `delay`, or fails.
struct ScriptedSource {
    delay: Duration,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AssetSource for ScriptedSource {
    fn required_query_keys(&self) -> Option<&'static [&'static str]> {
        Some(ADDRESS_KEY)
    }

    async fn fetch(&self, query: &AssetQuery, ctx: &SourceContext) -> Result<Vec<RawAsset>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        anyhow::ensure!(!self.fail, "node unreachable for {}", query.id);
        let price = ctx.price_lookup()?.usd_price("ETH").await?;
        Ok(vec![RawAsset::new("ETH", 1.5, price)])
    }
}

// ---- Helpers ----

const CONFIG: &str = r#"
    [monitor]
    name = "integration"
    default_group = "family"

    [[asset_scanners]]
    type = "manual"
    chain = "ethereum"

    [[price_scanners]]
    type = "fixed"
    params = { prices = { ETH = 2000.0, BTC = 60000.0 } }
"#;

fn scripted(monitor: &AssetMonitor, name: &str, delay: Duration, fail: bool) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let ctx = SourceContext {
        scanner: name.to_string(),
        chain: "ethereum".to_string(),
        params: Params::new(),
        limiter: monitor.limiters().private(name, RateLimiterOptions::default()),
        address_map: monitor.address_map("ethereum"),
        prices: Some(monitor.price_lookup()),
    };
    let source = ScriptedSource {
        delay,
        fail,
        calls: Arc::clone(&calls),
    };
    monitor
        .insert_asset_scanner(AssetScanner::new(ScannerType::Evm, Arc::new(source), ctx, "family"))
        .unwrap();
    calls
}

fn address_query(id: &str, scanner: &str) -> AssetQuery {
    let mut query = AssetQuery::new(id, scanner);
    query.address = Some(format!("0x{id}"));
    query
}

fn monitor() -> AssetMonitor {
    AssetMonitor::from_config(&parse_config(CONFIG).unwrap(), None).unwrap()
}

// ---- Scan + persistence ----

#[tokio::test]
async fn test_partial_failure_is_stored_with_failures() {
    let monitor = monitor();
    scripted(&monitor, "evm:ok", Duration::from_millis(10), false);
    scripted(&monitor, "evm:down", Duration::from_millis(10), true);
    monitor.add_query(address_query("wallet", "evm:ok")).unwrap();
    monitor.add_query(address_query("cold", "evm:down")).unwrap();

    let mut repo = MockRepo::new();
    repo.expect_store_batch()
        .withf(|result| result.snapshots.len() == 1 && result.failures.len() == 1)
        .times(1)
        .returning(|result| Ok(Batch::new(result.clone())));

    let batch = monitor.run_cycle(&repo).await.unwrap();

    assert_eq!(batch.result.total_usd_value, 3000.0);
    assert_eq!(batch.result.snapshots[0].account, "0xwallet");
    assert_eq!(batch.result.snapshots[0].group, "family");
    assert_eq!(batch.result.failures[0].query_id, "cold");
    assert!(batch.result.failures[0].error.contains("node unreachable"));
}

#[tokio::test]
async fn test_persistence_failure_fails_cycle() {
    let monitor = monitor();
    scripted(&monitor, "evm:ok", Duration::ZERO, false);
    monitor.add_query(address_query("wallet", "evm:ok")).unwrap();

    let mut repo = MockRepo::new();
    repo.expect_store_batch()
        .times(1)
        .returning(|_| Err(anyhow::anyhow!("disk full")));

    let err = monitor.run_cycle(&repo).await.unwrap_err();
    assert!(format!("{err:#}").contains("disk full"));
}

#[tokio::test]
async fn test_queries_run_concurrently() {
    let monitor = monitor();
    let calls = scripted(&monitor, "evm:slow", Duration::from_millis(300), false);
    for i in 0..5 {
        monitor.add_query(address_query(&format!("w{i}"), "evm:slow")).unwrap();
    }

    let started = std::time::Instant::now();
    let result = monitor.scan().await;

    assert_eq!(result.snapshots.len(), 5);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert!(started.elapsed() < Duration::from_millis(1200));
}

#[tokio::test]
async fn test_invalid_query_recorded_as_failure() {
    let monitor = monitor();
    let calls = scripted(&monitor, "evm:ok", Duration::ZERO, false);
    monitor.add_query(AssetQuery::new("no-address", "evm:ok")).unwrap();

    let result = monitor.scan().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].error.contains("address"));
}

#[tokio::test]
async fn test_manual_scan_into_jsonl_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonlBatchStore::new(dir.path()).await.unwrap();

    let monitor = monitor();
    let mut query = AssetQuery::new("treasury", "manual:ethereum");
    query.params.insert(
        "holdings".to_string(),
        json!([{ "code": "BTC", "quantity": 0.5 }, { "code": "ETH", "quantity": 0.0 }]),
    );
    monitor.add_query(query).unwrap();

    let stored = monitor.run_cycle(&store).await.unwrap();
    let latest = store.latest_batch().await.unwrap().unwrap();

    assert_eq!(latest.id, stored.id);
    assert_eq!(latest.result.snapshots.len(), 1);
    assert_eq!(latest.result.total_usd_value, 30000.0);
    assert_eq!(latest.result.snapshots[0].account, "treasury");
}

#[tokio::test]
async fn test_shared_limiter_key_yields_one_instance() {
    let config = parse_config(
        r#"
        [monitor]
        name = "shared"

        [rate_limiters.node]
        calls_per_second = 20.0

        [[asset_scanners]]
        type = "manual"
        name = "manual-a"
        rate_limiter = "node"

        [[asset_scanners]]
        type = "manual"
        name = "manual-b"
        rate_limiter = "node"
        "#,
    )
    .unwrap();

    let monitor = AssetMonitor::from_config(&config, None).unwrap();
    assert_eq!(monitor.limiters().len(), 1);

    monitor.close().await;
    assert!(monitor.limiters().is_empty());
}

// ---- Cron monitoring ----

#[tokio::test]
async fn test_monitor_stores_each_firing_and_stops_on_shutdown() {
    let monitor = Arc::new(monitor());
    scripted(&monitor, "evm:ok", Duration::ZERO, false);
    monitor.add_query(address_query("wallet", "evm:ok")).unwrap();

    let stored = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&stored);
    let mut repo = MockRepo::new();
    repo.expect_store_batch().returning(move |result| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Batch::new(result.clone()))
    });

    let (shutdown_tx, _) = broadcast::channel(1);
    let schedule = CronSchedule::parse("* * * * * *").unwrap();
    let handle = tokio::spawn(Arc::clone(&monitor).monitor(schedule, Arc::new(repo), shutdown_tx.subscribe()));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert!(stored.load(Ordering::SeqCst) >= 1);
    assert!(!monitor.is_scanning());
}

#[tokio::test]
async fn test_overlapping_firing_is_skipped() {
    let metrics = Arc::new(MonitorMetrics::new().unwrap());
    let monitor = Arc::new(
        AssetMonitor::new("overlap", "default", Arc::new(RateLimiterRegistry::new(HashMap::new())))
            .with_metrics(Arc::clone(&metrics)),
    );
    let calls = scripted(&monitor, "evm:slow", Duration::from_millis(4000), false);
    monitor.add_query(address_query("wallet", "evm:slow")).unwrap();

    let mut repo = MockRepo::new();
    repo.expect_store_batch()
        .returning(|result| Ok(Batch::new(result.clone())));

    let (shutdown_tx, _) = broadcast::channel(1);
    let schedule = CronSchedule::parse("* * * * * *").unwrap();
    let handle = tokio::spawn(Arc::clone(&monitor).monitor(schedule, Arc::new(repo), shutdown_tx.subscribe()));

    tokio::time::sleep(Duration::from_millis(3200)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(metrics.skipped_firings.get() >= 1);
}
