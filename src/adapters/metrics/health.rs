//! Health Check Server - Liveness, Readiness and Metrics
//!
//! Exposes /live, /ready and /metrics via axum 0.7. Readiness depends
//! on batch storage health and drops to 503 once shutdown begins.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use super::prometheus::MonitorMetrics;
use crate::ports::BatchRepository;

/// Shared state behind the health handlers.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Cleared when the monitor starts shutting down.
    pub running: Arc<AtomicBool>,
    /// Last result of the batch repository health check.
    pub storage_healthy: Arc<AtomicBool>,
    /// Metrics rendered on /metrics.
    pub metrics: Arc<MonitorMetrics>,
}

impl HealthState {
    pub fn new(metrics: Arc<MonitorMetrics>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            storage_healthy: Arc::new(AtomicBool::new(true)),
            metrics,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.running.load(Ordering::Relaxed) && self.storage_healthy.load(Ordering::Relaxed)
    }

    /// Poll `repository.is_healthy()` every `period` until shutdown.
    pub async fn watch_storage(
        self,
        repository: Arc<dyn BatchRepository>,
        period: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    let healthy = repository.is_healthy().await;
                    if self.storage_healthy.swap(healthy, Ordering::Relaxed) != healthy {
                        if healthy {
                            info!("Batch storage healthy again");
                        } else {
                            warn!("Batch storage unhealthy, readiness failing");
                        }
                    }
                }
            }
        }
    }
}

/// Axum-based health and metrics server.
pub struct HealthServer {
    state: HealthState,
    bind_address: String,
}

impl HealthServer {
    pub fn new(state: HealthState, bind_address: impl Into<String>) -> Self {
        Self {
            state,
            bind_address: bind_address.into(),
        }
    }

    fn router(state: HealthState) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/metrics", get(Self::metrics))
            .with_state(state)
    }

    /// Serve until the shutdown broadcast fires.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        info!(address = %self.bind_address, "Health server started");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    async fn metrics(State(state): State<HealthState>) -> impl IntoResponse {
        match state.metrics.encode() {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => {
                warn!(error = %e, "Failed to encode metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, String::new())
            }
        }
    }
}
