//! Rate Limiter Registry - Shared Limiters Keyed by Endpoint
//!
//! Scanners that hit the same remote endpoint ask the registry for the
//! same key and receive the same `RateLimiter`, so they throttle
//! together. The registry is an owned object passed to whoever builds
//! scanners; there is no process-wide map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::limiter::{RateLimiter, RateLimiterOptions};
use crate::adapters::metrics::MonitorMetrics;

/// Owner of every keyed `RateLimiter`.
#[derive(Default)]
pub struct RateLimiterRegistry {
    /// Named definitions from configuration.
    definitions: HashMap<String, RateLimiterOptions>,
    /// Limiters handed out so far.
    instances: Mutex<HashMap<String, Arc<RateLimiter>>>,
    metrics: Option<Arc<MonitorMetrics>>,
}

impl RateLimiterRegistry {
    pub fn new(definitions: HashMap<String, RateLimiterOptions>) -> Self {
        Self {
            definitions,
            instances: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    /// Attach Prometheus counters to every limiter created afterwards.
    pub fn with_metrics(mut self, metrics: Arc<MonitorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shared limiter for `key`, created on first request.
    ///
    /// A configured definition for `key` wins over `options`. The first
    /// caller's options stick for the lifetime of the limiter. An empty
    /// key yields a private limiter.
    pub fn get(&self, key: &str, options: &RateLimiterOptions) -> Arc<RateLimiter> {
        if key.is_empty() {
            return self.private("anonymous", options.clone());
        }

        let Ok(mut instances) = self.instances.lock() else {
            return self.private(key, options.clone());
        };

        if let Some(existing) = instances.get(key) {
            if !existing.is_stopped() {
                debug!(limiter = %key, "Reusing shared rate limiter");
                return Arc::clone(existing);
            }
        }

        let options = self.definitions.get(key).unwrap_or(options).clone();
        info!(
            limiter = %key,
            calls_per_second = ?options.calls_per_second,
            retry_count = options.retry_count,
            pause_ms = options.pause_ms,
            "Creating shared rate limiter"
        );
        let limiter = Arc::new(RateLimiter::build(
            key.to_string(),
            options,
            true,
            self.metrics.clone(),
        ));
        instances.insert(key.to_string(), Arc::clone(&limiter));
        limiter
    }

    /// Limiter owned by a single component; never shared.
    pub fn private(&self, label: &str, options: RateLimiterOptions) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::build(
            format!("private:{label}"),
            options,
            false,
            self.metrics.clone(),
        ))
    }

    /// Number of shared limiters created so far.
    pub fn len(&self) -> usize {
        self.instances.lock().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every shared limiter, rejecting their pending jobs.
    pub fn stop_all(&self) {
        let drained: Vec<Arc<RateLimiter>> = match self.instances.lock() {
            Ok(mut instances) => instances.drain().map(|(_, l)| l).collect(),
            Err(_) => Vec::new(),
        };
        for limiter in &drained {
            limiter.stop();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Shared rate limiters stopped");
        }
    }
}

impl std::fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("definitions", &self.definitions.len())
            .field("instances", &self.len())
            .finish()
    }
}
