//! Rate Limiter - Throttled Job Queue with Retry and Backoff
//!
//! Every remote call a scanner makes goes through `RateLimiter::exec`.
//! Jobs are processed one at a time, one per tick, where the tick
//! period is `1 / calls_per_second`. A failing job is re-appended to
//! the tail of the queue and the whole loop pauses for
//! `pause_ms * 2^retries`, so a struggling endpoint is not hammered by
//! the rest of the queue either.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota};
use serde::Deserialize;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, warn};

use crate::adapters::metrics::MonitorMetrics;
use crate::error::RateLimitError;

/// Ceiling on a single attempt. A timeout counts as a failed attempt.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(10);

/// Throttling and retry settings for one limiter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimiterOptions {
    /// Calls per second. Absent or zero disables queuing entirely.
    #[serde(default)]
    pub calls_per_second: Option<f64>,
    /// Retries after the first attempt.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Base backoff pause in milliseconds.
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            calls_per_second: None,
            retry_count: default_retry_count(),
            pause_ms: default_pause_ms(),
        }
    }
}

impl RateLimiterOptions {
    pub fn new(calls_per_second: f64, retry_count: u32, pause_ms: u64) -> Self {
        Self {
            calls_per_second: Some(calls_per_second),
            retry_count,
            pause_ms,
        }
    }

    /// Tick period, or `None` when the limiter runs jobs immediately.
    pub fn interval(&self) -> Option<Duration> {
        self.calls_per_second
            .filter(|cps| cps.is_finite() && *cps > 0.0)
            .map(|cps| Duration::from_secs_f64(1.0 / cps))
    }

    /// Backoff applied after a job's `retries`-th failure (0-based).
    pub fn backoff(&self, retries: u32) -> Duration {
        Duration::from_millis(self.pause_ms).saturating_mul(2u32.saturating_pow(retries))
    }
}

fn default_retry_count() -> u32 {
    3
}

fn default_pause_ms() -> u64 {
    1000
}

type Attempt = Box<dyn FnMut() -> BoxFuture<'static, anyhow::Result<()>> + Send>;
type Reject = Box<dyn FnOnce(RateLimitError) + Send>;

/// A queued unit of work.
struct Job {
    name: String,
    retries: u32,
    attempt: Attempt,
    reject: Reject,
}

/// State shared between the limiter handle and its worker task.
struct Inner {
    key: String,
    options: RateLimiterOptions,
    queue: Mutex<VecDeque<Job>>,
    paused_until: Mutex<Option<Instant>>,
    stopped: AtomicBool,
    wake: Notify,
    metrics: Option<Arc<MonitorMetrics>>,
}

/// Per-endpoint throttled job queue.
///
/// Obtain shared instances through `RateLimiterRegistry` so that every
/// scanner hitting the same endpoint throttles together.
pub struct RateLimiter {
    inner: Arc<Inner>,
    shared: bool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Private limiter owned by a single component.
    pub fn new(key: impl Into<String>, options: RateLimiterOptions) -> Self {
        Self::build(key.into(), options, false, None)
    }

    pub(crate) fn build(
        key: String,
        options: RateLimiterOptions,
        shared: bool,
        metrics: Option<Arc<MonitorMetrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                key,
                options,
                queue: Mutex::new(VecDeque::new()),
                paused_until: Mutex::new(None),
                stopped: AtomicBool::new(false),
                wake: Notify::new(),
                metrics,
            }),
            shared,
            worker: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn options(&self) -> &RateLimiterOptions {
        &self.inner.options
    }

    /// Whether this limiter came from a registry key (and may be in use
    /// by other components).
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Jobs waiting to run, including ones re-queued for retry.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Run an anonymous job through the limiter.
    pub async fn exec<T, F, Fut>(&self, f: F) -> Result<T, RateLimitError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.exec_named("anonymous", f).await
    }

    /// Enqueue `f` and wait for its final outcome.
    ///
    /// Resolves with the first successful attempt, or rejects with the
    /// last error once `retry_count` retries are spent.
    pub async fn exec_named<T, F, Fut>(&self, name: &str, mut f: F) -> Result<T, RateLimitError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_stopped() {
            return Err(RateLimitError::Stopped {
                key: self.inner.key.clone(),
                name: name.to_string(),
            });
        }

        if self.inner.options.interval().is_none() {
            return match timeout(JOB_TIMEOUT, f()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(self.exhausted(name, 1, e)),
                Err(_) => Err(self.exhausted(name, 1, timeout_error())),
            };
        }

        let (tx, rx) = oneshot::channel::<Result<T, RateLimitError>>();
        let resolve = Arc::new(Mutex::new(Some(tx)));
        let reject_slot = Arc::clone(&resolve);

        let attempt: Attempt = Box::new(move || {
            let fut = f();
            let resolve = Arc::clone(&resolve);
            async move {
                let value = fut.await?;
                if let Some(tx) = resolve.lock().ok().and_then(|mut slot| slot.take()) {
                    let _ = tx.send(Ok(value));
                }
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        });

        let reject: Reject = Box::new(move |err| {
            if let Some(tx) = reject_slot.lock().ok().and_then(|mut slot| slot.take()) {
                let _ = tx.send(Err(err));
            }
        });

        self.push(Job {
            name: name.to_string(),
            retries: 0,
            attempt,
            reject,
        });

        rx.await.unwrap_or_else(|_| {
            Err(RateLimitError::Stopped {
                key: self.inner.key.clone(),
                name: name.to_string(),
            })
        })
    }

    /// Hold the loop for at least `duration`. Repeated calls extend the
    /// pause to the latest deadline; no timer is left behind.
    pub fn pause(&self, duration: Duration) {
        self.inner.pause(duration);
    }

    /// Stop the worker and reject every pending job. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(limiter = %self.inner.key, "Stopping rate limiter");
        self.inner.reject_pending();
        self.inner.wake.notify_one();
    }

    fn push(&self, job: Job) {
        if let Ok(mut queue) = self.inner.queue.lock() {
            queue.push_back(job);
        }
        self.ensure_worker();
        self.inner.wake.notify_one();
    }

    fn ensure_worker(&self) {
        let Ok(mut worker) = self.worker.lock() else {
            return;
        };
        let running = worker.as_ref().is_some_and(|h| !h.is_finished());
        if !running && !self.is_stopped() {
            *worker = Some(tokio::spawn(run_loop(Arc::clone(&self.inner))));
        }
    }

    fn exhausted(&self, name: &str, attempts: u32, source: anyhow::Error) -> RateLimitError {
        RateLimitError::Exhausted {
            key: self.inner.key.clone(),
            name: name.to_string(),
            attempts,
            source,
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("key", &self.inner.key)
            .field("options", &self.inner.options)
            .field("shared", &self.shared)
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl Inner {
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        if let Ok(mut paused) = self.paused_until.lock() {
            *paused = Some(match *paused {
                Some(existing) if existing > deadline => existing,
                _ => deadline,
            });
        }
        self.wake.notify_one();
    }

    fn pause_deadline(&self) -> Option<Instant> {
        let paused = self.paused_until.lock().ok().and_then(|p| *p)?;
        (paused > Instant::now()).then_some(paused)
    }

    fn pop(&self) -> Option<Job> {
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }

    fn reject_pending(&self) {
        let drained: Vec<Job> = match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for job in drained {
            let err = RateLimitError::Stopped {
                key: self.key.clone(),
                name: job.name.clone(),
            };
            (job.reject)(err);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Worker loop: one job per tick until stopped.
async fn run_loop(inner: Arc<Inner>) {
    let Some(gate) = inner
        .options
        .interval()
        .and_then(Quota::with_period)
        .map(DefaultDirectRateLimiter::direct)
    else {
        return;
    };

    while !inner.is_stopped() {
        if let Some(deadline) = inner.pause_deadline() {
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = inner.wake.notified() => {}
            }
            continue;
        }

        let Some(job) = inner.pop() else {
            inner.wake.notified().await;
            continue;
        };

        gate.until_ready().await;
        process(&inner, job).await;
    }

    inner.reject_pending();
}

async fn process(inner: &Inner, mut job: Job) {
    let outcome = match timeout(JOB_TIMEOUT, (job.attempt)()).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error()),
    };

    let Err(err) = outcome else {
        debug!(limiter = %inner.key, job = %job.name, retries = job.retries, "Job succeeded");
        return;
    };

    if inner.is_stopped() {
        (job.reject)(RateLimitError::Stopped {
            key: inner.key.clone(),
            name: job.name,
        });
        return;
    }

    if job.retries < inner.options.retry_count {
        let backoff = inner.options.backoff(job.retries);
        job.retries += 1;
        warn!(
            limiter = %inner.key,
            job = %job.name,
            retry = job.retries,
            max_retries = inner.options.retry_count,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Job failed, re-queued with backoff"
        );
        if let Some(metrics) = &inner.metrics {
            metrics.limiter_retries.with_label_values(&[inner.key.as_str()]).inc();
        }
        if let Ok(mut queue) = inner.queue.lock() {
            queue.push_back(job);
        }
        inner.pause(backoff);
        return;
    }

    error!(
        limiter = %inner.key,
        job = %job.name,
        attempts = job.retries + 1,
        error = %err,
        "Job exhausted retries"
    );
    if let Some(metrics) = &inner.metrics {
        metrics.limiter_exhausted.with_label_values(&[inner.key.as_str()]).inc();
    }
    let attempts = job.retries + 1;
    (job.reject)(RateLimitError::Exhausted {
        key: inner.key.clone(),
        name: job.name,
        attempts,
        source: err,
    });
}

fn timeout_error() -> anyhow::Error {
    anyhow!("job timed out after {}s", JOB_TIMEOUT.as_secs())
}
