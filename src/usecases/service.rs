//! Service Lifecycle - Async Initialisation and Graceful Close
//!
//! Every network-backed component owns a `ServiceLifecycle`. Setup is
//! spawned at construction so callers never block on it, and every
//! public operation awaits `ready()` first so nobody observes a
//! half-initialised service.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, error, info};

use crate::adapters::rate_limit::RateLimiter;
use crate::domain::Params;
use crate::error::{ConfigError, ScanError};

type InitFuture = Shared<BoxFuture<'static, Result<(), Arc<str>>>>;

/// Init/close state shared by asset and price scanners.
pub struct ServiceLifecycle {
  name: String,
  init: InitFuture,
  limiter: Arc<RateLimiter>,
  closed: AtomicBool,
}

impl ServiceLifecycle {
  /// Validate `required` against `params` and spawn `setup`.
  ///
  /// Must be called inside a tokio runtime.
  pub fn start<F>(
    name: impl Into<String>,
    params: &Params,
    required: &[&str],
    limiter: Arc<RateLimiter>,
    setup: F,
  ) -> Self
  where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    let name = name.into();
    let missing = required
      .iter()
      .find(|key| params.get(**key).is_none_or(|v| v.is_null()))
      .map(|key| key.to_string());

    let task_name = name.clone();
    let handle = tokio::spawn(async move {
      let outcome = match missing {
        Some(key) => Err(anyhow::Error::new(ConfigError::MissingParameter {
          component: task_name.clone(),
          key,
        })),
        None => setup.await,
      };

      match outcome {
        Ok(()) => {
          debug!(service = %task_name, "Service initialised");
          Ok(())
        }
        Err(e) => {
          let message = format!("{e:#}");
          error!(service = %task_name, error = %message, "Service initialisation failed");
          Err(Arc::<str>::from(message))
        }
      }
    });

    let init = async move {
      match handle.await {
        Ok(outcome) => outcome,
        Err(e) => Err(Arc::<str>::from(anyhow!("initialisation task aborted: {e}").to_string())),
      }
    }
    .boxed()
    .shared();

    Self {
      name,
      init,
      limiter,
      closed: AtomicBool::new(false),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn limiter(&self) -> &Arc<RateLimiter> {
    &self.limiter
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  /// Wait for initialisation. Every caller sees the same outcome.
  pub async fn ready(&self) -> Result<(), ScanError> {
    if self.is_closed() {
      return Err(ScanError::Closed(self.name.clone()));
    }
    self
      .init
      .clone()
      .await
      .map_err(|message| ScanError::InitFailed {
        scanner: self.name.clone(),
        message,
      })
  }

  /// Mark closed and stop the limiter if this service owns it.
  ///
  /// Shared limiters are left running for their other users; the
  /// registry stops them on shutdown. Returns `false` when already
  /// closed.
  pub fn close(&self) -> bool {
    if self.closed.swap(true, Ordering::SeqCst) {
      return false;
    }
    if !self.limiter.is_shared() {
      self.limiter.stop();
    }
    info!(service = %self.name, "Service closed");
    true
  }
}

impl std::fmt::Debug for ServiceLifecycle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServiceLifecycle")
      .field("name", &self.name)
      .field("limiter", &self.limiter.key())
      .field("closed", &self.is_closed())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::adapters::rate_limit::RateLimiterOptions;

  fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new("svc", RateLimiterOptions::new(10.0, 0, 1)))
  }

  fn params(keys: &[&str]) -> Params {
    keys
      .iter()
      .map(|k| (k.to_string(), serde_json::json!("x")))
      .collect()
  }

  #[tokio::test]
  async fn test_ready_after_setup() {
    let svc = ServiceLifecycle::start("svc", &params(&["url"]), &["url"], limiter(), async {
      tokio::time::sleep(Duration::from_millis(20)).await;
      Ok(())
    });
    assert!(svc.ready().await.is_ok());
    assert!(svc.ready().await.is_ok());
  }

  #[tokio::test]
  async fn test_missing_parameter_names_component_and_key() {
    let svc = ServiceLifecycle::start("evm:ethereum", &Params::new(), &["rpc_url"], limiter(), async {
      Ok(())
    });
    let err = svc.ready().await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("evm:ethereum"));
    assert!(text.contains("rpc_url"));
  }

  #[tokio::test]
  async fn test_setup_failure_is_not_swallowed() {
    let svc = ServiceLifecycle::start("svc", &Params::new(), &[], limiter(), async {
      anyhow::bail!("handshake refused")
    });
    let err = svc.ready().await.unwrap_err();
    assert!(matches!(err, ScanError::InitFailed { ref message, .. } if message.contains("handshake refused")));
  }

  #[tokio::test]
  async fn test_close_is_idempotent_and_stops_private_limiter() {
    let limiter = limiter();
    let svc = ServiceLifecycle::start("svc", &Params::new(), &[], Arc::clone(&limiter), async { Ok(()) });

    assert!(svc.close());
    assert!(!svc.close());
    assert!(limiter.is_stopped());
    assert!(matches!(svc.ready().await, Err(ScanError::Closed(_))));
  }
}
