//! Retry and circuit breaking for outbound calls.
//!
//! Every call to a backend service goes through a [`Policy`]: one per
//! operation category (registry lookups, backend connects), created at
//! startup and shared across sessions.
//!
//! ```text
//! policy.call(&cancel, BridgeError::is_retryable, || op())
//!   │
//!   ├─ breaker.try_acquire()   ── open? ──► CircuitOpen (op not invoked)
//!   ├─ op().await              ── ok ─────► permit.success()
//!   │    (cancelled or dropped) ──────────► permit released unsettled
//!   └─ err ─► permit.failure()
//!             fatal or budget spent? ─────► Err
//!             else sleep(backoff) unless cancelled
//! ```

pub mod circuit_breaker;
pub mod retry;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::BridgeError;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, Permit,
};
pub use retry::RetryConfig;

/// Decides whether a failure is worth another attempt.
pub type Classifier = fn(&BridgeError) -> bool;

/// Retry profile plus the breaker for one operation category.
#[derive(Debug, Clone)]
pub struct Policy {
    name: &'static str,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
}

impl Policy {
    pub fn new(name: &'static str, retry: RetryConfig, breaker: CircuitBreakerConfig) -> Self {
        Self {
            name,
            retry,
            breaker: Arc::new(CircuitBreaker::new(name, breaker)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` under this policy.
    ///
    /// `classify` returns `true` for failures that should be retried.
    /// Cancellation is checked before every attempt and interrupts the
    /// backoff sleep.
    pub async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        classify: Classifier,
        mut op: F,
    ) -> Result<T, BridgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let attempts = self.retry.attempts();
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }

            let permit = self.breaker.try_acquire()?;

            let result = tokio::select! {
                r = op() => r,
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
            };

            let err = match result {
                Ok(value) => {
                    permit.success();
                    return Ok(value);
                }
                Err(e) => e,
            };

            permit.failure();

            if !classify(&err) {
                warn!(policy = self.name, "non-retryable error: {err}");
                return Err(err);
            }
            if attempt >= attempts {
                error!(
                    policy = self.name,
                    "max retry attempts ({attempts}) reached: {err}"
                );
                return Err(err);
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                policy = self.name,
                "retryable error (attempt {attempt}/{attempts}): {err}; retrying in {:.2}s",
                delay.as_secs_f64()
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
            }
            attempt += 1;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
