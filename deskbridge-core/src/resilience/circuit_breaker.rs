//! Circuit breaker shared by every call in one operation category.
//!
//! ```text
//!            failures >= threshold
//!   Closed ───────────────────────────► Open
//!     ▲                                  │ recovery_timeout elapsed
//!     │ trial ok                         ▼
//!     └──────────────────────────── HalfOpen ──► Open (trial failed)
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::BridgeError;
use crate::resilience::retry::duration_ms;

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call.
    #[serde(with = "duration_ms")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: &'static str,
    pub state: CircuitState,
    pub failure_count: u32,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Thread-safe breaker. Count updates and state transitions happen
/// under one lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state, accounting for an elapsed recovery timeout.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open if self.recovery_elapsed(&inner) => CircuitState::HalfOpen,
            s => s,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.name,
            state: self.state(),
            failure_count: self.failure_count(),
        }
    }

    /// Ask permission to run the protected operation.
    ///
    /// While open this fails fast. Once the recovery timeout has passed
    /// exactly one caller is admitted as the half-open trial; everyone
    /// else is rejected until that trial reports back or its permit is
    /// dropped.
    pub fn try_acquire(&self) -> Result<Permit<'_>, BridgeError> {
        let mut inner = self.inner.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if !self.recovery_elapsed(&inner) {
                    return Err(BridgeError::CircuitOpen(self.name));
                }
                inner.state = CircuitState::HalfOpen;
                info!(breaker = self.name, "circuit half-open, admitting trial call");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(BridgeError::CircuitOpen(self.name));
                }
                true
            }
        };
        if trial {
            inner.trial_in_flight = true;
        }
        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            info!(breaker = self.name, "trial call succeeded, circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                error!(breaker = self.name, "trial call failed, circuit re-opened");
            }
            CircuitState::Closed if inner.failures >= self.config.failure_threshold.max(1) => {
                inner.state = CircuitState::Open;
                error!(
                    breaker = self.name,
                    failures = inner.failures,
                    "circuit opened"
                );
            }
            _ => {}
        }
    }

    fn release(&self) {
        self.inner.lock().trial_in_flight = false;
    }

    fn recovery_elapsed(&self, inner: &Inner) -> bool {
        inner
            .last_failure
            .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout)
    }
}

// ── Permit ───────────────────────────────────────────────────────

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Settle it with [`success`](Self::success) or
/// [`failure`](Self::failure). Dropping it unsettled (the caller was
/// cancelled, or its future was dropped) frees the half-open slot
/// without judging the backend.
#[must_use = "an unsettled permit is released on drop"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this permit holds the single half-open slot.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
