//! Retry configuration and exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one. `0` behaves like `1`.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound on the non-jittered delay.
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub exponential_base: f64,
    /// Add up to 25% random jitter on top of the computed delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Profile for session registry lookups.
    pub fn registry() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Profile for backend desktop connects.
    pub fn connect() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after failed attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.exponential_base.max(1.0).powi(exp);
        let secs = self.initial_delay.as_secs_f64() * factor;
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay after failed attempt `attempt` including jitter.
    ///
    /// Jitter only ever adds to [`base_delay`](Self::base_delay).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let extra = base.as_secs_f64() * rand::rng().random::<f64>() * 0.25;
        base + Duration::from_secs_f64(extra)
    }
}

/// Serialise durations as integer milliseconds in config files.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ── Tests ────────────────────────────────────────────────────────
