//! Retry backoff for failed rotations
//!
//! Failed driver calls are not retried inline: the item goes back into the
//! queue with a priority pushed out by [`RetryPolicy::backoff_duration`].

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff policy for rescheduling failed rotations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Growth factor per consecutive failure
    pub multiplier: f64,

    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Consecutive failures after which exhaustion is reported
    ///
    /// Retries continue at `max_backoff` afterwards.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(5 * 60),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based)
    ///
    /// Exponential with ±10% jitter, capped at `max_backoff`. Once
    /// `max_attempts` is reached the delay is `max_backoff` flat.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt >= self.max_attempts {
            return self.max_backoff;
        }

        let base_ms = self.initial_backoff.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let backoff_ms = base_ms * self.multiplier.powi(exponent);

        // ±10% jitter so roles failing together do not retry together
        let jitter = rand::rng().random_range(0.9..=1.1);
        let jittered_ms = (backoff_ms * jitter).min(u64::MAX as f64) as u64;

        Duration::from_millis(jittered_ms).min(self.max_backoff)
    }

    /// Whether `failures` consecutive failures exhaust the policy
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}
