use std::time::Duration;

use crate::config::RecoveryConfig;

/// Delay between failed attempts to get a usable channel.
///
/// Attempt `n` (1-based) waits `initial × 2^(n-1)`, capped at `max`, with
/// ±15% jitter. `max_attempts == 0` retries forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecreatePolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for RecreatePolicy {
    fn default() -> Self {
        Self::from(&RecoveryConfig::default())
    }
}

impl From<&RecoveryConfig> for RecreatePolicy {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.backoff_initial_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            max_attempts: config.max_recreate_attempts,
        }
    }
}

impl RecreatePolicy {
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }

    /// Delay before the next attempt, without jitter.
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    pub fn delay(&self, failures: u32) -> Duration {
        let base = self.base_delay(failures);
        // Exponential backoff with jitter
        let jitter = rand::random::<f64>() * 0.3 - 0.15;
        base.mul_f64(1.0 + jitter)
    }
}
