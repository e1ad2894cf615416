//! Rejoin backoff for channels that keep failing to connect.
//!
//! After `n` consecutive failed connects the next sweep-driven rejoin waits
//! `first × factor^(n-1)`, clamped to `max`. With no failures the channel is
//! rejoined on the next sweep.

use std::time::Duration;

use mirkobot_config::SupervisorConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth per extra failure.
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            first: Duration::from_secs(config.backoff_first_secs),
            max: Duration::from_secs(config.backoff_max_secs.max(config.backoff_first_secs)),
            ..Self::default()
        }
    }

    /// Delay before retrying after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = (failures - 1).min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
