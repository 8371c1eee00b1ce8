//! Worker behavior: connection retry, simulated payment latency, restarts.

use std::time::Duration;

use serde::Deserialize;

use crate::bus::RetryPolicy;

/// Broker connection retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Connection attempts before giving up, including the first.
    pub max_attempts: u32,
    /// Sleep after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff multiplier.
    pub factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            factor: policy.factor,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            factor: self.factor,
        }
    }
}

/// Payment simulator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Upper bound (exclusive) of the random delay per card character.
    pub max_char_delay_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_char_delay_ms: 5,
        }
    }
}

/// Consumer loop settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Give up after this many stream terminations in a row without a single
    /// processed delivery. Unbounded when unset.
    pub max_consecutive_restarts: Option<u32>,
}
