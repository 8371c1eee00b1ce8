//! Connection retry policy.
//!
//! The policy is a plain value (attempt budget + exponential backoff built with
//! `backon`); sleeping is injected through [`Sleeper`] so the schedule can be
//! checked without waiting on a real clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{error, info, warn};

use super::{BrokerChannel, Connector, Result};

/// Bounded exponential backoff for broker connection attempts.
///
/// Defaults: 6 attempts, sleeping 1s, 2s, 4s, 8s, 16s in between. The delay is
/// bounded by the attempt budget only; there is no separate ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each further failure.
    pub factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    fn retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Backoff builder for this policy. No jitter.
    pub fn backoff(&self) -> ExponentialBuilder {
        let retries = self.retries();
        let largest = self
            .base_delay
            .mul_f64(f64::from(self.factor.max(1.0)).powi(retries as i32));

        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(self.factor)
            .with_max_delay(largest.max(self.base_delay))
            .with_max_times(retries as usize)
    }

    /// Delays slept between consecutive attempts, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        self.backoff().build()
    }
}

/// Suspends the current task between retry attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Connect through `connector`, retrying per `policy`.
///
/// Returns the last connection error once the attempt budget is spent.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<Arc<dyn BrokerChannel>> {
    let address = connector.address();
    let mut delays = policy.delays();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match connector.connect().await {
            Ok(channel) => {
                info!(broker = %address, attempt, "Connected to broker");
                return Ok(channel);
            }
            Err(e) => match delays.next() {
                Some(delay) => {
                    warn!(
                        broker = %address,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay = ?delay,
                        error = %e,
                        "Broker connection failed, retrying"
                    );
                    sleeper.sleep(delay).await;
                }
                None => {
                    error!(
                        broker = %address,
                        attempts = attempt,
                        error = %e,
                        "Giving up connecting to broker"
                    );
                    return Err(e);
                }
            },
        }
    }
}
