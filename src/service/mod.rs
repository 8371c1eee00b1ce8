//! Payment worker.
//!
//! Connects to the broker, declares the pay queue and runs the consumer loop.
//! Deliveries are handled strictly one at a time (prefetch 1); see
//! [`consumer`] for the per-delivery protocol. When the delivery stream ends
//! the topology is rebuilt, reconnecting first if the connection is gone, and
//! consumption resumes.

pub mod consumer;
pub mod publisher;


pub use consumer::{OrderProcessor, Outcome, PaymentStep};
pub use publisher::StatusPublisher;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use prometheus::Registry;
use tracing::{error, info, info_span, warn, Instrument};

use crate::bus::{
    connect_with_retry, BrokerChannel, BusError, Connector, DeliveryStream, RetryPolicy, Sleeper,
    TokioSleeper, Topology,
};
use crate::config::{Config, DEFAULT_ROLE};
use crate::order::{OrderStatus, ORDER_EXCHANGE};
use crate::payment::{PaymentGateway, SimulatedPayment};
use crate::utils::metrics::RequestMetrics;

/// Errors that stop the worker.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Could not connect to broker: {0}")]
    Connect(#[source] BusError),

    #[error("Could not set up broker topology: {0}")]
    Topology(#[source] BusError),

    #[error("Stopped listening for orders, could not restart: {0}")]
    Rebuild(#[source] BusError),

    #[error("Gave up after {0} consecutive consumer restarts")]
    RestartLimit(u32),

    #[error("Could not register request metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Builder for [`PaymentService`].
pub struct PaymentServiceBuilder {
    connector: Arc<dyn Connector>,
    gateway: Arc<dyn PaymentGateway>,
    topology: Topology,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    metrics: Option<RequestMetrics>,
    max_consecutive_restarts: Option<u32>,
}

impl PaymentServiceBuilder {
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Counters to report into. Without them the service registers its own
    /// on a private registry.
    pub fn metrics(mut self, metrics: RequestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_consecutive_restarts(mut self, limit: Option<u32>) -> Self {
        self.max_consecutive_restarts = limit;
        self
    }

    /// Connect (with retry) and declare the topology.
    ///
    /// Fails if the retry budget is exhausted or the topology cannot be declared;
    /// the worker must not start serving in either case.
    pub async fn start(self) -> Result<PaymentService, ServiceError> {
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => RequestMetrics::register(&Registry::new())?,
        };

        let channel = connect_with_retry(self.connector.as_ref(), &self.retry, self.sleeper.as_ref())
            .await
            .map_err(ServiceError::Connect)?;

        let deliveries = channel
            .setup_topology(&self.topology)
            .await
            .map_err(|e| {
                error!(error = %e, "Could not set up order listener");
                ServiceError::Topology(e)
            })?;

        Ok(PaymentService {
            connector: self.connector,
            gateway: self.gateway,
            publisher: StatusPublisher::new(self.topology.exchange.clone()),
            topology: self.topology,
            retry: self.retry,
            sleeper: self.sleeper,
            metrics,
            max_consecutive_restarts: self.max_consecutive_restarts,
            channel,
            deliveries: Some(deliveries),
        })
    }
}

/// The running payment worker.
pub struct PaymentService {
    connector: Arc<dyn Connector>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: StatusPublisher,
    topology: Topology,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    metrics: RequestMetrics,
    max_consecutive_restarts: Option<u32>,
    channel: Arc<dyn BrokerChannel>,
    deliveries: Option<DeliveryStream>,
}

impl PaymentService {
    pub fn builder(
        connector: Arc<dyn Connector>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> PaymentServiceBuilder {
        PaymentServiceBuilder {
            connector,
            gateway,
            topology: Topology::for_role(
                DEFAULT_ROLE,
                ORDER_EXCHANGE,
                OrderStatus::Paying.routing_key(),
            ),
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            metrics: None,
            max_consecutive_restarts: None,
        }
    }

    /// Builder wired from loaded configuration, using the simulated gateway.
    pub fn from_config(connector: Arc<dyn Connector>, config: &Config) -> PaymentServiceBuilder {
        Self::builder(connector, Arc::new(SimulatedPayment::from(&config.simulator)))
            .topology(config.messaging.topology())
            .retry(config.retry.policy())
            .max_consecutive_restarts(config.consumer.max_consecutive_restarts)
    }

    /// The current broker channel. Close it after `run` returns.
    pub fn channel(&self) -> Arc<dyn BrokerChannel> {
        Arc::clone(&self.channel)
    }

    pub fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }

    /// Consume pay-order deliveries until the consumer can no longer be rebuilt.
    ///
    /// Only returns with an error: the stream ending is handled by rebuilding
    /// the topology.
    pub async fn run(&mut self) -> Result<(), ServiceError> {
        let mut consecutive_restarts = 0u32;

        loop {
            let mut deliveries = match self.deliveries.take() {
                Some(deliveries) => deliveries,
                None => self.rebuild().await?,
            };

            info!(queue = %self.topology.queue, "Listening for orders");

            while let Some(next) = deliveries.next().await {
                let delivery = match next {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        warn!(error = %e, "Delivery stream failed");
                        break;
                    }
                };

                let span = info_span!(
                    "payment.delivery",
                    delivery_tag = delivery.delivery_tag,
                    routing_key = %delivery.routing_key,
                    redelivered = delivery.redelivered
                );
                let processor = OrderProcessor::new(
                    self.channel.as_ref(),
                    self.gateway.as_ref(),
                    &self.publisher,
                    &self.metrics,
                );
                processor.process(&delivery).instrument(span).await;
                consecutive_restarts = 0;
            }
            drop(deliveries);

            consecutive_restarts += 1;
            if let Some(limit) = self.max_consecutive_restarts {
                if consecutive_restarts > limit {
                    error!(limit, "Stopped listening for orders, restart limit reached");
                    return Err(ServiceError::RestartLimit(limit));
                }
            }

            warn!(
                restarts = consecutive_restarts,
                "Stopped listening for orders, restarting"
            );
            if let Some(delay) = self.restart_delay(consecutive_restarts) {
                self.sleeper.sleep(delay).await;
            }
        }
    }

    /// Pause before a restart. The first restart in a row is immediate; further
    /// ones back off per the retry policy, holding at its longest delay.
    fn restart_delay(&self, consecutive_restarts: u32) -> Option<Duration> {
        let step = consecutive_restarts.checked_sub(2)? as usize;
        self.retry.delays().take(step + 1).last()
    }

    /// Declare the topology again, on a fresh connection if the current one is lost.
    async fn rebuild(&mut self) -> Result<DeliveryStream, ServiceError> {
        if !self.channel.is_connected() {
            warn!("Broker connection lost, reconnecting");
            if let Err(e) = self.channel.close().await {
                warn!(error = %e, "Could not close lost broker connection");
            }
            self.channel =
                connect_with_retry(self.connector.as_ref(), &self.retry, self.sleeper.as_ref())
                    .await
                    .map_err(|e| {
                        error!(error = %e, "Stopped listening for orders, could not reconnect");
                        ServiceError::Rebuild(e)
                    })?;
        }

        self.channel
            .setup_topology(&self.topology)
            .await
            .map_err(|e| {
                error!(error = %e, "Stopped listening for orders, could not restart");
                ServiceError::Rebuild(e)
            })
    }
}
