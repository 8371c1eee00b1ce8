//! Message broker access.
//!
//! This module contains:
//! - `Connector` trait: opens a fresh connection + channel to the broker
//! - `BrokerChannel` trait: topology, acknowledgment and publishing on one channel
//! - `Topology`: the exchange/queue/binding this service consumes from
//! - Implementations: AMQP (RabbitMQ), Mock
//! - `retry`: connection retry policy

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

// Implementation modules
pub mod amqp;
pub mod mock;
pub mod retry;

// Re-exports
pub use amqp::{AmqpChannel, AmqpConnector};
pub use mock::{MockChannel, MockConnector, MockEvent};
pub use retry::{connect_with_retry, RetryPolicy, Sleeper, TokioSleeper};

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Topology setup failed: {0}")]
    Topology(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Ack failed: {0}")]
    Ack(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Close failed: {0}")]
    Close(String),
}

/// A message handed to this service by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned tag used to acknowledge this delivery on its channel.
    pub delivery_tag: u64,
    pub routing_key: String,
    pub redelivered: bool,
    pub data: Vec<u8>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, routing_key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            routing_key: routing_key.into(),
            redelivered: false,
            data: data.into(),
        }
    }
}

/// Deliveries from a registered consumer. Ends when the channel or connection is lost.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Broker objects this service declares and consumes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Durable topic exchange shared by all order services.
    pub exchange: String,
    /// Durable queue owned by this service's role.
    pub queue: String,
    /// Routing key bound from the exchange to the queue.
    pub binding_key: String,
}

impl Topology {
    /// Topology for a service role, e.g. role `payment` on exchange `order`
    /// consumes from `payment_order_queue`.
    pub fn for_role(role: &str, exchange: &str, binding_key: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            queue: format!("{}_{}_queue", role, exchange),
            binding_key: binding_key.to_string(),
        }
    }
}

/// One logical channel to the broker.
///
/// The channel owns its underlying connection. Callers borrow it through
/// `Arc<dyn BrokerChannel>`; only the connector creates new ones.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Whether the channel and its connection are still usable.
    fn is_connected(&self) -> bool;

    /// Declare exchange, queue and binding, then register a manual-ack consumer.
    ///
    /// Safe to call again on an existing topology.
    async fn setup_topology(&self, topology: &Topology) -> Result<DeliveryStream>;

    /// Acknowledge a single delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Publish a JSON payload. Returns once the publish was handed to the channel.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Close the channel, then the connection.
    async fn close(&self) -> Result<()>;
}

/// Opens connections to the broker.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Broker address for logging. Never includes credentials.
    fn address(&self) -> String;

    /// Single connection attempt: connection, channel and QoS.
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>>;
}
