//! Broker connection and topology configuration.

use serde::Deserialize;

use crate::bus::Topology;
use crate::order::{OrderStatus, ORDER_EXCHANGE};

/// Role this service plays on the order exchange; names its queue.
pub const DEFAULT_ROLE: &str = "payment";

/// AMQP connection and topology settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Broker host.
    pub host: String,
    /// Broker AMQP port.
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Virtual host.
    pub vhost: String,
    /// Topic exchange carrying order lifecycle events.
    pub exchange: String,
    /// Service role, used to derive the queue name.
    pub role: String,
    /// Routing key of the orders this service handles.
    pub binding_key: String,
    /// Unacknowledged deliveries allowed per channel.
    pub prefetch: u16,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            exchange: ORDER_EXCHANGE.to_string(),
            role: DEFAULT_ROLE.to_string(),
            binding_key: OrderStatus::Paying.routing_key().to_string(),
            prefetch: 1,
        }
    }
}

impl MessagingConfig {
    /// AMQP URI including credentials.
    pub fn url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.username,
            self.password,
            self.host,
            self.port,
            self.vhost.replace('/', "%2f")
        )
    }

    /// `host:port`, safe to log.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn topology(&self) -> Topology {
        Topology::for_role(&self.role, &self.exchange, &self.binding_key)
    }
}
