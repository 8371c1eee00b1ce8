//! AMQP (RabbitMQ) broker access.
//!
//! One connection with one channel per service instance. The channel is set to
//! prefetch 1 so that instances sharing a queue get deliveries round-robin, one
//! unacknowledged message each.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info};

use super::{BrokerChannel, BusError, Connector, Delivery, DeliveryStream, Result, Topology};
use crate::config::MessagingConfig;

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Opens AMQP connections configured for this worker.
#[derive(Clone, Debug)]
pub struct AmqpConnector {
    url: String,
    address: String,
    prefetch: u16,
}

impl AmqpConnector {
    pub fn new(config: &MessagingConfig) -> Self {
        Self {
            url: config.url(),
            address: config.address(),
            prefetch: config.prefetch,
        }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to set QoS: {}", e)))?;

        info!(
            broker = %self.address,
            prefetch = self.prefetch,
            "Connected to AMQP"
        );

        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
        }))
    }
}

/// A live AMQP channel together with the connection it runs on.
pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            data: delivery.data,
        }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn setup_topology(&self, topology: &Topology) -> Result<DeliveryStream> {
        self.channel
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("Failed to declare exchange: {}", e)))?;

        let queue = self
            .channel
            .queue_declare(
                &topology.queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("Failed to declare queue: {}", e)))?;

        self.channel
            .queue_bind(
                queue.name().as_str(),
                &topology.exchange,
                &topology.binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("Failed to bind queue: {}", e)))?;

        info!(
            exchange = %topology.exchange,
            queue = %queue.name(),
            routing_key = %topology.binding_key,
            "Bound queue to exchange"
        );

        // Manual acknowledgment: deliveries stay pending until acked.
        let consumer = self
            .channel
            .basic_consume(
                queue.name().as_str(),
                // Empty tag: the broker generates a unique one.
                "",
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("Failed to start consumer: {}", e)))?;

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(Delivery::from)
                    .map_err(|e| BusError::Consume(e.to_string()))
            })
            .boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        // Publisher confirms are not enabled; the returned confirm is not awaited.
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2), // persistent
            )
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            "Published message"
        );

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // The connection is closed even when closing the channel fails.
        let channel_closed = if self.channel.status().connected() {
            self.channel
                .close(REPLY_SUCCESS, "payment-service shutdown")
                .await
                .map_err(|e| BusError::Close(format!("Failed to close channel: {}", e)))
        } else {
            Ok(())
        };
        if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "payment-service shutdown")
                .await
                .map_err(|e| BusError::Close(format!("Failed to close connection: {}", e)))?;
        }
        channel_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_hides_credentials() {
        let config = MessagingConfig {
            password: "s3cret".to_string(),
            ..Default::default()
        };
        let connector = AmqpConnector::new(&config);

        assert!(connector.url.contains("s3cret"));
        assert!(!connector.address().contains("s3cret"));
        assert_eq!(connector.prefetch, 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_connection_error() {
        let config = MessagingConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };

        let result = AmqpConnector::new(&config).connect().await;
        assert!(matches!(result, Err(BusError::Connection(_))));
    }
}
