//! Broadcasts order status changes on the order exchange.

use tracing::debug;

use crate::bus::{BrokerChannel, BusError};
use crate::order::Order;

/// Publishes updated orders under the routing key of their new status.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    exchange: String,
}

impl StatusPublisher {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
        }
    }

    /// Publish `order` on the exchange. No broker confirmation is awaited.
    pub async fn publish(&self, channel: &dyn BrokerChannel, order: &Order) -> Result<(), BusError> {
        let payload = order
            .encode()
            .map_err(|e| BusError::Publish(format!("Failed to encode order: {}", e)))?;
        let routing_key = order.status.routing_key();

        channel.publish(&self.exchange, routing_key, &payload).await?;

        debug!(
            order_id = %order.id,
            status = %order.status,
            routing_key,
            "Published order status update"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MockChannel, MockEvent};
    use crate::order::{OrderStatus, StatusUpdate};

    fn order() -> Order {
        Order::decode(br#"{"orderId":"o1","customerCreditCard":"4242-4242","status":"Paying"}"#)
            .unwrap()
    }

    #[tokio::test]
    async fn test_publishes_under_status_routing_key() {
        let channel = MockChannel::new();
        let publisher = StatusPublisher::new("order");
        let mut order = order();
        order.apply(StatusUpdate::shipping());

        publisher.publish(&channel, &order).await.unwrap();

        let events = channel.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            MockEvent::Publish {
                exchange,
                routing_key,
                payload,
            } => {
                assert_eq!(exchange, "order");
                assert_eq!(routing_key, "ship");
                let published = Order::decode(payload).unwrap();
                assert_eq!(published.status, OrderStatus::Shipping);
                assert_eq!(published.id, "o1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_aborted_routing_key() {
        let channel = MockChannel::new();
        let mut order = order();
        order.apply(StatusUpdate::aborted("no funds"));

        StatusPublisher::new("order")
            .publish(&channel, &order)
            .await
            .unwrap();

        assert_eq!(channel.published()[0].0, "abort");
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned() {
        let channel = MockChannel::new();
        channel.set_fail_on_publish(true);

        let result = StatusPublisher::new("order").publish(&channel, &order()).await;
        assert!(matches!(result, Err(BusError::Publish(_))));
    }
}
