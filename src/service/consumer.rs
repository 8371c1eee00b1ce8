//! Per-delivery payment protocol.
//!
//! ```text
//! decode ──fail──> ack, drop
//!   │
//!   v
//! Authorizing ──> Acknowledging ──ack ok──> Publishing ──> Done
//!                       │
//!                       ├──ack failed, authorized──> Compensating ──> Done
//!                       └──ack failed, declined───────────────────> Done
//! ```
//!
//! A failed ack means the broker will redeliver the message, so the branch never
//! publishes; a charge that already went through is rolled back instead. Once
//! the ack succeeded the message is gone from the queue and the status update is
//! published exactly once, best effort.

use tracing::{error, info, warn};

use super::publisher::StatusPublisher;
use crate::bus::{BrokerChannel, Delivery};
use crate::order::{Order, OrderStatus, StatusUpdate};
use crate::payment::PaymentGateway;
use crate::utils::metrics::{RequestMethod, RequestMetrics};

/// Where a delivery is in the payment protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStep {
    Authorizing,
    Acknowledging { authorized: bool },
    Compensating,
    Publishing(StatusUpdate),
    Done(Outcome),
}

impl PaymentStep {
    /// Step following an acknowledgment attempt.
    pub fn after_ack(authorized: bool, acked: bool) -> Self {
        match (acked, authorized) {
            (true, _) => PaymentStep::Publishing(StatusUpdate::from_authorization(authorized)),
            (false, true) => PaymentStep::Compensating,
            (false, false) => PaymentStep::Done(Outcome::AwaitingRedelivery { rolled_back: false }),
        }
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Body could not be decoded; acknowledged (if possible) and dropped.
    Malformed { acked: bool },
    /// Ack failed; the broker will hand the message out again.
    AwaitingRedelivery { rolled_back: bool },
    /// Ack succeeded and the new status was published.
    Published(OrderStatus),
    /// Ack succeeded but the status update could not be published.
    PublishFailed(OrderStatus),
}

/// Runs the payment protocol for one delivery at a time.
pub struct OrderProcessor<'a> {
    channel: &'a dyn BrokerChannel,
    gateway: &'a dyn PaymentGateway,
    publisher: &'a StatusPublisher,
    metrics: &'a RequestMetrics,
}

impl<'a> OrderProcessor<'a> {
    pub fn new(
        channel: &'a dyn BrokerChannel,
        gateway: &'a dyn PaymentGateway,
        publisher: &'a StatusPublisher,
        metrics: &'a RequestMetrics,
    ) -> Self {
        Self {
            channel,
            gateway,
            publisher,
            metrics,
        }
    }

    pub async fn process(&self, delivery: &Delivery) -> Outcome {
        let mut order = match Order::decode(&delivery.data) {
            Ok(order) => order,
            Err(e) => {
                error!(error = %e, "Could not decode order message");
                // Acked anyway, otherwise the broker keeps redelivering it.
                let ack = self.channel.ack(delivery.delivery_tag).await;
                self.metrics.increment(RequestMethod::PayOrder, &ack);
                if let Err(e) = &ack {
                    error!(error = %e, "Could not ack message");
                }
                return Outcome::Malformed { acked: ack.is_ok() };
            }
        };

        let mut step = PaymentStep::Authorizing;
        loop {
            step = match step {
                PaymentStep::Authorizing => {
                    let authorized = self.gateway.authorize(&order.customer_credit_card).await;
                    PaymentStep::Acknowledging { authorized }
                }
                PaymentStep::Acknowledging { authorized } => {
                    let ack = self.channel.ack(delivery.delivery_tag).await;
                    self.metrics.increment(RequestMethod::PayOrder, &ack);
                    if let Err(e) = &ack {
                        error!(order_id = %order.id, error = %e, "Could not ack message");
                    }
                    PaymentStep::after_ack(authorized, ack.is_ok())
                }
                PaymentStep::Compensating => {
                    warn!(order_id = %order.id, "Rolling back payment");
                    self.gateway.rollback(&order.customer_credit_card).await;
                    info!(order_id = %order.id, "Payment rolled back");
                    PaymentStep::Done(Outcome::AwaitingRedelivery { rolled_back: true })
                }
                PaymentStep::Publishing(update) => {
                    let status = update.status;
                    match status {
                        OrderStatus::Aborted => {
                            warn!(order_id = %order.id, "Payment declined, aborting order")
                        }
                        _ => info!(order_id = %order.id, "Order paid"),
                    }
                    order.apply(update);

                    let published = self.publisher.publish(self.channel, &order).await;
                    self.metrics.increment(RequestMethod::PublishOrder, &published);
                    match published {
                        Ok(()) => PaymentStep::Done(Outcome::Published(status)),
                        Err(e) => {
                            error!(
                                order_id = %order.id,
                                status = %status,
                                error = %e,
                                "Could not publish order update"
                            );
                            PaymentStep::Done(Outcome::PublishFailed(status))
                        }
                    }
                }
                PaymentStep::Done(outcome) => return outcome,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MockChannel, MockEvent};
    use crate::payment::{GatewayCall, RecordingGateway};
    use crate::utils::metrics::RequestCount;

    struct Harness {
        channel: MockChannel,
        gateway: RecordingGateway,
        publisher: StatusPublisher,
        metrics: RequestMetrics,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                channel: MockChannel::new(),
                gateway: RecordingGateway::new(),
                publisher: StatusPublisher::new("order"),
                metrics: RequestMetrics::register(&prometheus::Registry::new()).unwrap(),
            }
        }

        async fn process(&self, delivery: &Delivery) -> Outcome {
            OrderProcessor::new(&self.channel, &self.gateway, &self.publisher, &self.metrics)
                .process(delivery)
                .await
        }
    }

    fn delivery(tag: u64, card: &str) -> Delivery {
        let body = serde_json::json!({
            "id": format!("o{}", tag),
            "customerCreditCard": card,
            "status": "Created",
        });
        Delivery::new(tag, "pay", serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn test_after_ack_transitions() {
        assert_eq!(
            PaymentStep::after_ack(true, true),
            PaymentStep::Publishing(StatusUpdate::shipping())
        );
        assert_eq!(
            PaymentStep::after_ack(false, true),
            PaymentStep::Publishing(StatusUpdate::from_authorization(false))
        );
        assert_eq!(PaymentStep::after_ack(true, false), PaymentStep::Compensating);
        assert_eq!(
            PaymentStep::after_ack(false, false),
            PaymentStep::Done(Outcome::AwaitingRedelivery { rolled_back: false })
        );
    }

    #[tokio::test]
    async fn test_authorized_order_is_shipped() {
        let h = Harness::new();

        let outcome = h.process(&delivery(1, "4242-4242")).await;

        assert_eq!(outcome, Outcome::Published(OrderStatus::Shipping));
        assert_eq!(h.channel.acked(), vec![1]);
        let published = h.channel.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "ship");
        let body: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body["status"], "Shipping");
        assert_eq!(body["orderId"], "o1");
        assert!(h.gateway.rollbacks().is_empty());
    }

    #[tokio::test]
    async fn test_declined_order_is_aborted() {
        let h = Harness::new();

        let outcome = h.process(&delivery(2, "abc123")).await;

        assert_eq!(outcome, Outcome::Published(OrderStatus::Aborted));
        let published = h.channel.published();
        assert_eq!(published[0].0, "abort");
        let order = Order::decode(&published[0].1).unwrap();
        assert_eq!(order.status, OrderStatus::Aborted);
        assert_eq!(order.message, crate::order::INSUFFICIENT_FUNDS_MESSAGE);
    }

    #[tokio::test]
    async fn test_failed_ack_rolls_back_without_publishing() {
        let h = Harness::new();
        h.channel.fail_ack(3);

        let outcome = h.process(&delivery(3, "4242-4242")).await;

        assert_eq!(outcome, Outcome::AwaitingRedelivery { rolled_back: true });
        assert!(h.channel.published().is_empty());
        assert_eq!(
            h.gateway.calls(),
            vec![
                GatewayCall::Authorize("4242-4242".to_string()),
                GatewayCall::Rollback("4242-4242".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_ack_on_declined_payment_has_nothing_to_undo() {
        let h = Harness::new();
        h.channel.fail_ack(4);

        let outcome = h.process(&delivery(4, "4111ABCD")).await;

        assert_eq!(outcome, Outcome::AwaitingRedelivery { rolled_back: false });
        assert!(h.channel.published().is_empty());
        assert!(h.gateway.rollbacks().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_message_is_acked_and_dropped() {
        let h = Harness::new();

        let outcome = h.process(&Delivery::new(5, "pay", b"{not json".to_vec())).await;

        assert_eq!(outcome, Outcome::Malformed { acked: true });
        assert_eq!(h.channel.events(), vec![MockEvent::Ack(5)]);
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_message_with_failed_ack() {
        let h = Harness::new();
        h.channel.fail_ack(6);

        let outcome = h.process(&Delivery::new(6, "pay", b"42".to_vec())).await;

        assert_eq!(outcome, Outcome::Malformed { acked: false });
        assert!(h.channel.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_retried() {
        let h = Harness::new();
        h.channel.set_fail_on_publish(true);

        let outcome = h.process(&delivery(7, "4242-4242")).await;

        assert_eq!(outcome, Outcome::PublishFailed(OrderStatus::Shipping));
        assert_eq!(
            h.channel.events(),
            vec![
                MockEvent::Ack(7),
                MockEvent::PublishFailed {
                    routing_key: "ship".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_metrics_follow_ack_and_publish() {
        let h = Harness::new();
        h.channel.fail_ack(9);

        h.process(&delivery(8, "4242-4242")).await;
        h.process(&delivery(9, "4242-4242")).await;
        h.process(&Delivery::new(10, "pay", b"garbage".to_vec())).await;

        let counts = h.metrics.snapshot();
        assert_eq!(counts.pay_order, RequestCount { ok: 2, err: 1 });
        assert_eq!(counts.publish_order, RequestCount { ok: 1, err: 0 });
    }

    #[tokio::test]
    async fn test_foreign_status_spelling_is_still_paid() {
        let h = Harness::new();
        let body = br#"{"orderId":"o12","customerCreditCard":"4242-4242","status":"PAYING"}"#;

        let outcome = h.process(&Delivery::new(12, "pay", body.to_vec())).await;

        assert_eq!(outcome, Outcome::Published(OrderStatus::Shipping));
        assert_eq!(
            h.gateway.calls(),
            vec![GatewayCall::Authorize("4242-4242".to_string())]
        );
    }

    #[tokio::test]
    async fn test_order_without_card_is_authorized_as_empty() {
        let h = Harness::new();
        let body = br#"{"orderId":"o13","status":"Paying"}"#;

        let outcome = h.process(&Delivery::new(13, "pay", body.to_vec())).await;

        assert_eq!(outcome, Outcome::Published(OrderStatus::Shipping));
        assert_eq!(h.gateway.calls(), vec![GatewayCall::Authorize(String::new())]);
        let order = Order::decode(&h.channel.published()[0].1).unwrap();
        assert_eq!(order.id, "o13");
        assert_eq!(order.status, OrderStatus::Shipping);
    }

    #[tokio::test]
    async fn test_passthrough_fields_survive() {
        let h = Harness::new();
        let body = br#"{"orderId":"o11","customerCreditCard":"1234","articles":["x"],"customerEmail":"max@web.de"}"#;

        h.process(&Delivery::new(11, "pay", body.to_vec())).await;

        let published: serde_json::Value =
            serde_json::from_slice(&h.channel.published()[0].1).unwrap();
        assert_eq!(published["articles"], serde_json::json!(["x"]));
        assert_eq!(published["customerEmail"], "max@web.de");
    }
}
