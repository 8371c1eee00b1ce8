//! Order lifecycle stages and their broker routing keys.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Customer-facing explanation attached to an order aborted for payment reasons.
pub const INSUFFICIENT_FUNDS_MESSAGE: &str =
    "We could not get the needed amount from your credit card. Please check your account.";

/// Message attached to an order once payment went through.
pub const SHIPPING_MESSAGE: &str = "Payment received. Your order is being prepared for shipping.";

/// Lifecycle stage of an order.
///
/// Serialized by variant name (`"Created"`, `"Shipping"`, ...). Each stage has a
/// routing key on the order exchange so downstream services can bind only to the
/// transitions they care about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    Created,
    Reserving,
    Paying,
    Shipping,
    Complete,
    Aborted,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Created,
        OrderStatus::Reserving,
        OrderStatus::Paying,
        OrderStatus::Shipping,
        OrderStatus::Complete,
        OrderStatus::Aborted,
    ];

    /// Stage by name, ignoring ASCII case (`"Paying"`, `"PAYING"`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.to_string().eq_ignore_ascii_case(name))
    }

    /// Routing key under which orders entering this stage are published.
    pub fn routing_key(&self) -> &'static str {
        match self {
            OrderStatus::Created => "create",
            OrderStatus::Reserving => "reserve",
            OrderStatus::Paying => "pay",
            OrderStatus::Shipping => "ship",
            OrderStatus::Complete => "complete",
            OrderStatus::Aborted => "abort",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Read an incoming status without ever failing: unknown names, other JSON
/// types and `null` all fall back to the default stage.
pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<OrderStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(OrderStatus::from_name)
        .unwrap_or_default())
}

/// A status transition together with the message shown to the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    pub message: String,
}

impl StatusUpdate {
    /// Payment went through; the order moves on to shipping.
    pub fn shipping() -> Self {
        Self {
            status: OrderStatus::Shipping,
            message: SHIPPING_MESSAGE.to_string(),
        }
    }

    /// The order cannot continue.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::Aborted,
            message: reason.into(),
        }
    }

    /// Transition decided by a payment authorization.
    pub fn from_authorization(authorized: bool) -> Self {
        if authorized {
            Self::shipping()
        } else {
            Self::aborted(INSUFFICIENT_FUNDS_MESSAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pay_routing_key() {
        assert_eq!(OrderStatus::Paying.routing_key(), "pay");
    }

    #[test]
    fn test_routing_keys_are_distinct() {
        let keys: std::collections::HashSet<_> =
            OrderStatus::ALL.iter().map(|s| s.routing_key()).collect();
        assert_eq!(keys.len(), OrderStatus::ALL.len());
    }

    #[test]
    fn test_from_name_ignores_case() {
        assert_eq!(OrderStatus::from_name("Paying"), Some(OrderStatus::Paying));
        assert_eq!(OrderStatus::from_name("COMPLETE"), Some(OrderStatus::Complete));
        assert_eq!(OrderStatus::from_name("aborted"), Some(OrderStatus::Aborted));
        assert_eq!(OrderStatus::from_name("Refunding"), None);
    }

    #[test]
    fn test_from_authorization() {
        assert_eq!(
            StatusUpdate::from_authorization(true).status,
            OrderStatus::Shipping
        );

        let aborted = StatusUpdate::from_authorization(false);
        assert_eq!(aborted.status, OrderStatus::Aborted);
        assert_eq!(aborted.message, INSUFFICIENT_FUNDS_MESSAGE);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Shipping).unwrap(),
            "\"Shipping\""
        );
        let status: OrderStatus = serde_json::from_str("\"Aborted\"").unwrap();
        assert_eq!(status, OrderStatus::Aborted);
    }
}
