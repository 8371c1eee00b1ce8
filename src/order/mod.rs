//! Order record as it travels over the order exchange.
//!
//! The order service owns orders; this crate only decodes a transient copy per
//! message, moves it to its next status and publishes it again. Fields other
//! than id, status, message and credit card are carried through untouched.
//!
//! Decoding is lenient: missing fields are zero-filled and an unrecognized
//! incoming status is read as the default, since this service overwrites it.
//! Only a body that is not a JSON object, or has a known field of the wrong
//! type, fails to decode.

mod status;

pub use status::{OrderStatus, StatusUpdate, INSUFFICIENT_FUNDS_MESSAGE, SHIPPING_MESSAGE};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Topic exchange shared by every service interested in order lifecycle events.
pub const ORDER_EXCHANGE: &str = "order";

/// An order as carried in a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "orderId", alias = "id", default)]
    pub id: String,
    #[serde(default, deserialize_with = "status::deserialize_lenient")]
    pub status: OrderStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub customer_credit_card: String,
    /// Articles, address, customer details and anything else other services put
    /// on the order.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Order {
    /// Decode a message body. Unknown fields are kept in `details`.
    pub fn decode(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn apply(&mut self, update: StatusUpdate) {
        self.status = update.status;
        self.message = update.message;
    }
}
