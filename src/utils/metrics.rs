//! Request counters.
//!
//! One Prometheus counter vector labelled by method and outcome. The counters
//! are registered with a caller-supplied `Registry` and handed to the service
//! as an explicit dependency; clones share the same series.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::debug;

/// Name of the request counter series.
pub const REQUESTS_METRIC: &str = "payment_requests_total";

const STATUS_OK: &str = "ok";
const STATUS_ERROR: &str = "error";

/// Broker-facing operation being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    /// Acknowledging a pay-order delivery.
    PayOrder,
    /// Publishing an order status update.
    PublishOrder,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::PayOrder => "PayOrder",
            RequestMethod::PublishOrder => "PublishOrder",
        }
    }
}

/// Success and error totals for one method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCount {
    pub ok: u64,
    pub err: u64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub pay_order: RequestCount,
    pub publish_order: RequestCount,
}

/// Shared request counters.
#[derive(Clone)]
pub struct RequestMetrics {
    requests: IntCounterVec,
}

impl RequestMetrics {
    /// Create the counters and register them with `registry`.
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new(REQUESTS_METRIC, "Broker requests by method and outcome"),
            &["method", "status"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        Ok(Self { requests })
    }

    /// Count one request of `method` by the outcome of `result`.
    pub fn increment<T, E>(&self, method: RequestMethod, result: &Result<T, E>) {
        let status = match result {
            Ok(_) => STATUS_OK,
            Err(_) => STATUS_ERROR,
        };
        self.requests
            .with_label_values(&[method.as_str(), status])
            .inc();
        debug!(method = method.as_str(), status, "Request counted");
    }

    fn count(&self, method: RequestMethod) -> RequestCount {
        RequestCount {
            ok: self
                .requests
                .with_label_values(&[method.as_str(), STATUS_OK])
                .get(),
            err: self
                .requests
                .with_label_values(&[method.as_str(), STATUS_ERROR])
                .get(),
        }
    }

    pub fn snapshot(&self) -> RequestCounts {
        RequestCounts {
            pay_order: self.count(RequestMethod::PayOrder),
            publish_order: self.count(RequestMethod::PublishOrder),
        }
    }
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn encode_text(registry: &Registry) -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
