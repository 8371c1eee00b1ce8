//! payment-service: order pipeline payment worker
//!
//! Consumes `pay` events from the `order` exchange, authorizes the card and
//! publishes the order as `Shipping` or `Aborted`.
//!
//! ## Architecture
//! ```text
//! [order exchange] --(pay)--> [payment_order_queue] --> [payment-service]
//!        ^                                                     |
//!        +-----------------(ship | abort)---------------------+
//! ```
//!
//! ## Configuration
//! - `--config <path>` / PAYMENT_CONFIG: YAML configuration file
//! - PAYMENT__<SECTION>__<KEY>: per-key overrides, e.g. PAYMENT__MESSAGING__HOST
//! - RABBIT_MQ_ADDRESS / RABBIT_MQ_PORT: broker host and port
//! - PAYMENT_LOG: log filter (default: info)

use std::sync::Arc;

use prometheus::Registry;
use tracing::{debug, error, info, warn};

use payment_service::bus::AmqpConnector;
use payment_service::config::Config;
use payment_service::service::PaymentService;
use payment_service::utils::bootstrap::{init_tracing, parse_config_path};
use payment_service::utils::metrics::{encode_text, RequestMetrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref())?;

    info!(
        broker = %config.messaging.address(),
        exchange = %config.messaging.exchange,
        binding_key = %config.messaging.binding_key,
        "Starting payment-service"
    );

    let connector = Arc::new(AmqpConnector::new(&config.messaging));
    let registry = Registry::new();
    let metrics = RequestMetrics::register(&registry)?;

    let mut service = PaymentService::from_config(connector, &config)
        .metrics(metrics.clone())
        .start()
        .await?;

    info!("Server listening");

    let result = tokio::select! {
        result = service.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    if let Err(e) = service.channel().close().await {
        warn!(error = %e, "Could not close broker connection");
    }

    let counts = metrics.snapshot();
    info!(
        pay_order_ok = counts.pay_order.ok,
        pay_order_err = counts.pay_order.err,
        publish_order_ok = counts.publish_order.ok,
        publish_order_err = counts.publish_order.err,
        "payment-service stopped"
    );
    match encode_text(&registry) {
        Ok(text) => debug!(metrics = %text, "Final metrics"),
        Err(e) => warn!(error = %e, "Could not encode metrics"),
    }

    if let Err(e) = &result {
        error!(error = %e, "payment-service terminated");
    }
    result?;

    Ok(())
}
