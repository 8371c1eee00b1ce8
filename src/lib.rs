//! Payment Service - order pipeline payment worker
//!
//! Consumes pay-order events from the RabbitMQ `order` exchange, simulates card
//! authorization, acknowledges the message (rolling the charge back if the ack
//! fails) and publishes the resulting order status back onto the exchange.

pub mod bus;
pub mod config;
pub mod order;
pub mod payment;
pub mod service;
pub mod utils;
