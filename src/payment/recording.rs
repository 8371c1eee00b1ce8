//! Gateway double that records calls.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{is_valid_card, PaymentGateway};

/// A call made against a [`RecordingGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Authorize(String),
    Rollback(String),
}

/// Applies the simulator's authorization rule instantly and records every call.
/// Clones share the call log.
#[derive(Debug, Clone, Default)]
pub struct RecordingGateway {
    calls: Arc<Mutex<Vec<GatewayCall>>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn rollbacks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Rollback(card) => Some(card),
                GatewayCall::Authorize(_) => None,
            })
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn authorize(&self, credit_card: &str) -> bool {
        self.record(GatewayCall::Authorize(credit_card.to_string()));
        is_valid_card(credit_card)
    }

    async fn rollback(&self, credit_card: &str) {
        self.record(GatewayCall::Rollback(credit_card.to_string()));
    }
}
