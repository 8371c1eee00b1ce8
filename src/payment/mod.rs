//! Payment authorization.
//!
//! `SimulatedPayment` stands in for a real payment gateway: a card is accepted
//! unless it contains a letter, and every character costs a small random delay
//! on both the charge and the rollback path.

mod recording;

pub use recording::{GatewayCall, RecordingGateway};

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::config::SimulatorConfig;

/// Charges a customer's card and undoes the charge.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Try to charge the card. Returns whether the payment was authorized.
    async fn authorize(&self, credit_card: &str) -> bool;

    /// Undo a charge made by a successful `authorize`.
    async fn rollback(&self, credit_card: &str);
}

fn normalize(credit_card: &str) -> String {
    credit_card.trim().to_lowercase()
}

fn is_letter(c: char) -> bool {
    c.is_ascii_lowercase()
}

/// Authorization rule without latency: after trimming and lowercasing, the card
/// must not contain any of `a`-`z`.
pub fn is_valid_card(credit_card: &str) -> bool {
    !normalize(credit_card).chars().any(is_letter)
}

/// Simulated gateway with per-character random latency.
#[derive(Debug, Clone)]
pub struct SimulatedPayment {
    max_char_delay: Duration,
}

impl SimulatedPayment {
    pub fn new(max_char_delay: Duration) -> Self {
        Self { max_char_delay }
    }

    /// No latency at all.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    async fn work(&self) {
        let max_ms = self.max_char_delay.as_millis() as u64;
        if max_ms == 0 {
            return;
        }
        let delay_ms = rand::rng().random_range(0..max_ms);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    /// Scan the normalized card one character at a time, stopping at the first letter.
    async fn scan(&self, credit_card: &str) -> bool {
        for c in normalize(credit_card).chars() {
            self.work().await;
            if is_letter(c) {
                return false;
            }
        }
        true
    }
}

impl From<&SimulatorConfig> for SimulatedPayment {
    fn from(config: &SimulatorConfig) -> Self {
        Self::new(Duration::from_millis(config.max_char_delay_ms))
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPayment {
    async fn authorize(&self, credit_card: &str) -> bool {
        let authorized = self.scan(credit_card).await;
        debug!(authorized, "Simulated payment authorization");
        authorized
    }

    async fn rollback(&self, credit_card: &str) {
        self.scan(credit_card).await;
        debug!("Simulated payment rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_and_spaces_are_valid() {
        assert!(is_valid_card("4111 1111"));
        assert!(is_valid_card("4242-4242"));
        assert!(is_valid_card("  123456789-123  "));
        assert!(is_valid_card(""));
    }

    #[test]
    fn test_letters_are_invalid() {
        assert!(!is_valid_card("abc123"));
        assert!(!is_valid_card("4111ABCD"));
        assert!(!is_valid_card("nocreditcard"));
        assert!(!is_valid_card(" 4111 1111 z"));
    }

    #[test]
    fn test_non_ascii_letters_are_not_rejected() {
        assert!(is_valid_card("4111-ß"));
    }

    #[tokio::test]
    async fn test_authorize_matches_rule() {
        let gateway = SimulatedPayment::instant();
        assert!(gateway.authorize("4111 1111").await);
        assert!(!gateway.authorize("abc123").await);
        assert!(!gateway.authorize("4111ABCD").await);
    }

    #[tokio::test]
    async fn test_rollback_completes() {
        let gateway = SimulatedPayment::new(Duration::from_millis(2));
        gateway.rollback("4242-4242").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_bounded_per_character() {
        let gateway = SimulatedPayment::new(Duration::from_millis(5));
        let started = tokio::time::Instant::now();

        assert!(gateway.authorize("1234").await);

        assert!(started.elapsed() < Duration::from_millis(4 * 5));
    }

    #[test]
    fn test_from_config() {
        let gateway = SimulatedPayment::from(&SimulatorConfig {
            max_char_delay_ms: 7,
        });
        assert_eq!(gateway.max_char_delay, Duration::from_millis(7));
    }
}
