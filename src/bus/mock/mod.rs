//! Mock broker for testing.
//!
//! `MockChannel` serves scripted delivery sessions: each `setup_topology` call
//! takes the next session and streams its deliveries, then ends the stream the
//! way a lost connection would. Acks and publishes are recorded and can be made
//! to fail.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::{stream, StreamExt};

use super::{BrokerChannel, BusError, Connector, Delivery, DeliveryStream, Result, Topology};

/// Something that happened on a mock channel, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Setup(Topology),
    SetupFailed,
    Ack(u64),
    AckFailed(u64),
    Publish {
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
    },
    PublishFailed {
        routing_key: String,
    },
    Closed,
}

struct Session {
    deliveries: Vec<Delivery>,
    drops_connection: bool,
}

struct MockState {
    sessions: VecDeque<Session>,
    failing_acks: HashSet<u64>,
    fail_on_publish: bool,
    connected: bool,
    events: Vec<MockEvent>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            sessions: VecDeque::new(),
            failing_acks: HashSet::new(),
            fail_on_publish: false,
            connected: true,
            events: Vec::new(),
        }
    }
}

/// In-memory broker channel. Clones share state.
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a consumer session. Its stream ends after the given deliveries.
    pub fn push_session(&self, deliveries: Vec<Delivery>) {
        self.state().sessions.push_back(Session {
            deliveries,
            drops_connection: false,
        });
    }

    /// Queue a consumer session whose end also drops the connection.
    pub fn push_session_then_disconnect(&self, deliveries: Vec<Delivery>) {
        self.state().sessions.push_back(Session {
            deliveries,
            drops_connection: true,
        });
    }

    /// Make acknowledging `delivery_tag` fail.
    pub fn fail_ack(&self, delivery_tag: u64) {
        self.state().failing_acks.insert(delivery_tag);
    }

    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state().fail_on_publish = fail;
    }

    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Ack(tag) => Some(*tag),
                _ => None,
            })
            .collect()
    }

    /// Successfully published (routing key, payload) pairs.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Publish {
                    routing_key,
                    payload,
                    ..
                } => Some((routing_key.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of `setup_topology` calls, failed ones included.
    pub fn setup_count(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| matches!(e, MockEvent::Setup(_) | MockEvent::SetupFailed))
            .count()
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn setup_topology(&self, topology: &Topology) -> Result<DeliveryStream> {
        let session = {
            let mut state = self.state();
            if !state.connected {
                state.events.push(MockEvent::SetupFailed);
                return Err(BusError::Topology("Mock channel is closed".to_string()));
            }
            match state.sessions.pop_front() {
                Some(session) => {
                    state.events.push(MockEvent::Setup(topology.clone()));
                    session
                }
                None => {
                    state.events.push(MockEvent::SetupFailed);
                    return Err(BusError::Topology("No scripted session left".to_string()));
                }
            }
        };

        let deliveries = stream::iter(session.deliveries.into_iter().map(Ok));
        if !session.drops_connection {
            return Ok(deliveries.boxed());
        }

        let shared = self.state.clone();
        let disconnect = stream::once(async move {
            shared.lock().unwrap_or_else(|e| e.into_inner()).connected = false;
        })
        .filter_map(|_| async { None::<Result<Delivery>> });

        Ok(deliveries.chain(disconnect).boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let mut state = self.state();
        if state.failing_acks.contains(&delivery_tag) {
            state.events.push(MockEvent::AckFailed(delivery_tag));
            return Err(BusError::Ack(format!(
                "Mock ack failure for delivery {}",
                delivery_tag
            )));
        }
        state.events.push(MockEvent::Ack(delivery_tag));
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.fail_on_publish {
            state.events.push(MockEvent::PublishFailed {
                routing_key: routing_key.to_string(),
            });
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        state.events.push(MockEvent::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state();
        state.connected = false;
        state.events.push(MockEvent::Closed);
        Ok(())
    }
}

/// Connector handing out (clones of) one `MockChannel`.
///
/// A successful connect marks the channel connected again, standing in for a
/// freshly opened connection.
pub struct MockConnector {
    channel: MockChannel,
    failures: usize,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new(channel: MockChannel) -> Self {
        Self {
            channel,
            failures: 0,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the first `failures` connection attempts.
    pub fn failing(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn address(&self) -> String {
        "mock:5672".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(BusError::Connection(format!(
                "Mock connection refused (attempt {})",
                attempt
            )));
        }
        self.channel.set_connected(true);
        Ok(Arc::new(self.channel.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        Topology::for_role("payment", "order", "pay")
    }

    #[tokio::test]
    async fn test_session_streams_deliveries_then_ends() {
        let channel = MockChannel::new();
        channel.push_session(vec![
            Delivery::new(1, "pay", b"a".to_vec()),
            Delivery::new(2, "pay", b"b".to_vec()),
        ]);

        let stream = channel.setup_topology(&topology()).await.unwrap();
        let tags: Vec<u64> = stream
            .map(|d| d.unwrap().delivery_tag)
            .collect()
            .await;

        assert_eq!(tags, vec![1, 2]);
        assert!(channel.is_connected());
        assert_eq!(channel.setup_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnecting_session() {
        let channel = MockChannel::new();
        channel.push_session_then_disconnect(vec![Delivery::new(1, "pay", b"a".to_vec())]);

        let stream = channel.setup_topology(&topology()).await.unwrap();
        assert_eq!(stream.count().await, 1);
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_setup_without_session_fails() {
        let channel = MockChannel::new();
        let result = channel.setup_topology(&topology()).await;

        assert!(matches!(result, Err(BusError::Topology(_))));
        assert_eq!(channel.events(), vec![MockEvent::SetupFailed]);
    }

    #[tokio::test]
    async fn test_ack_failure_injection() {
        let channel = MockChannel::new();
        channel.fail_ack(7);

        assert!(channel.ack(6).await.is_ok());
        assert!(matches!(channel.ack(7).await, Err(BusError::Ack(_))));
        assert_eq!(channel.acked(), vec![6]);
    }

    #[tokio::test]
    async fn test_publish_recorded_and_failure() {
        let channel = MockChannel::new();
        channel.publish("order", "ship", b"{}").await.unwrap();

        channel.set_fail_on_publish(true);
        assert!(channel.publish("order", "abort", b"{}").await.is_err());

        assert_eq!(
            channel.published(),
            vec![("ship".to_string(), b"{}".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_connector_reconnects_channel() {
        let channel = MockChannel::new();
        channel.set_connected(false);
        let connector = MockConnector::new(channel.clone()).failing(1);

        assert!(connector.connect().await.is_err());
        let reconnected = connector.connect().await.unwrap();

        assert!(reconnected.is_connected());
        assert_eq!(connector.attempts(), 2);
    }
}
