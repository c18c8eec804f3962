//! In-process broker used by tests and dry runs.

use crate::error::{ConnectError, TransportError};
use crate::topic::topic_matches;
use crate::transport::{
    DeviceCredentials, InboundMessage, Link, Transport, TransportFactory, INBOUND_BUFFER,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A message recorded by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub client_id: String,
    pub channel: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

struct Subscription {
    client_id: String,
    filter: String,
    sender: mpsc::Sender<InboundMessage>,
}

#[derive(Default)]
struct BrokerState {
    published: Vec<PublishedMessage>,
    subscriptions: Vec<Subscription>,
    refused: HashSet<String>,
    failing: bool,
    connects: usize,
}

/// Broker kept entirely in memory.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    echo: bool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every published message at info level
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Refuse future connections from `client_id`
    pub fn refuse(&self, client_id: impl Into<String>) {
        self.state.lock().refused.insert(client_id.into());
    }

    /// Make every publish fail until reset
    pub fn fail_publishes(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Number of accepted connections
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// All messages accepted so far, in arrival order
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    pub fn messages_on(&self, channel: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }

    pub fn messages_from(&self, client_id: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|m| m.client_id == client_id)
            .cloned()
            .collect()
    }

    /// Publish as an outside client, e.g. to feed a subscriber under test
    pub fn inject(&self, channel: &str, payload: impl Into<Vec<u8>>) {
        self.route("external", channel, payload.into());
    }

    fn route(&self, client_id: &str, channel: &str, payload: Vec<u8>) {
        let mut state = self.state.lock();
        state.subscriptions.retain(|s| !s.sender.is_closed());
        for subscription in state
            .subscriptions
            .iter()
            .filter(|s| topic_matches(&s.filter, channel))
        {
            let message = InboundMessage {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            if subscription.sender.try_send(message).is_err() {
                warn!(
                    client = %subscription.client_id,
                    channel,
                    "Subscriber buffer full, message dropped"
                );
            }
        }
        state.published.push(PublishedMessage {
            client_id: client_id.to_string(),
            channel: channel.to_string(),
            payload,
        });
    }
}

#[async_trait]
impl TransportFactory for MemoryBroker {
    fn requires_credentials(&self) -> bool {
        false
    }

    async fn connect(
        &self,
        client_id: &str,
        _credentials: Option<&DeviceCredentials>,
    ) -> Result<Link, ConnectError> {
        {
            let mut state = self.state.lock();
            if state.refused.contains(client_id) {
                return Err(ConnectError::Refused {
                    client_id: client_id.to_string(),
                    reason: "not authorized".to_string(),
                });
            }
            state.connects += 1;
        }

        let (sender, inbound) = mpsc::channel(INBOUND_BUFFER);
        let transport = MemoryTransport {
            client_id: client_id.to_string(),
            broker: self.clone(),
            sender,
            connected: AtomicBool::new(true),
        };
        debug!(client = client_id, "Memory transport connected");

        Ok(Link {
            transport: Arc::new(transport),
            inbound,
        })
    }
}

/// Client session on a [`MemoryBroker`]
pub struct MemoryTransport {
    client_id: String,
    broker: MemoryBroker,
    sender: mpsc::Sender<InboundMessage>,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.broker.state.lock().failing {
            return Err(TransportError::Client("publish refused by broker".to_string()));
        }
        if self.broker.echo {
            info!(
                client = %self.client_id,
                channel,
                "dry-run publish: {}",
                String::from_utf8_lossy(&payload)
            );
        }
        self.broker.route(&self.client_id, channel, payload);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.broker.state.lock().subscriptions.push(Subscription {
            client_id: self.client_id.clone(),
            filter: filter.to_string(),
            sender: self.sender.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        self.broker
            .state
            .lock()
            .subscriptions
            .retain(|s| s.client_id != self.client_id);
        debug!(client = %self.client_id, "Memory transport disconnected");
        Ok(())
    }
}
