//! MQTT transport over rumqttc.
//!
//! Each client gets its own event loop task. The task signals the connection
//! acknowledgement, forwards incoming publishes to the link's inbound channel
//! and logs broker acknowledgements. It stops on disconnect, on shutdown or
//! on the first connection error; there is no automatic reconnect.

use crate::error::{ConnectError, TransportError};
use crate::transport::{
    read_artifact, DeviceCredentials, InboundMessage, Link, Transport, TransportFactory,
    INBOUND_BUFFER,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration,
    Transport as MqttNetwork,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vemo_core::{BrokerSettings, DeviceId};

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 64;

/// Opens MQTT sessions against one broker endpoint
pub struct MqttFactory {
    settings: BrokerSettings,
    root_ca: Option<Vec<u8>>,
}

impl MqttFactory {
    /// Build a factory; loads the root CA when TLS is enabled
    pub fn new(settings: BrokerSettings) -> Result<Self, ConnectError> {
        let root_ca = if settings.use_tls {
            let owner = DeviceId::new("root-ca");
            Some(read_artifact(&owner, &settings.root_ca)?)
        } else {
            None
        };
        Ok(Self { settings, root_ca })
    }

    fn options(
        &self,
        client_id: &str,
        credentials: Option<&DeviceCredentials>,
    ) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, &self.settings.endpoint, self.settings.port);
        options.set_keep_alive(self.settings.keep_alive().max(Duration::from_secs(5)));
        options.set_clean_session(true);

        if let Some(ca) = &self.root_ca {
            let client_auth = credentials
                .map(|c| (c.certificate_pem.clone(), c.private_key_pem.clone()));
            options.set_transport(MqttNetwork::Tls(TlsConfiguration::Simple {
                ca: ca.clone(),
                alpn: None,
                client_auth,
            }));
        }
        options
    }
}

#[async_trait]
impl TransportFactory for MqttFactory {
    fn requires_credentials(&self) -> bool {
        self.settings.use_tls
    }

    async fn connect(
        &self,
        client_id: &str,
        credentials: Option<&DeviceCredentials>,
    ) -> Result<Link, ConnectError> {
        let (client, eventloop) =
            AsyncClient::new(self.options(client_id, credentials), REQUEST_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_BUFFER);
        let (connack_tx, connack_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();

        debug!(
            client = client_id,
            endpoint = %self.settings.endpoint,
            port = self.settings.port,
            "Connecting to MQTT broker"
        );
        let task = tokio::spawn(run_event_loop(
            client_id.to_string(),
            eventloop,
            inbound_tx,
            connack_tx,
            shutdown.clone(),
        ));

        let after = self.settings.connect_timeout();
        match tokio::time::timeout(after, connack_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(reason))) => {
                return Err(ConnectError::Refused {
                    client_id: client_id.to_string(),
                    reason,
                })
            }
            Ok(Err(_)) => {
                return Err(ConnectError::Refused {
                    client_id: client_id.to_string(),
                    reason: "event loop stopped".to_string(),
                })
            }
            Err(_) => {
                shutdown.cancel();
                return Err(ConnectError::Timeout {
                    client_id: client_id.to_string(),
                    after,
                });
            }
        }

        let transport = MqttTransport {
            client_id: client_id.to_string(),
            client,
            shutdown,
            task: Mutex::new(Some(task)),
            operation_timeout: self.settings.operation_timeout(),
        };
        Ok(Link {
            transport: Arc::new(transport),
            inbound,
        })
    }
}

/// One MQTT client session
pub struct MqttTransport {
    client_id: String,
    client: AsyncClient,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    operation_timeout: Duration,
}

#[async_trait]
impl Transport for MqttTransport {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.client
            .publish(channel, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let requested = self.client.disconnect().await;

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.operation_timeout, &mut handle)
                .await
                .is_err()
            {
                warn!(client = %self.client_id, "Event loop did not stop, cancelling");
                self.shutdown.cancel();
                handle.abort();
            }
        }
        self.shutdown.cancel();

        requested.map_err(|e| TransportError::Client(e.to_string()))
    }
}

async fn run_event_loop(
    client_id: String,
    mut eventloop: EventLoop,
    inbound: mpsc::Sender<InboundMessage>,
    connack: oneshot::Sender<Result<(), String>>,
    shutdown: CancellationToken,
) {
    let mut connack = Some(connack);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(client = %client_id, "Event loop cancelled");
                break;
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(client = %client_id, "Connected to MQTT broker");
                        if let Some(tx) = connack.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!(client = %client_id, pkid = ack.pkid, "Publish acknowledged");
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!(client = %client_id, "Subscription acknowledged");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage {
                            channel: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if let Err(mpsc::error::TrySendError::Full(_)) = inbound.try_send(message) {
                            warn!(client = %client_id, "Inbound buffer full, message dropped");
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!(client = %client_id, "Disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        match connack.take() {
                            Some(tx) => {
                                let _ = tx.send(Err(e.to_string()));
                            }
                            None => {
                                error!(client = %client_id, error = %e, "MQTT connection lost");
                            }
                        }
                        break;
                    }
                }
            }
        }
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_factory_requires_root_ca() {
        let settings = BrokerSettings {
            root_ca: "/nonexistent/AmazonRootCA1.pem".into(),
            ..BrokerSettings::default()
        };
        assert!(matches!(
            MqttFactory::new(settings),
            Err(ConnectError::MissingArtifact { .. })
        ));
    }

    #[test]
    fn test_plain_factory_needs_no_credentials() {
        let settings = BrokerSettings {
            use_tls: false,
            ..BrokerSettings::default()
        };
        let factory = MqttFactory::new(settings).unwrap();
        assert!(!factory.requires_credentials());
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_to_connect() {
        let settings = BrokerSettings {
            use_tls: false,
            endpoint: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_secs: 2,
            ..BrokerSettings::default()
        };
        let factory = MqttFactory::new(settings).unwrap();
        assert!(factory.connect("device_0", None).await.is_err());
    }
}
