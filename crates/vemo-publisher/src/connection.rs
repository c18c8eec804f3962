//! Device connections.
//!
//! A [`Connection`] pairs a transport session with a bounded outbound queue.
//! Publishing only enqueues; one drain task per connection forwards queued
//! messages to the transport in FIFO order and logs acknowledgement failures.
//! Nothing is retried.

use crate::error::{ConnectError, PublishError, Result, TransportError};
use crate::queue::{OutboundMessage, OutboundQueue, PushOutcome};
use crate::transport::{DeviceCredentials, InboundMessage, Transport, TransportFactory};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vemo_core::{load_dataset, BrokerSettings, DeviceId, FieldValue, OverflowPolicy, TelemetryRecord};

/// How a message was handed to the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the outbound queue
    Queued,
    /// The queue stayed full for the whole operation timeout
    TimedOut,
}

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub operation_timeout: Duration,
    pub drain_interval: Duration,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&BrokerSettings::default())
    }
}

impl From<&BrokerSettings> for ConnectionSettings {
    fn from(broker: &BrokerSettings) -> Self {
        Self {
            operation_timeout: broker.operation_timeout(),
            drain_interval: broker.drain_interval(),
            queue_capacity: broker.queue_capacity,
            overflow: broker.overflow,
        }
    }
}

/// Message counters of one connection
#[derive(Debug, Default)]
pub struct PublishStats {
    queued: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`PublishStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub queued: u64,
    pub sent: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl PublishStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Open a connection for `device`.
///
/// Credentials are required when the factory demands them; missing ones are
/// reported as [`ConnectError::MissingArtifact`] by the caller's loader.
pub async fn connect(
    device: &DeviceId,
    credentials: Option<&DeviceCredentials>,
    settings: &ConnectionSettings,
    factory: &dyn TransportFactory,
) -> std::result::Result<Connection, ConnectError> {
    let link = factory.connect(device.as_str(), credentials).await?;
    info!(device = %device, "Connected");
    Ok(Connection::start(device.clone(), link.transport, link.inbound, settings.clone()))
}

/// A connected device with its outbound queue and drain task
pub struct Connection {
    device: DeviceId,
    transport: Arc<dyn Transport>,
    queue: Arc<OutboundQueue>,
    stats: Arc<PublishStats>,
    settings: ConnectionSettings,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    fn start(
        device: DeviceId,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<InboundMessage>,
        settings: ConnectionSettings,
    ) -> Self {
        let queue = Arc::new(OutboundQueue::new(settings.queue_capacity, settings.overflow));
        let stats = Arc::new(PublishStats::default());

        let drain = tokio::spawn(drain_queue(
            device.clone(),
            Arc::clone(&queue),
            Arc::clone(&transport),
            Arc::clone(&stats),
            settings.drain_interval,
            settings.operation_timeout,
        ));
        tokio::spawn(log_inbound(device.clone(), inbound));

        Self {
            device,
            transport,
            queue,
            stats,
            settings,
            drain: Mutex::new(Some(drain)),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Messages waiting in the outbound queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Subscribe to a channel; incoming messages are logged
    pub async fn subscribe(&self, filter: &str) -> std::result::Result<(), TransportError> {
        self.transport.subscribe(filter).await?;
        info!(device = %self.device, channel = filter, "Subscribed");
        Ok(())
    }

    /// Queue one record for publishing on `channel`
    pub async fn publish_one(&self, channel: &str, message: &TelemetryRecord) -> Result<Delivery> {
        let payload = message
            .to_json()
            .map_err(|e| PublishError::Serialization(e.to_string()))?;
        self.enqueue(channel, payload.into_bytes()).await
    }

    /// Queue a single key/value message; the value is sent verbatim as text
    pub async fn publish_custom(&self, channel: &str, key: &str, value: &str) -> Result<Delivery> {
        let message = TelemetryRecord::new().field(key, FieldValue::Text(value.to_string()));
        let delivery = self.publish_one(channel, &message).await?;
        info!(device = %self.device, channel, key, value, "Custom message queued");
        Ok(delivery)
    }

    /// Publish every row of a dataset in file order, pausing `pace` between rows.
    ///
    /// Returns the number of rows accepted by the queue. Rows refused by the
    /// overflow policy are logged and skipped.
    pub async fn publish_dataset(
        &self,
        dataset: &Path,
        channel: &str,
        pace: Duration,
    ) -> Result<usize> {
        let records = load_dataset(dataset)?;
        let total = records.len();
        let mut published = 0usize;

        for (row, record) in records.iter().enumerate() {
            if row > 0 && !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
            match self.publish_one(channel, record).await {
                Ok(Delivery::Queued) => {
                    published += 1;
                    debug!(device = %self.device, channel, row, "Row queued");
                }
                Ok(Delivery::TimedOut) => {
                    warn!(device = %self.device, row, "Row not queued within the operation timeout");
                }
                Err(PublishError::QueueFull { capacity }) => {
                    warn!(device = %self.device, row, capacity, "Outbound queue full, row rejected");
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            device = %self.device,
            dataset = %dataset.display(),
            published,
            total,
            "Dataset published"
        );
        Ok(published)
    }

    async fn enqueue(&self, channel: &str, payload: Vec<u8>) -> Result<Delivery> {
        let message = OutboundMessage {
            channel: channel.to_string(),
            payload,
        };

        let outcome = match self
            .queue
            .push(message, self.settings.operation_timeout)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, PublishError::QueueFull { .. }) {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                return Err(e);
            }
        };

        match outcome {
            PushOutcome::Queued => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                Ok(Delivery::Queued)
            }
            PushOutcome::Evicted(old) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    device = %self.device,
                    channel = %old.channel,
                    "Outbound queue full, oldest message dropped"
                );
                Ok(Delivery::Queued)
            }
            PushOutcome::TimedOut => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(Delivery::TimedOut)
            }
        }
    }

    /// Flush the queue and close the transport session.
    ///
    /// Waits at most the operation timeout for queued messages to drain;
    /// anything left after that is discarded.
    pub async fn disconnect(&self) -> std::result::Result<(), TransportError> {
        self.queue.close();

        let handle = self.drain.lock().take();
        if let Some(mut handle) = handle {
            let wait = self.settings.operation_timeout
                + self.settings.drain_interval * self.queue.len() as u32;
            if tokio::time::timeout(wait, &mut handle).await.is_err() {
                handle.abort();
                let discarded = self.queue.clear() as u64;
                self.stats.dropped.fetch_add(discarded, Ordering::Relaxed);
                warn!(device = %self.device, discarded, "Queue not drained before disconnect");
            }
        }

        self.transport.disconnect().await?;
        let stats = self.stats();
        info!(
            device = %self.device,
            sent = stats.sent,
            failed = stats.failed,
            dropped = stats.dropped,
            "Disconnected"
        );
        Ok(())
    }
}

async fn drain_queue(
    device: DeviceId,
    queue: Arc<OutboundQueue>,
    transport: Arc<dyn Transport>,
    stats: Arc<PublishStats>,
    interval: Duration,
    timeout: Duration,
) {
    while let Some(message) = queue.pop().await {
        let result = tokio::time::timeout(
            timeout,
            transport.publish(&message.channel, message.payload),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout(timeout)));

        match result {
            Ok(()) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                debug!(device = %device, channel = %message.channel, "Message handed to broker");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(device = %device, channel = %message.channel, error = %e, "Publish failed");
            }
        }

        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    debug!(device = %device, "Drain task finished");
}

async fn log_inbound(device: DeviceId, mut inbound: mpsc::Receiver<InboundMessage>) {
    while let Some(message) = inbound.recv().await {
        info!(
            "[Device {}] Received message {} on topic {}",
            device,
            message.payload_str(),
            message.channel
        );
    }
}
