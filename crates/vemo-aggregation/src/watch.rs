//! Watch mode: aggregate telemetry as it arrives.

use crate::publish::SummaryPublisher;
use crate::streaming::StreamingAggregator;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vemo_core::{json_kind, TelemetryRecord};
use vemo_publisher::InboundMessage;

/// Counters of a watch session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub messages: u64,
    pub invalid: u64,
    pub summaries: u64,
    pub published: u64,
}

/// Aggregate inbound telemetry until cancelled or the stream ends.
///
/// Each message may hold one record or an array of records. Messages that
/// are not JSON records and array entries that are not objects count as
/// invalid. Every updated summary is published when a publisher is given.
pub async fn watch(
    mut inbound: mpsc::Receiver<InboundMessage>,
    publisher: Option<SummaryPublisher>,
    shutdown: CancellationToken,
) -> (StreamingAggregator, WatchStats) {
    let mut aggregator = StreamingAggregator::new();
    let mut stats = WatchStats::default();

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Watch cancelled");
                break;
            }
            message = inbound.recv() => match message {
                Some(message) => message,
                None => {
                    info!("Inbound stream closed");
                    break;
                }
            },
        };
        stats.messages += 1;

        let Some((records, rejected)) = decode(&message) else {
            stats.invalid += 1;
            warn!(channel = %message.channel, "Ignoring message that is not a JSON record");
            continue;
        };
        stats.invalid += rejected;

        for record in &records {
            let Some(summary) = aggregator.observe(record) else {
                continue;
            };
            stats.summaries += 1;
            debug!(
                vehicle = %summary.vehicle_id,
                max_co2 = summary.max_co2,
                records = summary.records_processed,
                "Summary updated"
            );
            if let Some(publisher) = &publisher {
                if publisher.publish(&summary).await {
                    stats.published += 1;
                }
            }
        }
    }

    (aggregator, stats)
}

/// Records of a message and the number of array entries that were not objects
fn decode(message: &InboundMessage) -> Option<(Vec<TelemetryRecord>, u64)> {
    match serde_json::from_slice::<Value>(&message.payload).ok()? {
        Value::Object(map) => Some((vec![TelemetryRecord::from_json_map(&map)], 0)),
        Value::Array(values) => {
            let mut records = Vec::with_capacity(values.len());
            let mut rejected = 0;
            for value in &values {
                match TelemetryRecord::from_json_value(value) {
                    Some(record) => records.push(record),
                    None => {
                        rejected += 1;
                        warn!(
                            channel = %message.channel,
                            kind = json_kind(value),
                            "Skipping invalid record: not an object"
                        );
                    }
                }
            }
            Some((records, rejected))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vemo_publisher::{MemoryBroker, TransportFactory};

    #[tokio::test]
    async fn test_watch_republishes_running_summaries() {
        let broker = MemoryBroker::new();
        let link = broker.connect("emission-aggregator", None).await.unwrap();
        link.transport.subscribe("vehicle/emission/data").await.unwrap();
        let publisher = SummaryPublisher::new(link.transport.clone());

        broker.inject("vehicle/emission/data", r#"{"vehicle_id":"veh0","vehicle_CO2":4.0}"#);
        broker.inject("vehicle/emission/data", "garbage");
        broker.inject("vehicle/emission/data", r#"{"vehicle_id":"veh0","vehicle_CO2":9.0}"#);
        broker.inject("elsewhere", r#"{"vehicle_id":"veh0","vehicle_CO2":99.0}"#);

        let shutdown = CancellationToken::new();
        let session = tokio::spawn(watch(link.inbound, Some(publisher), shutdown.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        shutdown.cancel();
        let (aggregator, stats) = session.await.unwrap();

        assert_eq!(stats.messages, 3);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.summaries, 2);
        assert_eq!(stats.published, 2);
        assert_eq!(aggregator.summary("veh0", 0).unwrap().max_co2, 9.0);

        let results = broker.messages_on("vehicles/veh0/emission/results");
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].json().unwrap()["records_processed"], 2);
    }

    #[tokio::test]
    async fn test_non_object_array_entries_are_invalid() {
        let broker = MemoryBroker::new();
        let link = broker.connect("emission-aggregator", None).await.unwrap();
        link.transport.subscribe("vehicle/emission/data").await.unwrap();

        broker.inject(
            "vehicle/emission/data",
            r#"[{"vehicle_id":"veh1","vehicle_CO2":3.0}, 17, "veh1", {"vehicle_id":"veh1","vehicle_CO2":8.0}]"#,
        );

        let shutdown = CancellationToken::new();
        let session = tokio::spawn(watch(link.inbound, None, shutdown.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        shutdown.cancel();
        let (aggregator, stats) = session.await.unwrap();

        assert_eq!(stats.messages, 1);
        assert_eq!(stats.invalid, 2);
        assert_eq!(stats.summaries, 2);
        assert_eq!(aggregator.summary("veh1", 0).unwrap().records_processed, 2);
    }
}
