//! Connecting a range of provisioned devices.

use crate::connection::{connect, Connection, ConnectionSettings};
use crate::error::ConnectError;
use crate::transport::{DeviceCredentials, TransportFactory};
use std::ops::Range;
use tracing::{info, warn};
use vemo_core::{ArtifactLayout, DeviceId};

/// A device that could not be connected
#[derive(Debug)]
pub struct SkippedDevice {
    pub device: DeviceId,
    pub reason: ConnectError,
}

/// Connections opened for a range of device indices
#[derive(Default)]
pub struct Fleet {
    pub connections: Vec<Connection>,
    pub skipped: Vec<SkippedDevice>,
}

/// Connect every device in `indices`, skipping those that fail.
///
/// Devices are connected one after another. Each connection subscribes to
/// `subscriptions` once it is up; a failed subscription is logged only.
pub async fn connect_fleet(
    indices: Range<u32>,
    layout: &ArtifactLayout,
    settings: &ConnectionSettings,
    subscriptions: &[String],
    factory: &dyn TransportFactory,
) -> Fleet {
    let mut fleet = Fleet::default();

    for index in indices {
        let device = DeviceId::from_index(index);
        match connect_device(&device, layout, settings, factory).await {
            Ok(connection) => {
                for filter in subscriptions {
                    if let Err(e) = connection.subscribe(filter).await {
                        warn!(device = %device, channel = %filter, error = %e, "Subscribe failed");
                    }
                }
                fleet.connections.push(connection);
            }
            Err(reason) => {
                warn!(device = %device, reason = %reason, "Skipping device");
                fleet.skipped.push(SkippedDevice { device, reason });
            }
        }
    }

    info!(
        connected = fleet.connections.len(),
        skipped = fleet.skipped.len(),
        "Fleet connected"
    );
    fleet
}

async fn connect_device(
    device: &DeviceId,
    layout: &ArtifactLayout,
    settings: &ConnectionSettings,
    factory: &dyn TransportFactory,
) -> Result<Connection, ConnectError> {
    let credentials = if factory.requires_credentials() {
        Some(DeviceCredentials::load(layout, device)?)
    } else {
        None
    };
    connect(device, credentials.as_ref(), settings, factory).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::transport::Link;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Memory broker that insists on device certificates
    struct StrictBroker(MemoryBroker);

    #[async_trait]
    impl TransportFactory for StrictBroker {
        async fn connect(
            &self,
            client_id: &str,
            credentials: Option<&DeviceCredentials>,
        ) -> Result<Link, ConnectError> {
            assert!(credentials.is_some());
            self.0.connect(client_id, credentials).await
        }
    }

    #[tokio::test]
    async fn test_devices_without_credentials_are_skipped() {
        let dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        layout.create_dirs().unwrap();
        let provisioned = DeviceId::from_index(1);
        std::fs::write(layout.certificate_path(&provisioned), "cert").unwrap();
        std::fs::write(layout.private_key_path(&provisioned), "key").unwrap();

        let broker = StrictBroker(MemoryBroker::new());
        let fleet = connect_fleet(0..2, &layout, &ConnectionSettings::default(), &[], &broker).await;

        assert_eq!(fleet.connections.len(), 1);
        assert_eq!(fleet.connections[0].device(), &provisioned);
        assert!(matches!(
            fleet.skipped[0].reason,
            ConnectError::MissingArtifact { .. }
        ));
    }

    #[tokio::test]
    async fn test_refused_devices_are_skipped() {
        let dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        let broker = MemoryBroker::new();
        broker.refuse("device_1");

        let fleet = connect_fleet(
            0..3,
            &layout,
            &ConnectionSettings::default(),
            &["vehicles/+/data".to_string()],
            &broker,
        )
        .await;

        let connected: Vec<_> = fleet
            .connections
            .iter()
            .map(|c| c.device().as_str().to_string())
            .collect();
        assert_eq!(connected, vec!["device_0", "device_2"]);
        assert_eq!(fleet.skipped.len(), 1);
        assert_eq!(fleet.skipped[0].device.as_str(), "device_1");
    }
}
