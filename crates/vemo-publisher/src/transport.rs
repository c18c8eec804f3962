//! Transport seam between connections and a message broker.

use crate::error::{ConnectError, TransportError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use vemo_core::{ArtifactLayout, DeviceId};

/// Capacity of the per-client inbound message buffer
pub const INBOUND_BUFFER: usize = 256;

/// A message delivered to a subscribed client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Certificate and private key presented by a device client
#[derive(Clone)]
pub struct DeviceCredentials {
    pub certificate_pem: Vec<u8>,
    pub private_key_pem: Vec<u8>,
}

impl DeviceCredentials {
    /// Read a device's certificate and private key from the artifact layout
    pub fn load(layout: &ArtifactLayout, device: &DeviceId) -> Result<Self, ConnectError> {
        Ok(Self {
            certificate_pem: read_artifact(device, &layout.certificate_path(device))?,
            private_key_pem: read_artifact(device, &layout.private_key_path(device))?,
        })
    }
}

impl std::fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("certificate_pem", &format_args!("{} bytes", self.certificate_pem.len()))
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

pub(crate) fn read_artifact(device: &DeviceId, path: &Path) -> Result<Vec<u8>, ConnectError> {
    if !path.exists() {
        return Err(ConnectError::MissingArtifact {
            device: device.clone(),
            path: path.to_path_buf(),
        });
    }
    std::fs::read(path).map_err(|source| ConnectError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// An open client session with a broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Client identifier presented to the broker
    fn client_id(&self) -> &str;

    /// Hand one payload to the broker on `channel`
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe to a channel filter; matching messages arrive on the link's inbound receiver
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Gracefully close the session
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// A connected transport plus the stream of messages delivered to it
pub struct Link {
    pub transport: Arc<dyn Transport>,
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Opens client sessions
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Whether device certificates must be presented to connect
    fn requires_credentials(&self) -> bool {
        true
    }

    async fn connect(
        &self,
        client_id: &str,
        credentials: Option<&DeviceCredentials>,
    ) -> Result<Link, ConnectError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_reports_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        layout.create_dirs().unwrap();
        let device = DeviceId::from_index(4);
        std::fs::write(layout.certificate_path(&device), "cert").unwrap();

        match DeviceCredentials::load(&layout, &device) {
            Err(ConnectError::MissingArtifact { device: d, path }) => {
                assert_eq!(d, device);
                assert_eq!(path, layout.private_key_path(&device));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_reads_both_files() {
        let dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        layout.create_dirs().unwrap();
        let device = DeviceId::from_index(0);
        std::fs::write(layout.certificate_path(&device), "cert").unwrap();
        std::fs::write(layout.private_key_path(&device), "key").unwrap();

        let creds = DeviceCredentials::load(&layout, &device).unwrap();
        assert_eq!(creds.certificate_pem, b"cert");
        assert_eq!(creds.private_key_pem, b"key");
        assert!(format!("{:?}", creds).contains("redacted"));
    }
}
