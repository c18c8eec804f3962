//! Error types for publishing

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use vemo_core::{CoreError, DeviceId};

/// Errors raised by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Client error: {0}")]
    Client(String),

    #[error("Transport closed")]
    Closed,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised while opening a device connection
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("{device}: missing artifact {}", .path.display())]
    MissingArtifact { device: DeviceId, path: PathBuf },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{client_id}: no connection acknowledgement within {after:?}")]
    Timeout { client_id: String, after: Duration },

    #[error("{client_id}: connection refused: {reason}")]
    Refused { client_id: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised while handing a message to a connection
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Outbound queue full ({capacity} messages)")]
    QueueFull { capacity: usize },

    #[error("Connection closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Dataset error: {0}")]
    Dataset(#[from] CoreError),
}

/// Errors raised while reading operator commands
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Line {line}: {reason}")]
    Invalid { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for publish operations
pub type Result<T> = std::result::Result<T, PublishError>;
