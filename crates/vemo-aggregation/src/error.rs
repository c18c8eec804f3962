//! Error types for aggregation

use std::path::PathBuf;
use thiserror::Error;
use vemo_publisher::TransportError;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("No {prefix}*.csv files found in {}", .dir.display())]
    NoDatasets { dir: PathBuf, prefix: String },

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<serde_json::Error> for AggregationError {
    fn from(e: serde_json::Error) -> Self {
        AggregationError::InvalidEvent(e.to_string())
    }
}

/// Result type for aggregation operations
pub type Result<T> = std::result::Result<T, AggregationError>;
