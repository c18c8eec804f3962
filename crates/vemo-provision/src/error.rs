//! Error types for provisioning

use crate::registry::Operation;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a device registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Credential generation failed: {0}")]
    Credential(String),

    #[error("Registry state error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, RegistryError::AlreadyExists(_))
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::State(e.to_string())
    }
}

/// Provisioning errors
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Registry call {operation} failed: {source}")]
    Registry {
        operation: Operation,
        #[source]
        source: RegistryError,
    },

    #[error("Failed to persist credentials to {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub fn registry(operation: Operation, source: RegistryError) -> Self {
        ProvisionError::Registry { operation, source }
    }
}

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
