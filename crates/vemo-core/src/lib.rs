//! vemo Core - Shared types for the vehicle emission simulator
//!
//! This crate provides the building blocks used by the provisioner, the
//! publisher and the aggregator:
//! - `DeviceId`: Deterministic device identity derived from a numeric index
//! - `FieldValue`: Numeric or text cell value with idempotent coercion
//! - `TelemetryRecord`: One ordered dataset row, serialized as a flat JSON object
//! - `ArtifactLayout`: On-disk locations of credential artifacts and datasets
//! - `VemoConfig`: YAML configuration shared by all binaries

pub mod config;
pub mod dataset;
pub mod error;
pub mod layout;
pub mod logging;
pub mod types;

pub use config::{
    AggregatorSettings, BrokerSettings, LoggingSettings, OverflowPolicy, PublisherSettings,
    RegistrySettings, ResourceSettings, VemoConfig,
};
pub use dataset::{load_dataset, parse_dataset};
pub use error::{CoreError, Result};
pub use layout::ArtifactLayout;
pub use logging::init_logging;
pub use types::*;
