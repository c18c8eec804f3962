//! Configuration shared by the vemo binaries.
//!
//! Loaded from `vemo.yml` (or the path given with `--config`). Every section
//! falls back to its defaults, so a partial file is valid. Command line flags
//! override file values.

use crate::error::Result;
use crate::layout::ArtifactLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete configuration - can be loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VemoConfig {
    /// Where credentials and datasets live
    pub resources: ResourceSettings,
    /// Device registry settings (provisioner)
    pub registry: RegistrySettings,
    /// MQTT broker connection settings
    pub broker: BrokerSettings,
    /// Telemetry replay settings
    pub publisher: PublisherSettings,
    /// Emission aggregation settings
    pub aggregator: AggregatorSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

impl VemoConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VemoConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise use defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write a default configuration file
    pub fn write_default(path: impl AsRef<Path>) -> Result<()> {
        let config = VemoConfig::default();
        let yaml = serde_yaml::to_string(&config)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

/// Resource directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    /// Root of all generated resources
    pub root_dir: PathBuf,
    /// Certificate directory, relative to `root_dir`
    pub certificates_dir: PathBuf,
    /// Key directory, relative to `root_dir`
    pub keys_dir: PathBuf,
    /// Dataset directory, relative to `root_dir`
    pub data_dir: PathBuf,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("iot_resources"),
            certificates_dir: PathBuf::from("certificates"),
            keys_dir: PathBuf::from("keys"),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl ResourceSettings {
    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::with_dirs(
            &self.root_dir,
            &self.certificates_dir,
            &self.keys_dir,
            &self.data_dir,
        )
    }
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Group every provisioned device joins
    pub group_name: String,
    /// Policy attached to every issued certificate
    pub policy_name: String,
    /// First device index to provision
    pub start_index: u32,
    /// Number of devices to provision
    pub device_count: u32,
    /// Local registry state file (defaults to `<root_dir>/registry.json`)
    pub state_file: Option<PathBuf>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            group_name: "VehicleEmissionsGroup".to_string(),
            policy_name: "GGTest_Group_Core-policy".to_string(),
            start_index: 0,
            device_count: 10,
            state_file: None,
        }
    }
}

/// What a full outbound queue does with a new message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for room, up to the operation timeout
    Block,
    /// Evict the oldest queued message
    DropOldest,
    /// Refuse the new message
    Reject,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::Block => write!(f, "block"),
            OverflowPolicy::DropOldest => write!(f, "drop-oldest"),
            OverflowPolicy::Reject => write!(f, "reject"),
        }
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(OverflowPolicy::Block),
            "drop-oldest" | "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "reject" => Ok(OverflowPolicy::Reject),
            other => Err(format!("unknown overflow policy: {}", other)),
        }
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Broker host name (e.g. `<prefix>-ats.iot.<region>.amazonaws.com`)
    pub endpoint: String,
    /// Broker port
    pub port: u16,
    /// Connect over TLS with the device certificate
    pub use_tls: bool,
    /// Trust anchor PEM
    pub root_ca: PathBuf,
    /// MQTT keep-alive in seconds
    pub keep_alive_secs: u64,
    /// Connect/disconnect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Per-operation timeout in seconds
    pub operation_timeout_secs: u64,
    /// How often queued messages are drained to the broker, in milliseconds
    pub drain_interval_ms: u64,
    /// Outbound queue capacity per connection
    pub queue_capacity: usize,
    /// Behaviour of a full outbound queue
    pub overflow: OverflowPolicy,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            endpoint: "localhost".to_string(),
            port: 8883,
            use_tls: true,
            root_ca: PathBuf::from("AmazonRootCA1.pem"),
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            operation_timeout_secs: 5,
            drain_interval_ms: 500,
            queue_capacity: 1024,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl BrokerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

/// Telemetry publisher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    /// First device index (inclusive)
    pub device_start: u32,
    /// Last device index (exclusive)
    pub device_end: u32,
    /// Channel dataset rows are replayed onto
    pub dataset_channel: String,
    /// Channel used for operator messages when none is given
    pub default_channel: String,
    /// Delay between two dataset rows, in milliseconds
    pub pace_ms: u64,
    /// Pause after each operator command, in milliseconds
    pub command_pause_ms: u64,
    /// Channels each device subscribes to; received messages are logged
    pub subscriptions: Vec<String>,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            device_start: 0,
            device_end: 5,
            dataset_channel: "vehicle/emission/data".to_string(),
            default_channel: "vehicles/device7/data".to_string(),
            pace_ms: 1000,
            command_pause_ms: 3000,
            subscriptions: Vec::new(),
        }
    }
}

impl PublisherSettings {
    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }

    pub fn command_pause(&self) -> Duration {
        Duration::from_millis(self.command_pause_ms)
    }
}

/// Emission aggregator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSettings {
    /// Directory holding `<vehicle_id>.csv` datasets
    pub data_dir: PathBuf,
    /// File name prefix discovered by the batch entry point
    pub file_prefix: String,
    /// Publish summaries to the broker
    pub publish: bool,
    /// Client identifier used when publishing summaries
    pub client_id: String,
    /// Telemetry channel filter consumed in watch mode
    pub watch_channel: String,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("iot_resources/data"),
            file_prefix: "vehicle".to_string(),
            publish: false,
            client_id: "emission-aggregator".to_string(),
            watch_channel: "vehicle/emission/data".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Include target in logs
    pub show_target: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: false,
        }
    }
}
