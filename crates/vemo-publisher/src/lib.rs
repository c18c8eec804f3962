//! vemo Publisher - Device telemetry publishing
//!
//! Connects provisioned devices to a broker and replays their datasets as
//! flat JSON messages. Key pieces:
//! - `Transport` / `TransportFactory`: broker seam with MQTT and in-memory implementations
//! - `Connection`: bounded outbound queue plus a FIFO drain task per device
//! - `Dispatcher`: applies operator `Command`s from a `CommandSource`
//!
//! ## Usage
//!
//! ```no_run
//! use vemo_core::{ArtifactLayout, PublisherSettings};
//! use vemo_publisher::{connect_fleet, ConnectionSettings, Dispatcher, MemoryBroker, ScriptSource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let layout = ArtifactLayout::new("iot_resources");
//!     let broker = MemoryBroker::new();
//!     let fleet = connect_fleet(0..5, &layout, &ConnectionSettings::default(), &[], &broker).await;
//!
//!     let mut dispatcher = Dispatcher::new(fleet.connections, layout, &PublisherSettings::default());
//!     let mut script = ScriptSource::parse("s\nd\n")?;
//!     dispatcher.run(&mut script).await;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod fleet;
pub mod memory;
pub mod mqtt;
pub mod queue;
pub mod topic;
pub mod transport;

pub use command::{Command, CommandSource, ConsoleSource, ScriptSource};
pub use connection::{connect, Connection, ConnectionSettings, Delivery, PublishStats, StatsSnapshot};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{CommandError, ConnectError, PublishError, Result, TransportError};
pub use fleet::{connect_fleet, Fleet, SkippedDevice};
pub use memory::{MemoryBroker, MemoryTransport, PublishedMessage};
pub use mqtt::{MqttFactory, MqttTransport};
pub use queue::{OutboundMessage, OutboundQueue, PushOutcome};
pub use topic::topic_matches;
pub use transport::{DeviceCredentials, InboundMessage, Link, Transport, TransportFactory};
