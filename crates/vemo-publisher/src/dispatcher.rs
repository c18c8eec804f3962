//! Operator command dispatcher.

use crate::command::{Command, CommandSource};
use crate::connection::Connection;
use crate::error::PublishError;
use std::time::Duration;
use tracing::{error, info, warn};
use vemo_core::{ArtifactLayout, CoreError, PublisherSettings};

/// How a dispatcher run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every connection was disconnected
    Disconnected,
    /// Stopped without disconnect cleanup
    Exited,
}

/// Applies operator commands to a set of connected devices
pub struct Dispatcher {
    connections: Vec<Connection>,
    layout: ArtifactLayout,
    dataset_channel: String,
    default_channel: String,
    pace: Duration,
    pause: Duration,
}

impl Dispatcher {
    pub fn new(connections: Vec<Connection>, layout: ArtifactLayout, settings: &PublisherSettings) -> Self {
        Self {
            connections,
            layout,
            dataset_channel: settings.dataset_channel.clone(),
            default_channel: settings.default_channel.clone(),
            pace: settings.pace(),
            pause: settings.command_pause(),
        }
    }

    /// Delay between dataset rows
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Delay after each replay or publish command
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Run commands until disconnect, exit or the end of the source
    pub async fn run(&mut self, source: &mut dyn CommandSource) -> Outcome {
        while let Some(command) = source.next_command().await {
            match command {
                Command::Replay => self.replay().await,
                Command::Publish {
                    channel,
                    key,
                    value,
                } => {
                    let channel = channel.unwrap_or_else(|| self.default_channel.clone());
                    self.publish(&channel, &key, &value).await;
                }
                Command::Disconnect => {
                    self.disconnect_all().await;
                    return Outcome::Disconnected;
                }
                Command::Exit => {
                    info!("Exiting");
                    return Outcome::Exited;
                }
            }

            if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        info!("Command source exhausted");
        Outcome::Exited
    }

    async fn replay(&self) {
        for connection in &self.connections {
            let device = connection.device();
            let Some(index) = device.index() else {
                warn!(device = %device, "Device has no numeric index, no dataset to replay");
                continue;
            };
            let dataset = self.layout.dataset_path(index);

            match connection
                .publish_dataset(&dataset, &self.dataset_channel, self.pace)
                .await
            {
                Ok(count) => println!("{}: published {} messages", device, count),
                Err(PublishError::Dataset(CoreError::DatasetNotFound(path))) => {
                    warn!(device = %device, path = %path.display(), "Dataset missing, device skipped");
                }
                Err(e) => error!(device = %device, error = %e, "Replay failed"),
            }
        }
    }

    async fn publish(&self, channel: &str, key: &str, value: &str) {
        for connection in &self.connections {
            if let Err(e) = connection.publish_custom(channel, key, value).await {
                error!(device = %connection.device(), error = %e, "Custom message not queued");
            }
        }
    }

    async fn disconnect_all(&self) {
        for connection in &self.connections {
            if let Err(e) = connection.disconnect().await {
                error!(device = %connection.device(), error = %e, "Disconnect failed");
            }
        }
        info!(devices = self.connections.len(), "All devices disconnected");
    }
}
