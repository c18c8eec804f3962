//! vemo Publish CLI
//!
//! Connects provisioned devices and drives them from operator commands.
//!
//! ## Usage
//!
//! ```bash
//! # Interactive session for devices 0..5
//! vemo-publish
//!
//! # Replay datasets of devices 2..4 from a script, without a broker
//! vemo-publish --start 2 --end 4 --script replay.txt --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use vemo_core::{init_logging, OverflowPolicy, VemoConfig};
use vemo_publisher::{
    connect_fleet, CommandSource, ConnectionSettings, ConsoleSource, Dispatcher, MemoryBroker,
    MqttFactory, Outcome, ScriptSource, TransportFactory,
};

#[derive(Parser)]
#[command(name = "vemo-publish")]
#[command(author, version, about = "Publish simulated vehicle telemetry")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "vemo.yml")]
    config: PathBuf,

    /// First device index
    #[arg(short, long)]
    start: Option<u32>,

    /// Device index to stop before
    #[arg(short, long)]
    end: Option<u32>,

    /// Broker endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Connect without TLS
    #[arg(long)]
    no_tls: bool,

    /// Delay between dataset rows in milliseconds
    #[arg(long)]
    pace_ms: Option<u64>,

    /// Delay after each command in milliseconds
    #[arg(long)]
    pause_ms: Option<u64>,

    /// Outbound queue overflow policy (block, drop-oldest, reject)
    #[arg(long)]
    overflow: Option<OverflowPolicy>,

    /// Read commands from a file instead of the console
    #[arg(long)]
    script: Option<PathBuf>,

    /// Publish to an in-process broker that logs every message
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = VemoConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    if let Some(start) = cli.start {
        config.publisher.device_start = start;
    }
    if let Some(end) = cli.end {
        config.publisher.device_end = end;
    }
    if let Some(endpoint) = cli.endpoint {
        config.broker.endpoint = endpoint;
    }
    if let Some(port) = cli.port {
        config.broker.port = port;
    }
    if cli.no_tls {
        config.broker.use_tls = false;
    }
    if let Some(pace_ms) = cli.pace_ms {
        config.publisher.pace_ms = pace_ms;
    }
    if let Some(pause_ms) = cli.pause_ms {
        config.publisher.command_pause_ms = pause_ms;
    }
    if let Some(overflow) = cli.overflow {
        config.broker.overflow = overflow;
    }

    init_logging(&config.logging);

    let factory: Arc<dyn TransportFactory> = if cli.dry_run {
        info!("Dry run: messages go to an in-process broker");
        Arc::new(MemoryBroker::new().with_echo())
    } else {
        Arc::new(
            MqttFactory::new(config.broker.clone())
                .context("Failed to prepare the MQTT connection")?,
        )
    };

    let layout = config.resources.layout();
    let settings = ConnectionSettings::from(&config.broker);
    let fleet = connect_fleet(
        config.publisher.device_start..config.publisher.device_end,
        &layout,
        &settings,
        &config.publisher.subscriptions,
        factory.as_ref(),
    )
    .await;

    for skipped in &fleet.skipped {
        println!("{} skipped: {}", skipped.device, skipped.reason);
    }
    if fleet.connections.is_empty() {
        anyhow::bail!("No device could be connected");
    }

    let mut source: Box<dyn CommandSource> = match &cli.script {
        Some(path) => Box::new(
            ScriptSource::from_file(path)
                .with_context(|| format!("Failed to read script {}", path.display()))?,
        ),
        None => Box::new(ConsoleSource::stdin(config.publisher.default_channel.clone())),
    };

    let mut dispatcher = Dispatcher::new(fleet.connections, layout, &config.publisher);
    let outcome = dispatcher.run(source.as_mut()).await;

    for connection in dispatcher.connections() {
        let stats = connection.stats();
        println!(
            "{}: queued {}, sent {}, dropped {}, failed {}",
            connection.device(),
            stats.queued,
            stats.sent,
            stats.dropped,
            stats.failed
        );
    }
    if outcome == Outcome::Disconnected {
        println!("All devices disconnected.");
    }
    Ok(())
}
