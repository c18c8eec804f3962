//! vemo Aggregate CLI
//!
//! ## Usage
//!
//! ```bash
//! # Summarize every vehicle*.csv in the data directory
//! vemo-aggregate batch --data-dir iot_resources/data
//!
//! # Summarize one JSON event from a file (or stdin when --file is omitted)
//! vemo-aggregate event --file event.json
//!
//! # Publish running summaries for live telemetry until Ctrl-C
//! vemo-aggregate watch --channel 'vehicle/emission/data'
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vemo_aggregation::{
    discover_datasets, run_batch, troubleshooting, watch, Aggregator, EventHandler,
    SummaryPublisher,
};
use vemo_core::{init_logging, DeviceId, VemoConfig};
use vemo_publisher::{
    DeviceCredentials, Link, MemoryBroker, MqttFactory, TransportFactory,
};

#[derive(Parser)]
#[command(name = "vemo-aggregate")]
#[command(author, version, about = "Aggregate vehicle emission telemetry")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "vemo.yml", global = true)]
    config: PathBuf,

    /// Directory holding the vehicle datasets
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Publish summaries to the broker
    #[arg(long, global = true)]
    publish: bool,

    /// Use an in-process broker instead of the configured one
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate every dataset in the data directory
    Batch,

    /// Aggregate one JSON event
    Event {
        /// Read the event from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Subscribe to telemetry and publish running summaries
    Watch {
        /// Channel filter to subscribe to
        #[arg(long)]
        channel: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = VemoConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(data_dir) = cli.data_dir {
        config.aggregator.data_dir = data_dir;
    }
    if cli.publish {
        config.aggregator.publish = true;
    }

    init_logging(&config.logging);

    let aggregator = Aggregator::new(config.aggregator.data_dir.clone());

    match cli.command {
        Commands::Batch => {
            println!("\nVehicle Emission Processor");
            println!("Data directory: {}", aggregator.data_dir().display());

            let prefix = &config.aggregator.file_prefix;
            let files = match discover_datasets(aggregator.data_dir(), prefix) {
                Ok(files) => files,
                Err(e) => {
                    println!("\nERROR: {}", e);
                    println!("\n{}", troubleshooting(aggregator.data_dir(), prefix));
                    std::process::exit(1);
                }
            };

            println!("\nFound {} vehicle files:", files.len());
            for file in &files {
                println!("- {}", file.display());
            }

            let publisher = if config.aggregator.publish {
                Some(SummaryPublisher::new(connect(&config, cli.dry_run).await?.transport))
            } else {
                None
            };

            for report in run_batch(&aggregator, &files, publisher.as_ref()).await {
                println!("\nProcessing {}...", report.device);
                match &report.summary {
                    Some(summary) => {
                        println!("Results:");
                        println!("- Vehicle ID: {}", summary.vehicle_id);
                        println!("- Max CO2: {} {}", summary.max_co2, summary.unit);
                        println!("- Records processed: {}", summary.records_processed);
                        if report.published == Some(true) {
                            println!("Published to {}", summary.results_channel());
                        }
                    }
                    None => println!("Failed to process {}", report.device),
                }
            }
        }

        Commands::Event { file } => {
            let raw = match &file {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut raw = String::new();
                    std::io::stdin()
                        .read_to_string(&mut raw)
                        .context("Failed to read event from stdin")?;
                    raw
                }
            };
            let event: serde_json::Value =
                serde_json::from_str(&raw).context("Event is not valid JSON")?;

            let mut handler = EventHandler::new(aggregator);
            if config.aggregator.publish {
                let link = connect(&config, cli.dry_run).await?;
                handler = handler.with_publisher(SummaryPublisher::new(link.transport));
            }

            match handler.handle_event(event).await {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => {
                    eprintln!("No valid CO2 measurements found");
                    std::process::exit(1);
                }
            }
        }

        Commands::Watch { channel } => {
            let channel = channel.unwrap_or_else(|| config.aggregator.watch_channel.clone());
            let link = connect(&config, cli.dry_run).await?;
            link.transport
                .subscribe(&channel)
                .await
                .with_context(|| format!("Failed to subscribe to {}", channel))?;
            info!(channel = %channel, "Watching telemetry, press Ctrl-C to stop");

            let publisher = config
                .aggregator
                .publish
                .then(|| SummaryPublisher::new(link.transport.clone()));

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal.cancel();
                }
            });

            let (aggregator, stats) = watch(link.inbound, publisher, shutdown).await;
            if let Err(e) = link.transport.disconnect().await {
                warn!(error = %e, "Disconnect failed");
            }

            println!(
                "{} messages, {} invalid, {} summaries, {} published",
                stats.messages, stats.invalid, stats.summaries, stats.published
            );
            for summary in aggregator.summaries(chrono::Utc::now().timestamp()) {
                println!("{}", serde_json::to_string(&summary)?);
            }
        }
    }

    Ok(())
}

/// Open the aggregator's own broker session.
///
/// With TLS the aggregator presents the credentials provisioned under its
/// client id, e.g. `certificates/emission-aggregator.pem`.
async fn connect(config: &VemoConfig, dry_run: bool) -> Result<Link> {
    let client_id = config.aggregator.client_id.as_str();
    if dry_run {
        return Ok(MemoryBroker::new().with_echo().connect(client_id, None).await?);
    }

    let factory = MqttFactory::new(config.broker.clone())
        .context("Failed to prepare the MQTT connection")?;
    let credentials = if factory.requires_credentials() {
        let layout = config.resources.layout();
        Some(DeviceCredentials::load(&layout, &DeviceId::new(client_id))?)
    } else {
        None
    };
    let link = factory
        .connect(client_id, credentials.as_ref())
        .await
        .with_context(|| format!("Failed to connect to {}", config.broker.endpoint))?;
    Ok(link)
}
