//! vemo Provision CLI
//!
//! Registers a range of simulated vehicles and writes their credentials.
//!
//! ## Usage
//!
//! ```bash
//! # Provision devices 0..10 with settings from vemo.yml
//! vemo-provision
//!
//! # Provision 5 devices starting at index 20 into a custom group
//! vemo-provision --start 20 --devices 5 --group TestFleet
//!
//! # Write a default configuration file
//! vemo-provision --generate-config
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use vemo_core::{init_logging, VemoConfig};
use vemo_provision::{CredentialStore, GroupStatus, LocalRegistry, Provisioner};

#[derive(Parser)]
#[command(name = "vemo-provision")]
#[command(author, version, about = "Provision simulated vehicle devices and their credentials")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "vemo.yml")]
    config: PathBuf,

    /// Write a default configuration file to --config and exit
    #[arg(long)]
    generate_config: bool,

    /// Number of devices to provision
    #[arg(short, long)]
    devices: Option<u32>,

    /// First device index
    #[arg(short, long)]
    start: Option<u32>,

    /// Thing group name
    #[arg(short, long)]
    group: Option<String>,

    /// Policy attached to each certificate
    #[arg(short, long)]
    policy: Option<String>,

    /// Resource root directory
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// Local registry state file
    #[arg(long)]
    state_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        VemoConfig::write_default(&cli.config)
            .with_context(|| format!("Failed to write {}", cli.config.display()))?;
        println!("Generated default configuration: {}", cli.config.display());
        return Ok(());
    }

    let mut config = VemoConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    if let Some(devices) = cli.devices {
        config.registry.device_count = devices;
    }
    if let Some(start) = cli.start {
        config.registry.start_index = start;
    }
    if let Some(group) = cli.group {
        config.registry.group_name = group;
    }
    if let Some(policy) = cli.policy {
        config.registry.policy_name = policy;
    }
    if let Some(root_dir) = cli.root_dir {
        config.resources.root_dir = root_dir;
    }
    if let Some(state_file) = cli.state_file {
        config.registry.state_file = Some(state_file);
    }

    init_logging(&config.logging);

    let layout = config.resources.layout();
    layout
        .create_dirs()
        .with_context(|| format!("Failed to create {}", layout.root().display()))?;

    let state_file = config
        .registry
        .state_file
        .clone()
        .unwrap_or_else(|| layout.root().join("registry.json"));
    let registry = Arc::new(
        LocalRegistry::open(&state_file)
            .with_context(|| format!("Failed to open registry {}", state_file.display()))?,
    );
    info!("Registry state: {}", state_file.display());

    let provisioner = Provisioner::new(
        registry,
        CredentialStore::new(layout.clone()),
        config.registry.group_name.clone(),
        config.registry.policy_name.clone(),
    );

    match provisioner.ensure_group(&config.registry.group_name).await? {
        GroupStatus::Created => println!("Thing group '{}' created.", config.registry.group_name),
        GroupStatus::AlreadyExists => {
            println!("Thing group '{}' already exists.", config.registry.group_name)
        }
    }

    let start = config.registry.start_index;
    let end = start.saturating_add(config.registry.device_count);

    let progress = ProgressBar::new(u64::from(end - start));
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let summary = provisioner
        .provision_range_with(start..end, |report| {
            progress.set_message(report.device_id.to_string());
            progress.inc(1);
        })
        .await;
    progress.finish_and_clear();

    for report in &summary.reports {
        match (&report.bundle, &report.error) {
            (Some(bundle), None) => {
                println!(
                    "{} registered with certificate {}...",
                    report.device_id,
                    bundle.short_id()
                );
            }
            (_, Some(err)) => println!("{} failed: {}", report.device_id, err),
            (None, None) => {}
        }
        for warning in &report.warnings {
            println!("  warning: {}", warning);
        }
    }

    println!();
    println!(
        "{} of {} devices created and added to group '{}'",
        summary.succeeded(),
        summary.reports.len(),
        config.registry.group_name
    );
    println!("Certificate files are in: {}", layout.certificates_dir().display());
    println!("Key files are in: {}", layout.keys_dir().display());

    if summary.failed() > 0 {
        let failed: Vec<String> = summary.failures().map(|r| r.device_id.to_string()).collect();
        anyhow::bail!(
            "{} device(s) could not be provisioned: {}",
            failed.len(),
            failed.join(", ")
        );
    }
    Ok(())
}
