//! Batch mode: aggregate every dataset in a directory.

use crate::aggregate::{Aggregator, Source};
use crate::error::{AggregationError, Result};
use crate::publish::SummaryPublisher;
use crate::summary::EmissionSummary;
use std::path::{Path, PathBuf};
use tracing::info;

/// Find `<prefix>*.csv` files in `dir`, sorted by file name
pub fn discover_datasets(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(AggregationError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_file() && name.starts_with(prefix) && name.ends_with(".csv") {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(AggregationError::NoDatasets {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
        });
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Outcome for one dataset file
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// File stem, used as the device id
    pub device: String,
    pub path: PathBuf,
    pub summary: Option<EmissionSummary>,
    /// Whether the summary was published; `None` when publishing is off
    pub published: Option<bool>,
}

/// Aggregate each file in order and publish results when a publisher is given
pub async fn run_batch(
    aggregator: &Aggregator,
    files: &[PathBuf],
    publisher: Option<&SummaryPublisher>,
) -> Vec<BatchReport> {
    let mut reports = Vec::with_capacity(files.len());

    for path in files {
        let device = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(device = %device, "Processing dataset");

        let summary = aggregator.aggregate(Source::Device(device.clone()));
        let published = match (&summary, publisher) {
            (Some(summary), Some(publisher)) => Some(publisher.publish(summary).await),
            _ => None,
        };

        reports.push(BatchReport {
            device,
            path: path.clone(),
            summary,
            published,
        });
    }
    reports
}

/// Remediation steps printed when batch mode cannot start
pub fn troubleshooting(dir: &Path, prefix: &str) -> String {
    format!(
        "Troubleshooting steps:\n\
         1. Verify the folder exists: {}\n\
         2. Ensure it contains vehicle CSV files ({p}0.csv, {p}1.csv, etc.)\n\
         3. Check file permissions\n\
         4. Confirm CSV files have 'vehicle_CO2' and 'vehicle_id' columns",
        dir.display(),
        p = prefix
    )
}
