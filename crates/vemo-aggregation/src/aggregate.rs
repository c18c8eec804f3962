//! Batch aggregation over the supported input shapes.

use crate::summary::{EmissionSummary, Reading, SummaryAccumulator};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use vemo_core::{json_kind, load_dataset, TelemetryRecord};

/// Input to [`Aggregator::aggregate`]
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Load `<data_dir>/<id>.csv`
    Device(String),
    /// One JSON object
    Record(Value),
    /// A list of JSON objects
    Records(Vec<Value>),
    /// A raw event: object, array of objects or device id string
    Value(Value),
}

impl From<Value> for Source {
    fn from(value: Value) -> Self {
        Source::Value(value)
    }
}

/// Aggregates telemetry into one [`EmissionSummary`]
#[derive(Debug, Clone)]
pub struct Aggregator {
    data_dir: PathBuf,
}

impl Aggregator {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Resolve a source into records.
    ///
    /// A missing dataset or an unsupported event shape yields an empty batch.
    pub fn load(&self, source: Source) -> Vec<TelemetryRecord> {
        match source {
            Source::Device(id) => self.load_device(&id),
            Source::Record(value) => records_from_values(std::slice::from_ref(&value)),
            Source::Records(values) => records_from_values(&values),
            Source::Value(Value::Object(map)) => vec![TelemetryRecord::from_json_map(&map)],
            Source::Value(Value::Array(values)) => records_from_values(&values),
            Source::Value(Value::String(id)) => self.load_device(&id),
            Source::Value(other) => {
                warn!(kind = json_kind(&other), "Unsupported event, treated as an empty batch");
                Vec::new()
            }
        }
    }

    /// Aggregate a source; `None` when no valid record was found
    pub fn aggregate(&self, source: Source) -> Option<EmissionSummary> {
        summarize(&self.load(source))
    }

    fn load_device(&self, id: &str) -> Vec<TelemetryRecord> {
        let path = self.data_dir.join(format!("{}.csv", id));
        match load_dataset(&path) {
            Ok(records) => {
                info!(records = records.len(), "Loaded {} records from {}.csv", records.len(), id);
                records
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Could not load dataset");
                Vec::new()
            }
        }
    }
}

fn records_from_values(values: &[Value]) -> Vec<TelemetryRecord> {
    values
        .iter()
        .filter_map(|value| {
            let record = TelemetryRecord::from_json_value(value);
            if record.is_none() {
                warn!(kind = json_kind(value), "Skipping invalid record: not an object");
            }
            record
        })
        .collect()
}

/// Fold records into an accumulator, skipping invalid ones with a warning
pub fn fold_records<'a>(records: impl IntoIterator<Item = &'a TelemetryRecord>) -> SummaryAccumulator {
    let mut acc = SummaryAccumulator::empty();
    for record in records {
        let outcome = Reading::from_record(record).and_then(|reading| acc.push(reading));
        if let Err(reason) = outcome {
            warn!(%reason, "Skipping record");
        }
    }
    acc
}

/// Summarize a batch at the current wall-clock second
pub fn summarize(records: &[TelemetryRecord]) -> Option<EmissionSummary> {
    if records.is_empty() {
        error!("No valid records found");
        return None;
    }

    let acc = fold_records(records);
    match acc.finish(chrono::Utc::now().timestamp()) {
        Some(summary) => {
            info!(
                vehicle = %summary.vehicle_id,
                max_co2 = summary.max_co2,
                records = summary.records_processed,
                "Processed emission data"
            );
            Some(summary)
        }
        None => {
            error!("No valid CO2 measurements found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_max_and_count() {
        let agg = Aggregator::new("unused");
        let summary = agg
            .aggregate(Source::Records(vec![
                json!({"vehicle_id": "v1", "vehicle_CO2": 12.5}),
                json!({"vehicle_id": "v1", "vehicle_CO2": ""}),
                json!({"vehicle_id": "v1", "vehicle_CO2": 30.0}),
            ]))
            .unwrap();

        assert_eq!(summary.vehicle_id, "v1");
        assert_eq!(summary.max_co2, 30.0);
        assert_eq!(summary.records_processed, 3);
        assert_eq!(summary.unit, "ppm");
    }

    #[test]
    fn test_first_identity_wins() {
        let agg = Aggregator::new("unused");
        let summary = agg
            .aggregate(Source::Records(vec![
                json!({"vehicle_id": "v1", "vehicle_CO2": 5}),
                json!({"vehicle_id": "v2", "vehicle_CO2": 99}),
            ]))
            .unwrap();

        assert_eq!(summary.vehicle_id, "v1");
        assert_eq!(summary.max_co2, 5.0);
        assert_eq!(summary.records_processed, 1);
    }

    #[test]
    fn test_no_co2_anywhere_is_none() {
        let agg = Aggregator::new("unused");
        assert!(agg
            .aggregate(Source::Records(vec![
                json!({"vehicle_id": "v1"}),
                json!({"vehicle_id": "v1", "speed": 3}),
            ]))
            .is_none());
    }

    #[test]
    fn test_empty_inputs_are_none() {
        let agg = Aggregator::new("unused");
        assert!(agg.aggregate(Source::Records(Vec::new())).is_none());
        assert!(agg.aggregate(Source::Value(json!(42))).is_none());
        assert!(agg.aggregate(Source::Value(Value::Null)).is_none());
        assert!(agg.aggregate(Source::Device("vehicle404".into())).is_none());
    }

    #[test]
    fn test_invalid_records_do_not_bind_identity() {
        let agg = Aggregator::new("unused");
        let summary = agg
            .aggregate(Source::Value(json!([
                "not a record",
                {"vehicle_id": "v9", "vehicle_CO2": "n/a"},
                {"vehicle_id": "v2", "vehicle_CO2": 7},
            ])))
            .unwrap();
        assert_eq!(summary.vehicle_id, "v2");
        assert_eq!(summary.records_processed, 1);
    }

    #[test]
    fn test_single_record_event() {
        let agg = Aggregator::new("unused");
        let summary = agg
            .aggregate(json!({"vehicle_id": "veh0", "vehicle_CO2": "41.5"}).into())
            .unwrap();
        assert_eq!(summary.max_co2, 41.5);
    }

    #[test]
    fn test_device_source_reads_dataset() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("vehicle3.csv"),
            "timestep_time,vehicle_CO2,vehicle_id\n0,12.5,veh3\n1,,veh3\n2,30.0,veh3\n",
        )
        .unwrap();

        let agg = Aggregator::new(dir.path());
        let by_device = agg.aggregate(Source::Device("vehicle3".into())).unwrap();
        let by_event = agg.aggregate(Source::Value(json!("vehicle3"))).unwrap();

        assert_eq!(by_device.vehicle_id, "veh3");
        assert_eq!(by_device.max_co2, 30.0);
        assert_eq!(by_device.records_processed, 3);
        assert_eq!(by_event.records_processed, 3);
    }
}
