//! Incremental aggregation keyed by vehicle.

use crate::summary::{EmissionSummary, Reading, SummaryAccumulator};
use std::collections::BTreeMap;
use tracing::warn;
use vemo_core::TelemetryRecord;

/// Keeps one accumulator per vehicle and updates it per message
#[derive(Debug, Default)]
pub struct StreamingAggregator {
    vehicles: BTreeMap<String, SummaryAccumulator>,
    skipped: u64,
}

impl StreamingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record; returns the vehicle's updated summary
    pub fn observe(&mut self, record: &TelemetryRecord) -> Option<EmissionSummary> {
        self.observe_at(record, chrono::Utc::now().timestamp())
    }

    pub fn observe_at(&mut self, record: &TelemetryRecord, timestamp: i64) -> Option<EmissionSummary> {
        let reading = match Reading::from_record(record) {
            Ok(reading) => reading,
            Err(reason) => {
                self.skipped += 1;
                warn!(%reason, "Skipping record");
                return None;
            }
        };

        let acc = self.vehicles.entry(reading.vehicle_id.clone()).or_default();
        // Keyed by vehicle, so the push cannot hit another identity
        acc.push(reading).ok()?;
        acc.finish(timestamp)
    }

    /// Current summary for `vehicle_id`
    pub fn summary(&self, vehicle_id: &str, timestamp: i64) -> Option<EmissionSummary> {
        self.vehicles.get(vehicle_id)?.finish(timestamp)
    }

    /// Current summaries of every vehicle, ordered by vehicle id
    pub fn summaries(&self, timestamp: i64) -> Vec<EmissionSummary> {
        self.vehicles
            .values()
            .filter_map(|acc| acc.finish(timestamp))
            .collect()
    }

    pub fn vehicles(&self) -> usize {
        self.vehicles.len()
    }

    /// Records that lacked a vehicle id or a numeric CO2 value
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
