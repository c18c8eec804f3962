//! Emission summaries and the accumulator that builds them.
//!
//! [`SummaryAccumulator`] is a monoid: [`SummaryAccumulator::empty`] is the
//! identity and [`SummaryAccumulator::combine`] keeps the larger maximum,
//! adds the counts and keeps the left identity when it is bound. Folding
//! per-record accumulators left to right gives the batch result, so batch and
//! streaming aggregation agree.

use serde::{Deserialize, Serialize};
use std::fmt;
use vemo_core::{TelemetryRecord, CO2_FIELD, DEVICE_ID_FIELD};

/// Unit reported with every summary
pub const CO2_UNIT: &str = "ppm";

/// Channel summaries for `vehicle_id` are published on
pub fn results_channel(vehicle_id: &str) -> String {
    format!("vehicles/{}/emission/results", vehicle_id)
}

/// Reduced result for one vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionSummary {
    pub vehicle_id: String,
    pub max_co2: f64,
    /// Whole seconds since the epoch, taken when aggregation finished
    pub timestamp: i64,
    pub unit: String,
    pub records_processed: u64,
}

impl EmissionSummary {
    pub fn results_channel(&self) -> String {
        results_channel(&self.vehicle_id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Why a record did not contribute to a summary
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingField(&'static str),
    NonNumericCo2(String),
    OtherVehicle { expected: String, found: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingField(field) => write!(f, "missing field '{}'", field),
            SkipReason::NonNumericCo2(value) => {
                write!(f, "'{}' is not a numeric {} value", value, CO2_FIELD)
            }
            SkipReason::OtherVehicle { expected, found } => {
                write!(f, "record for vehicle {} while aggregating {}", found, expected)
            }
        }
    }
}

/// The two fields aggregation reads from a record
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub vehicle_id: String,
    pub co2: f64,
}

impl Reading {
    pub fn from_record(record: &TelemetryRecord) -> Result<Self, SkipReason> {
        let co2 = record
            .get(CO2_FIELD)
            .ok_or(SkipReason::MissingField(CO2_FIELD))?;
        let vehicle = record
            .get(DEVICE_ID_FIELD)
            .ok_or(SkipReason::MissingField(DEVICE_ID_FIELD))?;
        let co2 = co2
            .as_f64()
            .ok_or_else(|| SkipReason::NonNumericCo2(co2.to_string()))?;

        Ok(Self {
            vehicle_id: vehicle.to_string(),
            co2,
        })
    }
}

/// Running maximum and count for one vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryAccumulator {
    vehicle_id: Option<String>,
    max_co2: f64,
    count: u64,
}

impl Default for SummaryAccumulator {
    fn default() -> Self {
        Self::empty()
    }
}

impl SummaryAccumulator {
    pub fn empty() -> Self {
        Self {
            vehicle_id: None,
            max_co2: 0.0,
            count: 0,
        }
    }

    /// Accumulator holding exactly one reading
    pub fn of(reading: Reading) -> Self {
        Self::empty().combine(Self {
            vehicle_id: Some(reading.vehicle_id),
            max_co2: reading.co2,
            count: 1,
        })
    }

    pub fn combine(self, other: Self) -> Self {
        Self {
            vehicle_id: self.vehicle_id.or(other.vehicle_id),
            max_co2: if other.max_co2 > self.max_co2 {
                other.max_co2
            } else {
                self.max_co2
            },
            count: self.count + other.count,
        }
    }

    /// Fold in a reading unless it belongs to another vehicle
    pub fn push(&mut self, reading: Reading) -> Result<(), SkipReason> {
        if let Some(bound) = &self.vehicle_id {
            if *bound != reading.vehicle_id {
                return Err(SkipReason::OtherVehicle {
                    expected: bound.clone(),
                    found: reading.vehicle_id,
                });
            }
        }
        let current = std::mem::take(self);
        *self = current.combine(Self::of(reading));
        Ok(())
    }

    pub fn vehicle_id(&self) -> Option<&str> {
        self.vehicle_id.as_deref()
    }

    pub fn max_co2(&self) -> f64 {
        self.max_co2
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Summary at `timestamp`, or `None` when no identity is bound or nothing was counted
    pub fn finish(&self, timestamp: i64) -> Option<EmissionSummary> {
        let vehicle_id = self.vehicle_id.clone()?;
        if self.count == 0 {
            return None;
        }
        Some(EmissionSummary {
            vehicle_id,
            max_co2: self.max_co2,
            timestamp,
            unit: CO2_UNIT.to_string(),
            records_processed: self.count,
        })
    }
}
