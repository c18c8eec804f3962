//! vemo Aggregation - Per-vehicle emission summaries
//!
//! Reduces telemetry records to the maximum CO2 reading of one vehicle:
//! - `Aggregator`: batch aggregation from a dataset, a record, a list or a raw event
//! - `SummaryAccumulator`: monoid behind both batch and streaming reduction
//! - `StreamingAggregator`: running summaries keyed by vehicle
//! - `EventHandler` / `SummaryPublisher`: event entry point and result publishing
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use vemo_aggregation::{Aggregator, Source};
//!
//! let aggregator = Aggregator::new("iot_resources/data");
//! let summary = aggregator
//!     .aggregate(Source::Records(vec![
//!         json!({"vehicle_id": "veh0", "vehicle_CO2": 12.5}),
//!         json!({"vehicle_id": "veh0", "vehicle_CO2": 30.0}),
//!     ]))
//!     .unwrap();
//! assert_eq!(summary.max_co2, 30.0);
//! assert_eq!(summary.records_processed, 2);
//! ```

pub mod aggregate;
pub mod batch;
pub mod error;
pub mod handler;
pub mod publish;
pub mod streaming;
pub mod summary;
pub mod watch;

pub use aggregate::{fold_records, summarize, Aggregator, Source};
pub use batch::{discover_datasets, run_batch, troubleshooting, BatchReport};
pub use error::{AggregationError, Result};
pub use handler::EventHandler;
pub use publish::SummaryPublisher;
pub use streaming::StreamingAggregator;
pub use summary::{
    results_channel, EmissionSummary, Reading, SkipReason, SummaryAccumulator, CO2_UNIT,
};
pub use watch::{watch, WatchStats};
