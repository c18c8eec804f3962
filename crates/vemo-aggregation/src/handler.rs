//! Event entry point: aggregate an event, then publish the result.

use crate::aggregate::{Aggregator, Source};
use crate::publish::SummaryPublisher;
use crate::summary::EmissionSummary;

/// Aggregates events and optionally publishes each summary
#[derive(Clone)]
pub struct EventHandler {
    aggregator: Aggregator,
    publisher: Option<SummaryPublisher>,
}

impl EventHandler {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: SummaryPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Aggregate `event`; a summary is published when a publisher is set.
    ///
    /// A failed publish is logged and does not change the returned summary.
    pub async fn handle_event(&self, event: impl Into<Source>) -> Option<EmissionSummary> {
        let summary = self.aggregator.aggregate(event.into())?;
        if let Some(publisher) = &self.publisher {
            publisher.publish(&summary).await;
        }
        Some(summary)
    }
}
