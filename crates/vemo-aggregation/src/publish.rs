//! Publishing summaries onto their results channel.

use crate::summary::EmissionSummary;
use std::sync::Arc;
use tracing::{error, info};
use vemo_publisher::Transport;

/// Publishes summaries on `vehicles/<id>/emission/results`
#[derive(Clone)]
pub struct SummaryPublisher {
    transport: Arc<dyn Transport>,
}

impl SummaryPublisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Publish one summary. Failures are logged and reported as `false`.
    pub async fn publish(&self, summary: &EmissionSummary) -> bool {
        let channel = summary.results_channel();
        let payload = match summary.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(vehicle = %summary.vehicle_id, error = %e, "Publish failed");
                return false;
            }
        };

        match self.transport.publish(&channel, payload.clone().into_bytes()).await {
            Ok(()) => {
                info!(channel = %channel, "Published to {}: {}", channel, payload);
                true
            }
            Err(e) => {
                error!(channel = %channel, error = %e, "Publish failed");
                false
            }
        }
    }
}
