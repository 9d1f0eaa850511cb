use tracing::{debug, warn};

use crate::domain::NotificationEvent;
use crate::infrastructure::broker::{publish_message, Headers, MessageBroker};
use crate::infrastructure::external_sink::{ExternalSink, SinkParams};
use crate::infrastructure::metrics::PipelineMetrics;

/// Calls the CRM and logs a failure instead of returning it. Returns
/// whether the call succeeded.
pub async fn sink_call_best_effort(
    sink: &dyn ExternalSink,
    method: &str,
    params: SinkParams,
    metrics: &PipelineMetrics,
) -> bool {
    PipelineMetrics::incr(&metrics.sink_calls);
    match sink.call(method, params).await {
        Ok(response) => {
            debug!("Sink {} answered: {}", method, response);
            true
        }
        Err(e) => {
            PipelineMetrics::incr(&metrics.sink_failures);
            warn!("Best-effort sink call {} failed: {}", method, e);
            false
        }
    }
}

/// Enqueues a notification, logging a delivery failure.
pub async fn notify_best_effort(
    broker: &dyn MessageBroker,
    event: &NotificationEvent,
    metrics: &PipelineMetrics,
) -> bool {
    match publish_message(broker, event, Headers::new()).await {
        Ok(id) => {
            debug!("Notification '{}' enqueued as {}", event.title, id);
            true
        }
        Err(e) => {
            PipelineMetrics::incr(&metrics.notification_failures);
            warn!("Failed to enqueue notification '{}': {}", event.title, e);
            false
        }
    }
}
