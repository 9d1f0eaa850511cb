use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    // Broker
    pub messages_published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    pub messages_consumed: AtomicU64,
    pub messages_filtered: AtomicU64,
    pub ack_failures: AtomicU64,

    // Handlers
    pub messages_handled: AtomicU64,
    pub handler_errors: AtomicU64,
    pub data_errors: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub handling_latency: AtomicU64, // in milliseconds

    // Aggregation
    pub clicks_aggregated: AtomicU64,
    pub enrichment_fallbacks: AtomicU64,
    pub flushes: AtomicU64,
    pub aggregates_flushed: AtomicU64,
    pub aggregates_lost: AtomicU64,

    // Side effects
    pub sink_calls: AtomicU64,
    pub sink_failures: AtomicU64,
    pub notification_failures: AtomicU64,
}

/// Point-in-time copy of the counters, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_consumed: u64,
    pub messages_handled: u64,
    pub handler_errors: u64,
    pub duplicates_dropped: u64,
    pub clicks_aggregated: u64,
    pub aggregates_flushed: u64,
    pub aggregates_lost: u64,
    pub sink_failures: u64,
}

impl PipelineMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn record_handling_latency(&self, duration: Duration) {
        self.handling_latency
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn get_average_handling_latency(&self) -> f64 {
        let total = self.handling_latency.load(Ordering::Relaxed);
        let count = self.messages_handled.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn get_error_rate(&self) -> f64 {
        let errors = self.handler_errors.load(Ordering::Relaxed)
            + self.publish_failures.load(Ordering::Relaxed);
        let total = self.messages_handled.load(Ordering::Relaxed)
            + self.messages_published.load(Ordering::Relaxed);

        if total > 0 {
            errors as f64 / total as f64
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_published: self.messages_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            clicks_aggregated: self.clicks_aggregated.load(Ordering::Relaxed),
            aggregates_flushed: self.aggregates_flushed.load(Ordering::Relaxed),
            aggregates_lost: self.aggregates_lost.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}
