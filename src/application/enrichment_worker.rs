use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::application::consumer::{decode_payload, MessageHandler};
use crate::domain::{ClickAggregate, ClickEvent, GeoLocation, PipelineError};
use crate::infrastructure::broker::BrokerMessage;
use crate::infrastructure::click_aggregator::ClickAggregator;
use crate::infrastructure::geo_lookup::{canonicalize_ip, GeoLookup};
use crate::infrastructure::metrics::PipelineMetrics;

/// Locates each click and folds it into the aggregator. A failed lookup
/// degrades to an unknown location; the click is always counted.
pub struct EnrichmentWorker {
    lookup: Arc<dyn GeoLookup>,
    aggregator: Arc<ClickAggregator>,
    metrics: Arc<PipelineMetrics>,
}

impl EnrichmentWorker {
    pub fn new(
        lookup: Arc<dyn GeoLookup>,
        aggregator: Arc<ClickAggregator>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            lookup,
            aggregator,
            metrics,
        }
    }

    /// Returns the click count for the event's IP after this click.
    pub async fn process(&self, event: &ClickEvent) -> u64 {
        let ip = canonicalize_ip(&event.ip);
        let geo = match self.lookup.lookup(&ip).await {
            Ok(geo) => geo,
            Err(e) => {
                warn!("Geo lookup for {} failed, recording as unknown: {}", ip, e);
                PipelineMetrics::incr(&self.metrics.enrichment_fallbacks);
                GeoLocation::unknown()
            }
        };

        let record = ClickAggregate::from_event(event, &ip, geo, Utc::now());
        let count = self.aggregator.upsert(&ip, record);
        PipelineMetrics::incr(&self.metrics.clicks_aggregated);
        debug!("Click from {} aggregated (count {})", ip, count);
        count
    }
}

#[async_trait]
impl MessageHandler for EnrichmentWorker {
    fn name(&self) -> &str {
        "enrichment"
    }

    async fn handle(&self, message: &BrokerMessage) -> Result<(), PipelineError> {
        let event: ClickEvent = decode_payload(message)?;
        self.process(&event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UNKNOWN;
    use crate::infrastructure::geo_lookup::{GeoLookupError, LOOPBACK_CANONICAL};
    use std::sync::Mutex;

    struct FixedLookup {
        calls: Mutex<Vec<String>>,
        result: Result<GeoLocation, GeoLookupError>,
    }

    #[async_trait]
    impl GeoLookup for FixedLookup {
        async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoLookupError> {
            self.calls.lock().unwrap().push(ip.to_string());
            self.result.clone()
        }
    }

    fn worker(result: Result<GeoLocation, GeoLookupError>) -> (EnrichmentWorker, Arc<FixedLookup>, Arc<ClickAggregator>) {
        let lookup = Arc::new(FixedLookup {
            calls: Mutex::new(Vec::new()),
            result,
        });
        let aggregator = Arc::new(ClickAggregator::new());
        let worker = EnrichmentWorker::new(
            lookup.clone(),
            aggregator.clone(),
            Arc::new(PipelineMetrics::default()),
        );
        (worker, lookup, aggregator)
    }

    fn click(ip: &str) -> ClickEvent {
        ClickEvent {
            ip: ip.to_string(),
            referral_hash: Some("ref".to_string()),
            campaign_id: Some(3),
        }
    }

    #[tokio::test]
    async fn test_located_click_is_aggregated() {
        let geo = GeoLocation {
            country: "Germany".to_string(),
            region: "Berlin".to_string(),
            city: "Berlin".to_string(),
            latitude: 52.5,
            longitude: 13.4,
            timezone: "Europe/Berlin".to_string(),
        };
        let (worker, _, aggregator) = worker(Ok(geo));
        assert_eq!(worker.process(&click("5.6.7.8")).await, 1);
        assert_eq!(worker.process(&click("5.6.7.8")).await, 2);

        let drained = aggregator.drain_all();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].country, "Germany");
        assert_eq!(drained[0].campaign_id, Some(3));
    }

    #[tokio::test]
    async fn test_loopback_is_looked_up_in_canonical_form() {
        let (worker, lookup, aggregator) =
            worker(Err(GeoLookupError::Loopback(LOOPBACK_CANONICAL.to_string())));
        worker.process(&click("127.0.0.1")).await;
        worker.process(&click("::1")).await;

        assert_eq!(
            lookup.calls.lock().unwrap().clone(),
            vec![LOOPBACK_CANONICAL, LOOPBACK_CANONICAL]
        );
        assert_eq!(aggregator.click_count(LOOPBACK_CANONICAL), Some(2));
        let drained = aggregator.drain_all();
        assert_eq!(drained[0].country, UNKNOWN);
    }
}
