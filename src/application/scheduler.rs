use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::publisher::CampaignOpsPublisher;
use crate::domain::{BillingRequest, BillingType, DashboardGenerationRequest, DashboardType, PipelineError};
use crate::infrastructure::click_aggregator::ClickAggregator;
use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::repository::{CampaignRepository, ClickRepository};

pub const SCHEDULER_USER: &str = "scheduler";

/// Runs `job` every `period` until `shutdown`. A run is awaited before the
/// next tick and ticks missed meanwhile are skipped, so runs never
/// overlap.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; the first run waits a full period.
        interval.tick().await;
        info!("Timer {} started, every {:?}", name, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Timer {} stopped", name);
                    break;
                }
                _ = interval.tick() => job().await,
            }
        }
    })
}

/// Moves aggregated clicks from memory to storage.
pub struct ClickFlusher {
    aggregator: Arc<ClickAggregator>,
    clicks: Arc<dyn ClickRepository>,
    metrics: Arc<PipelineMetrics>,
}

impl ClickFlusher {
    pub fn new(
        aggregator: Arc<ClickAggregator>,
        clicks: Arc<dyn ClickRepository>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            aggregator,
            clicks,
            metrics,
        }
    }

    /// Drains the aggregator and stores the result. Drained aggregates that
    /// fail to store are counted as lost, not put back.
    pub async fn flush(&self) -> Result<usize, PipelineError> {
        let drained = self.aggregator.drain_all();
        PipelineMetrics::incr(&self.metrics.flushes);
        if drained.is_empty() {
            return Ok(0);
        }

        let count = drained.len();
        match self.clicks.save_aggregates(&drained).await {
            Ok(_) => {
                PipelineMetrics::add(&self.metrics.aggregates_flushed, count as u64);
                info!("Flushed {} click aggregates", count);
                Ok(count)
            }
            Err(e) => {
                PipelineMetrics::add(&self.metrics.aggregates_lost, count as u64);
                error!("Failed to store {} click aggregates: {}", count, e);
                Err(e.into())
            }
        }
    }

    pub async fn run_once(&self) {
        let _ = self.flush().await;
        info!("Pipeline metrics: {:?}", self.metrics.snapshot());
    }
}

/// Queues a scheduled invoice per active campaign for the previous day.
pub struct BillingSweep {
    campaigns: Arc<dyn CampaignRepository>,
    publisher: CampaignOpsPublisher,
}

impl BillingSweep {
    pub fn new(campaigns: Arc<dyn CampaignRepository>, publisher: CampaignOpsPublisher) -> Self {
        Self {
            campaigns,
            publisher,
        }
    }

    /// Returns how many requests were queued.
    pub async fn run(&self, today: NaiveDate) -> Result<usize, PipelineError> {
        let day = previous_day(today);
        let campaigns = self.campaigns.list_campaigns(true).await?;
        let mut queued = 0;
        for campaign in campaigns {
            let request = BillingRequest {
                campaign_id: campaign.id,
                period_start: day,
                period_end: day,
                requested_by: SCHEDULER_USER.to_string(),
                billing_type: BillingType::Scheduled,
            };
            match self.publisher.request_billing(&request).await {
                Ok(_) => queued += 1,
                Err(e) => warn!("Failed to queue billing for campaign {}: {}", campaign.id, e),
            }
        }
        info!("Billing sweep for {} queued {} requests", day, queued);
        Ok(queued)
    }
}

/// Queues the configured dashboards over the days before `today`.
pub struct DashboardTrigger {
    publisher: CampaignOpsPublisher,
    types: Vec<DashboardType>,
    recipients: String,
    lookback_days: u64,
}

impl DashboardTrigger {
    pub fn new(
        publisher: CampaignOpsPublisher,
        types: Vec<DashboardType>,
        recipients: String,
        lookback_days: u64,
    ) -> Self {
        Self {
            publisher,
            types,
            recipients,
            lookback_days: lookback_days.max(1),
        }
    }

    pub async fn run(&self, today: NaiveDate) -> usize {
        let date_to = previous_day(today);
        let date_from = date_to
            .checked_sub_days(Days::new(self.lookback_days - 1))
            .unwrap_or(date_to);

        let mut queued = 0;
        for dashboard_type in &self.types {
            let mut request = DashboardGenerationRequest::new(
                *dashboard_type,
                format!("{} {}..{}", dashboard_type, date_from, date_to),
                date_from,
                date_to,
                SCHEDULER_USER,
            )
            .with_recipients(self.recipients.split(','));
            request.auto_publish = true;

            match self.publisher.request_dashboard(&request).await {
                Ok(_) => queued += 1,
                Err(e) => warn!("Failed to queue {} dashboard: {}", dashboard_type, e),
            }
        }
        queued
    }
}

fn previous_day(today: NaiveDate) -> NaiveDate {
    today.pred_opt().unwrap_or(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Campaign, ClickAggregate, ClickEvent, GeoLocation};
    use crate::infrastructure::broker::destinations;
    use crate::infrastructure::in_memory_broker::InMemoryBroker;
    use crate::infrastructure::memory_store::InMemoryStore;
    use chrono::Utc;

    fn aggregate(ip: &str) -> ClickAggregate {
        let event = ClickEvent {
            ip: ip.to_string(),
            referral_hash: None,
            campaign_id: None,
        };
        ClickAggregate::from_event(&event, ip, GeoLocation::unknown(), Utc::now())
    }

    #[tokio::test]
    async fn test_flush_moves_aggregates_to_storage() {
        let aggregator = Arc::new(ClickAggregator::new());
        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(PipelineMetrics::default());
        let flusher = ClickFlusher::new(aggregator.clone(), store.clone(), metrics.clone());

        aggregator.upsert("1.1.1.1", aggregate("1.1.1.1"));
        aggregator.upsert("2.2.2.2", aggregate("2.2.2.2"));
        assert_eq!(flusher.flush().await.unwrap(), 2);
        assert!(aggregator.is_empty());
        assert_eq!(store.clicks().len(), 2);
        assert_eq!(flusher.flush().await.unwrap(), 0);

        aggregator.upsert("3.3.3.3", aggregate("3.3.3.3"));
        store.set_fail_writes(true);
        assert!(flusher.flush().await.is_err());
        assert_eq!(PipelineMetrics::get(&metrics.aggregates_lost), 1);
        assert!(aggregator.is_empty());
    }

    #[tokio::test]
    async fn test_billing_sweep_covers_active_campaigns() {
        let store = Arc::new(InMemoryStore::new());
        for (id, active) in [(1, true), (2, false), (3, true)] {
            store
                .put_campaign(Campaign {
                    id,
                    name: format!("c{}", id),
                    budget: None,
                    active,
                    owner: None,
                    metrics: None,
                    updated_at: Utc::now(),
                })
                .await;
        }
        let broker = Arc::new(InMemoryBroker::default());
        let sweep = BillingSweep::new(store, CampaignOpsPublisher::new(broker.clone()));

        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(sweep.run(today).await.unwrap(), 2);

        let published = broker.published(destinations::BILLING_PROCESSING);
        let request: BillingRequest = published[0].decode().unwrap();
        assert_eq!(request.period_start, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(request.billing_type, BillingType::Scheduled);
    }

    #[tokio::test]
    async fn test_dashboard_trigger_covers_lookback_window() {
        let broker = Arc::new(InMemoryBroker::default());
        let trigger = DashboardTrigger::new(
            CampaignOpsPublisher::new(broker.clone()),
            vec![DashboardType::ClickTrends, DashboardType::GeoDistribution],
            "ADMIN,MARKETING".to_string(),
            7,
        );
        let today = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        assert_eq!(trigger.run(today).await, 2);

        let published = broker.published(destinations::DASHBOARD_GENERATION);
        let request: DashboardGenerationRequest = published[1].decode().unwrap();
        assert_eq!(request.dashboard_type, "GEO_DISTRIBUTION");
        assert_eq!(request.date_from, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(request.date_to, NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
        assert_eq!(request.recipients(), vec!["ADMIN", "MARKETING"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_do_not_start_before_first_period() {
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let counter = runs.clone();
        let handle = spawn_periodic("test", Duration::from_secs(10), shutdown.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
