use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::billing_worker::BillingWorker;
use crate::application::budget_optimizer::BudgetOptimizer;
use crate::application::consumer::{spawn_consumer, MessageHandler};
use crate::application::dashboard::{
    DashboardDelivery, DashboardGenerationHandler, DashboardSaveWorker, DashboardSources,
    DashboardWorker, Deduplicated, DirectDashboardWorker, HandoffDashboardWorker,
};
use crate::application::enrichment_worker::EnrichmentWorker;
use crate::application::notification_fanout::NotificationFanout;
use crate::application::publisher::CampaignOpsPublisher;
use crate::application::scheduler::{spawn_periodic, BillingSweep, ClickFlusher, DashboardTrigger};
use crate::domain::PipelineError;
use crate::infrastructure::broker::{destinations, MessageBroker};
use crate::infrastructure::click_aggregator::ClickAggregator;
use crate::infrastructure::config::{AppConfig, BrokerKind, DashboardWorkerMode, StorageConfig};
use crate::infrastructure::external_sink::{ExternalSink, HttpExternalSink};
use crate::infrastructure::geo_lookup::{GeoLookup, HttpGeoLookup};
use crate::infrastructure::idempotency::IdempotencyGuard;
use crate::infrastructure::in_memory_broker::InMemoryBroker;
use crate::infrastructure::kafka_broker::KafkaBroker;
use crate::infrastructure::memory_store::InMemoryStore;
use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::postgres_store::PostgresStore;
use crate::infrastructure::repository::{
    AnalyticsRepository, CampaignRepository, ClickRepository, DashboardRepository,
    NotificationRepository,
};
use crate::infrastructure::selector::Selector;

const DASHBOARD_LOOKBACK_DAYS: u64 = 7;

/// Repository handles a node works with, usually all backed by one store.
#[derive(Clone)]
pub struct Storage {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub analytics: Arc<dyn AnalyticsRepository>,
    pub clicks: Arc<dyn ClickRepository>,
    pub dashboards: Arc<dyn DashboardRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Storage {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CampaignRepository
            + AnalyticsRepository
            + ClickRepository
            + DashboardRepository
            + NotificationRepository
            + 'static,
    {
        Self {
            campaigns: store.clone(),
            analytics: store.clone(),
            clicks: store.clone(),
            dashboards: store.clone(),
            notifications: store,
        }
    }
}

/// Collaborators a node is assembled from.
#[derive(Clone)]
pub struct NodeDependencies {
    pub broker: Arc<dyn MessageBroker>,
    pub storage: Storage,
    pub sink: Arc<dyn ExternalSink>,
    pub geo: Arc<dyn GeoLookup>,
    pub metrics: Arc<PipelineMetrics>,
}

impl NodeDependencies {
    /// Builds the production collaborators selected by `config`.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let metrics = Arc::new(PipelineMetrics::default());

        let broker: Arc<dyn MessageBroker> = match config.broker {
            BrokerKind::Kafka => Arc::new(KafkaBroker::new(config.kafka.clone(), metrics.clone())),
            BrokerKind::Memory => Arc::new(InMemoryBroker::new(metrics.clone())),
        };
        broker.connect().await;

        let storage = match &config.storage {
            StorageConfig::Postgres { url, pool_size } => {
                let store = PostgresStore::connect(url, *pool_size).await?;
                store.migrate().await?;
                Storage::from_store(Arc::new(store))
            }
            StorageConfig::Memory => Storage::from_store(Arc::new(InMemoryStore::new())),
        };

        Ok(Self {
            broker,
            storage,
            sink: Arc::new(HttpExternalSink::new(config.sink.clone())?),
            geo: Arc::new(HttpGeoLookup::new(config.geo.clone())?),
            metrics,
        })
    }
}

/// The consumers and timers one process runs, chosen by its roles.
pub struct WorkerNode {
    config: AppConfig,
    deps: NodeDependencies,
    aggregator: Arc<ClickAggregator>,
    dedup: Arc<IdempotencyGuard>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerNode {
    pub fn new(config: AppConfig, deps: NodeDependencies) -> Self {
        let dedup = Arc::new(IdempotencyGuard::new(config.dedup_capacity));
        Self {
            config,
            deps,
            aggregator: Arc::new(ClickAggregator::new()),
            dedup,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn publisher(&self) -> CampaignOpsPublisher {
        CampaignOpsPublisher::new(self.deps.broker.clone())
    }

    pub fn aggregator(&self) -> Arc<ClickAggregator> {
        self.aggregator.clone()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.deps.metrics.clone()
    }

    pub fn budget_optimizer(&self) -> BudgetOptimizer {
        BudgetOptimizer::new(
            self.deps.storage.campaigns.clone(),
            self.deps.broker.clone(),
            self.deps.sink.clone(),
            self.deps.metrics.clone(),
        )
    }

    pub fn click_flusher(&self) -> ClickFlusher {
        ClickFlusher::new(
            self.aggregator.clone(),
            self.deps.storage.clicks.clone(),
            self.deps.metrics.clone(),
        )
    }

    fn dashboard_sources(&self) -> DashboardSources {
        DashboardSources {
            campaigns: self.deps.storage.campaigns.clone(),
            analytics: self.deps.storage.analytics.clone(),
        }
    }

    fn dashboard_delivery(&self) -> DashboardDelivery {
        DashboardDelivery::new(
            self.deps.sink.clone(),
            self.deps.storage.dashboards.clone(),
            self.deps.broker.clone(),
            self.deps.metrics.clone(),
        )
    }

    async fn consume(
        &mut self,
        destination: &str,
        selector: Option<Selector>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), PipelineError> {
        let subscription = self.deps.broker.subscribe(destination, selector).await?;
        info!("Node {} consuming {} with {}", self.config.node_name, destination, handler.name());
        self.tasks.push(spawn_consumer(
            subscription,
            handler,
            self.deps.metrics.clone(),
            self.shutdown.child_token(),
        ));
        Ok(())
    }

    /// Subscribes and starts timers according to the configuration.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        let metrics = self.deps.metrics.clone();
        let roles = self.config.roles.clone();

        if roles.enrichment {
            let worker = EnrichmentWorker::new(
                self.deps.geo.clone(),
                self.aggregator.clone(),
                metrics.clone(),
            );
            self.consume(destinations::GEO_PROCESSING, None, Arc::new(worker))
                .await?;
        }

        if roles.billing {
            let worker = BillingWorker::new(
                self.deps.storage.campaigns.clone(),
                self.deps.sink.clone(),
                metrics.clone(),
            );
            self.consume(destinations::BILLING_PROCESSING, None, Arc::new(worker))
                .await?;
        }

        if roles.notifications {
            let fanout = NotificationFanout::new(
                self.deps.sink.clone(),
                self.deps.storage.notifications.clone(),
                metrics.clone(),
            );
            self.consume(destinations::NOTIFICATION, None, Arc::new(fanout))
                .await?;
        }

        self.start_dashboards().await?;
        self.start_timers();

        info!(
            "Node {} started {} tasks",
            self.config.node_name,
            self.tasks.len()
        );
        Ok(())
    }

    async fn start_dashboards(&mut self) -> Result<(), PipelineError> {
        let mode = self.config.dashboard_mode;
        let generator: Option<Arc<dyn DashboardWorker>> = match mode {
            DashboardWorkerMode::Direct => Some(Arc::new(DirectDashboardWorker::new(
                self.dashboard_sources(),
                self.dashboard_delivery(),
            ))),
            DashboardWorkerMode::Handoff => Some(Arc::new(HandoffDashboardWorker::new(
                self.dashboard_sources(),
                self.deps.broker.clone(),
            ))),
            DashboardWorkerMode::SaveOnly | DashboardWorkerMode::Disabled => None,
        };

        if let Some(generator) = generator {
            info!("Dashboard generation runs in {} mode", generator.shape());
            let handler = Deduplicated::new(
                DashboardGenerationHandler::new(generator),
                self.dedup.clone(),
                self.deps.metrics.clone(),
            );
            let selector = self.config.dashboard_selector.clone();
            self.consume(destinations::DASHBOARD_GENERATION, selector, Arc::new(handler))
                .await?;
        }

        let run_save = mode == DashboardWorkerMode::SaveOnly
            || (mode == DashboardWorkerMode::Handoff && self.config.roles.dashboard_save);
        if run_save {
            let saver = Deduplicated::new(
                DashboardSaveWorker::new(self.dashboard_delivery()),
                self.dedup.clone(),
                self.deps.metrics.clone(),
            );
            self.consume(destinations::DASHBOARD_SAVE, None, Arc::new(saver))
                .await?;
        } else if mode == DashboardWorkerMode::Handoff {
            warn!("Handoff mode without a local save worker; another node must consume the save queue");
        }
        Ok(())
    }

    fn start_timers(&mut self) {
        let schedule = self.config.schedule.clone();

        if let (Some(period), true) = (schedule.click_flush, self.config.roles.enrichment) {
            let flusher = Arc::new(self.click_flusher());
            self.tasks.push(spawn_periodic(
                "click-flush",
                period,
                self.shutdown.child_token(),
                move || {
                    let flusher = flusher.clone();
                    async move { flusher.run_once().await }
                },
            ));
        }

        if let Some(period) = schedule.billing_sweep {
            let sweep = Arc::new(BillingSweep::new(
                self.deps.storage.campaigns.clone(),
                self.publisher(),
            ));
            self.tasks.push(spawn_periodic(
                "billing-sweep",
                period,
                self.shutdown.child_token(),
                move || {
                    let sweep = sweep.clone();
                    async move {
                        if let Err(e) = sweep.run(Utc::now().date_naive()).await {
                            warn!("Billing sweep failed: {}", e);
                        }
                    }
                },
            ));
        }

        if let Some(period) = schedule.dashboard_trigger {
            let trigger = Arc::new(DashboardTrigger::new(
                self.publisher(),
                schedule.scheduled_dashboards.clone(),
                schedule.scheduled_dashboard_recipients.clone(),
                DASHBOARD_LOOKBACK_DAYS,
            ));
            self.tasks.push(spawn_periodic(
                "dashboard-trigger",
                period,
                self.shutdown.child_token(),
                move || {
                    let trigger = trigger.clone();
                    async move {
                        trigger.run(Utc::now().date_naive()).await;
                    }
                },
            ));
        }

        if let Some(period) = schedule.budget_sweep {
            let optimizer = Arc::new(self.budget_optimizer());
            self.tasks.push(spawn_periodic(
                "budget-sweep",
                period,
                self.shutdown.child_token(),
                move || {
                    let optimizer = optimizer.clone();
                    async move {
                        match optimizer.optimize_all().await {
                            Ok(changed) => info!("Budget sweep adjusted {} campaigns", changed),
                            Err(e) => warn!("Budget sweep failed: {}", e),
                        }
                    }
                },
            ));
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops every task, then flushes whatever clicks are still held.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for result in join_all(self.tasks.drain(..)).await {
            if let Err(e) = result {
                warn!("Task ended abnormally: {}", e);
            }
        }
        if self.config.roles.enrichment {
            self.click_flusher().run_once().await;
        }
        info!("Node {} stopped", self.config.node_name);
    }
}
