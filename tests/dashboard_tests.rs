mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use campaign_ops::application::dashboard::worker::DASHBOARD_ADD_METHOD;
use campaign_ops::application::node::{NodeDependencies, Storage, WorkerNode};
use campaign_ops::domain::{
    DashboardGenerationRequest, DashboardType, NotificationEvent, NotificationType,
    DASHBOARD_TYPE_HEADER,
};
use campaign_ops::infrastructure::broker::destinations;
use campaign_ops::infrastructure::config::{
    AppConfig, DashboardWorkerMode, ScheduleConfig, WorkerRoles,
};
use campaign_ops::infrastructure::{InMemoryBroker, InMemoryStore, PipelineMetrics, Selector};
use campaign_ops::CampaignOpsPublisher;

use common::{campaign, metrics, MockGeo, RecordingSink};

struct Harness {
    broker: Arc<InMemoryBroker>,
    store: Arc<InMemoryStore>,
    sink: Arc<RecordingSink>,
    metrics: Arc<PipelineMetrics>,
}

impl Harness {
    fn new(broker: Arc<InMemoryBroker>) -> Self {
        Self {
            broker,
            store: Arc::new(InMemoryStore::new()),
            sink: Arc::new(RecordingSink::default()),
            metrics: Arc::new(PipelineMetrics::default()),
        }
    }

    async fn start(
        &self,
        mode: DashboardWorkerMode,
        dashboard_save: bool,
        selector: Option<Selector>,
    ) -> WorkerNode {
        let config = AppConfig {
            node_name: format!("dashboards-{}", mode),
            roles: WorkerRoles {
                enrichment: false,
                billing: false,
                notifications: false,
                dashboard_save,
            },
            dashboard_mode: mode,
            dashboard_selector: selector,
            schedule: ScheduleConfig {
                click_flush: None,
                billing_sweep: None,
                dashboard_trigger: None,
                budget_sweep: None,
                ..ScheduleConfig::default()
            },
            ..AppConfig::default()
        };
        let deps = NodeDependencies {
            broker: self.broker.clone(),
            storage: Storage::from_store(self.store.clone()),
            sink: self.sink.clone(),
            geo: Arc::new(MockGeo::new()),
            metrics: self.metrics.clone(),
        };
        let mut node = WorkerNode::new(config, deps);
        node.start().await.unwrap();
        node
    }

    fn dashboard_pushes(&self) -> usize {
        self.sink
            .methods()
            .iter()
            .filter(|m| m.as_str() == DASHBOARD_ADD_METHOD)
            .count()
    }
}

async fn wait_for_acks(broker: &InMemoryBroker, id: &str, times: usize) {
    for _ in 0..200 {
        if broker.acknowledged().iter().filter(|a| a.as_str() == id).count() >= times {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("message {} was not acknowledged {} times", id, times);
}

fn request(dashboard_type: DashboardType) -> DashboardGenerationRequest {
    DashboardGenerationRequest::new(
        dashboard_type,
        format!("{} weekly", dashboard_type),
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
        "marketing",
    )
}

#[tokio::test]
async fn test_redelivered_request_is_built_once() {
    let harness = Harness::new(Arc::new(InMemoryBroker::default()));
    harness
        .store
        .put_campaign(campaign(1, Some(dec!(300)), Some(metrics(40, dec!(5), dec!(2), None))))
        .await;
    let node = harness.start(DashboardWorkerMode::Direct, false, None).await;

    let id = CampaignOpsPublisher::new(harness.broker.clone())
        .request_dashboard(&request(DashboardType::CampaignPerformance))
        .await
        .unwrap();
    wait_for_acks(&harness.broker, &id, 1).await;

    let original = harness.broker.published(destinations::DASHBOARD_GENERATION)[0].clone();
    harness.broker.redeliver(&original);
    wait_for_acks(&harness.broker, &id, 2).await;
    node.shutdown().await;

    assert_eq!(harness.dashboard_pushes(), 1);
    let records = harness.store.dashboards();
    assert_eq!(records.len(), 1);
    assert!(records[0].published);
    assert_eq!(records[0].dashboard.source_message_id, id);
    assert_eq!(PipelineMetrics::get(&harness.metrics.duplicates_dropped), 1);
}

#[tokio::test]
async fn test_unsupported_type_produces_nothing() {
    let harness = Harness::new(Arc::new(InMemoryBroker::default()));
    let node = harness.start(DashboardWorkerMode::Direct, false, None).await;

    let mut unknown = request(DashboardType::ClickTrends);
    unknown.dashboard_type = "HEATMAP".to_string();
    let id = CampaignOpsPublisher::new(harness.broker.clone())
        .request_dashboard(&unknown)
        .await
        .unwrap();
    wait_for_acks(&harness.broker, &id, 1).await;
    node.shutdown().await;

    assert!(harness.sink.calls().is_empty());
    assert!(harness.store.dashboards().is_empty());
    assert_eq!(PipelineMetrics::get(&harness.metrics.data_errors), 1);
}

#[tokio::test]
async fn test_unpublished_dashboard_is_still_saved() {
    let broker = Arc::new(InMemoryBroker::default());
    let harness = Harness {
        sink: Arc::new(RecordingSink::failing()),
        ..Harness::new(broker)
    };
    let node = harness.start(DashboardWorkerMode::Direct, false, None).await;

    let id = CampaignOpsPublisher::new(harness.broker.clone())
        .request_dashboard(&request(DashboardType::GeoDistribution).with_recipients(["ADMIN"]))
        .await
        .unwrap();
    wait_for_acks(&harness.broker, &id, 1).await;
    node.shutdown().await;

    let records = harness.store.dashboards();
    assert_eq!(records.len(), 1);
    assert!(!records[0].published);
    assert_eq!(harness.broker.published(destinations::NOTIFICATION).len(), 1);
}

#[tokio::test]
async fn test_handoff_to_save_worker() {
    let broker = Arc::new(InMemoryBroker::default());
    let generator = Harness::new(broker.clone());
    let saver = Harness::new(broker.clone());
    let save_node = saver.start(DashboardWorkerMode::SaveOnly, false, None).await;
    let generate_node = generator.start(DashboardWorkerMode::Handoff, false, None).await;

    let id = CampaignOpsPublisher::new(broker.clone())
        .request_dashboard(&request(DashboardType::ClickTrends).with_recipients(["ADMIN", "MARKETING"]))
        .await
        .unwrap();
    let save_id = format!("{}:save", id);
    wait_for_acks(&broker, &save_id, 1).await;
    generate_node.shutdown().await;
    save_node.shutdown().await;

    assert!(generator.sink.calls().is_empty());
    assert!(generator.store.dashboards().is_empty());
    assert_eq!(saver.dashboard_pushes(), 1);

    let records = saver.store.dashboards();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].dashboard.dashboard_type, DashboardType::ClickTrends);
    assert_eq!(records[0].dashboard.chart.labels.len(), 7);

    let notifications = broker.published(destinations::NOTIFICATION);
    assert_eq!(notifications.len(), 1);
    let event: NotificationEvent = notifications[0].decode().unwrap();
    assert_eq!(event.notification_type, NotificationType::Dashboard);
    assert_eq!(event.target.describe(), "ADMIN,MARKETING");
}

#[tokio::test]
async fn test_redelivered_save_is_delivered_once() {
    let broker = Arc::new(InMemoryBroker::default());
    let generator = Harness::new(broker.clone());
    let saver = Harness::new(broker.clone());
    let save_node = saver.start(DashboardWorkerMode::SaveOnly, false, None).await;
    let generate_node = generator.start(DashboardWorkerMode::Handoff, false, None).await;

    let id = CampaignOpsPublisher::new(broker.clone())
        .request_dashboard(&request(DashboardType::BudgetOverview).with_recipients(["ADMIN"]))
        .await
        .unwrap();
    let save_id = format!("{}:save", id);
    wait_for_acks(&broker, &save_id, 1).await;

    let handed_off = broker.published(destinations::DASHBOARD_SAVE)[0].clone();
    broker.redeliver(&handed_off);
    wait_for_acks(&broker, &save_id, 2).await;
    generate_node.shutdown().await;
    save_node.shutdown().await;

    assert_eq!(saver.dashboard_pushes(), 1);
    assert_eq!(saver.store.dashboards().len(), 1);
    assert_eq!(broker.published(destinations::NOTIFICATION).len(), 1);
    assert_eq!(PipelineMetrics::get(&saver.metrics.duplicates_dropped), 1);
}

#[tokio::test]
async fn test_selector_pools_split_the_queue() {
    let broker_metrics = Arc::new(PipelineMetrics::default());
    let broker = Arc::new(InMemoryBroker::new(broker_metrics.clone()));
    let finance = Harness::new(broker.clone());
    let analytics = Harness::new(broker.clone());
    let finance_node = finance
        .start(
            DashboardWorkerMode::Direct,
            false,
            Some(Selector::equals(DASHBOARD_TYPE_HEADER, "FINANCIAL_REPORT")),
        )
        .await;
    let analytics_node = analytics
        .start(
            DashboardWorkerMode::Direct,
            false,
            Some(
                Selector::parse("dashboardType IN ('CLICK_TRENDS', 'GEO_DISTRIBUTION')").unwrap(),
            ),
        )
        .await;

    let publisher = CampaignOpsPublisher::new(broker.clone());
    let financial = publisher
        .request_dashboard(&request(DashboardType::FinancialReport))
        .await
        .unwrap();
    let geo = publisher
        .request_dashboard(&request(DashboardType::GeoDistribution))
        .await
        .unwrap();
    // Each pool acknowledges every message, matched or skipped.
    wait_for_acks(&broker, &financial, 2).await;
    wait_for_acks(&broker, &geo, 2).await;
    finance_node.shutdown().await;
    analytics_node.shutdown().await;

    let finance_records = finance.store.dashboards();
    assert_eq!(finance_records.len(), 1);
    assert_eq!(finance_records[0].dashboard.dashboard_type, DashboardType::FinancialReport);

    let analytics_records = analytics.store.dashboards();
    assert_eq!(analytics_records.len(), 1);
    assert_eq!(analytics_records[0].dashboard.dashboard_type, DashboardType::GeoDistribution);

    // Skips are counted by the transport, one per pool.
    assert_eq!(PipelineMetrics::get(&broker_metrics.messages_filtered), 2);
}
