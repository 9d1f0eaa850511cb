use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::application::consumer::{decode_payload, MessageHandler};
use crate::application::dashboard::builders::{assemble, render_chart, DashboardSources};
use crate::application::dashboard::dedup::message_key;
use crate::application::side_effects::{notify_best_effort, sink_call_best_effort};
use crate::domain::{
    AssembledDashboard, DashboardGenerationRequest, DashboardRecord, NotificationEvent,
    NotificationTarget, NotificationType, PipelineError,
};
use crate::infrastructure::broker::{publish_message, BrokerMessage, Headers, MessageBroker, MESSAGE_ID_HEADER};
use crate::infrastructure::external_sink::ExternalSink;
use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::repository::DashboardRepository;
use crate::sink_params;

pub const DASHBOARD_ADD_METHOD: &str = "crm.dashboard.add";

/// One way of turning a generation request into a delivered dashboard.
/// The implementation a node runs is chosen from configuration at startup.
#[async_trait]
pub trait DashboardWorker: Send + Sync {
    fn shape(&self) -> &'static str;

    async fn generate(
        &self,
        request: &DashboardGenerationRequest,
        message_id: &str,
    ) -> Result<(), PipelineError>;
}

/// Everything after assembly: CRM push, persistence and role
/// notification. Shared by the in-place worker and the save worker.
pub struct DashboardDelivery {
    sink: Arc<dyn ExternalSink>,
    dashboards: Arc<dyn DashboardRepository>,
    broker: Arc<dyn MessageBroker>,
    metrics: Arc<PipelineMetrics>,
}

impl DashboardDelivery {
    pub fn new(
        sink: Arc<dyn ExternalSink>,
        dashboards: Arc<dyn DashboardRepository>,
        broker: Arc<dyn MessageBroker>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            sink,
            dashboards,
            broker,
            metrics,
        }
    }

    /// A failed CRM push still persists the dashboard, as unpublished.
    /// Persistence failure is returned; the notification is best effort.
    pub async fn deliver(
        &self,
        dashboard: &AssembledDashboard,
    ) -> Result<DashboardRecord, PipelineError> {
        let chart = render_chart(&dashboard.chart)?;
        let published = sink_call_best_effort(
            self.sink.as_ref(),
            DASHBOARD_ADD_METHOD,
            sink_params! {
                "type" => dashboard.dashboard_type.to_string(),
                "title" => dashboard.title.as_str(),
                "description" => dashboard.description.clone().unwrap_or_default(),
                "dateFrom" => dashboard.date_from.to_string(),
                "dateTo" => dashboard.date_to.to_string(),
                "createdBy" => dashboard.created_by.as_str(),
                "autoPublish" => dashboard.auto_publish.to_string(),
                "report" => dashboard.report.as_str(),
                "chart" => chart,
            },
            &self.metrics,
        )
        .await;

        let record = self.dashboards.save_dashboard(dashboard, published).await?;
        info!(
            "Dashboard {} '{}' ({}) stored, published: {}",
            record.id, dashboard.title, dashboard.dashboard_type, published
        );

        let recipients = dashboard.recipients();
        if recipients.is_empty() {
            return Ok(record);
        }
        let event = NotificationEvent::new(
            NotificationType::Dashboard,
            NotificationTarget::Roles(recipients),
            format!("New dashboard: {}", dashboard.title),
            format!(
                "{} for {} to {} is available",
                dashboard.dashboard_type, dashboard.date_from, dashboard.date_to
            ),
        )
        .related_to(record.id);
        notify_best_effort(self.broker.as_ref(), &event, &self.metrics).await;

        Ok(record)
    }
}

/// Assembles, delivers and persists on the node that received the request.
pub struct DirectDashboardWorker {
    sources: DashboardSources,
    delivery: DashboardDelivery,
}

impl DirectDashboardWorker {
    pub fn new(sources: DashboardSources, delivery: DashboardDelivery) -> Self {
        Self { sources, delivery }
    }
}

#[async_trait]
impl DashboardWorker for DirectDashboardWorker {
    fn shape(&self) -> &'static str {
        "direct"
    }

    async fn generate(
        &self,
        request: &DashboardGenerationRequest,
        message_id: &str,
    ) -> Result<(), PipelineError> {
        let dashboard = assemble(request, message_id, &self.sources).await?;
        self.delivery.deliver(&dashboard).await.map(|_| ())
    }
}

/// Assembles here and hands the result to whichever node runs a
/// [`DashboardSaveWorker`].
pub struct HandoffDashboardWorker {
    sources: DashboardSources,
    broker: Arc<dyn MessageBroker>,
}

impl HandoffDashboardWorker {
    pub fn new(sources: DashboardSources, broker: Arc<dyn MessageBroker>) -> Self {
        Self { sources, broker }
    }
}

#[async_trait]
impl DashboardWorker for HandoffDashboardWorker {
    fn shape(&self) -> &'static str {
        "handoff"
    }

    async fn generate(
        &self,
        request: &DashboardGenerationRequest,
        message_id: &str,
    ) -> Result<(), PipelineError> {
        let dashboard = assemble(request, message_id, &self.sources).await?;

        let mut headers = Headers::new();
        headers.insert(MESSAGE_ID_HEADER.to_string(), format!("{}:save", message_id));
        let id = publish_message(self.broker.as_ref(), &dashboard, headers).await?;
        info!(
            "Dashboard '{}' ({}) handed off for saving as {}",
            dashboard.title, dashboard.dashboard_type, id
        );
        Ok(())
    }
}

/// Consumes the save queue.
pub struct DashboardSaveWorker {
    delivery: DashboardDelivery,
}

impl DashboardSaveWorker {
    pub fn new(delivery: DashboardDelivery) -> Self {
        Self { delivery }
    }
}

#[async_trait]
impl MessageHandler for DashboardSaveWorker {
    fn name(&self) -> &str {
        "dashboard-save"
    }

    async fn handle(&self, message: &BrokerMessage) -> Result<(), PipelineError> {
        let dashboard: AssembledDashboard = decode_payload(message)?;
        self.delivery.deliver(&dashboard).await.map(|_| ())
    }
}

/// Consumes the generation queue and dispatches to the configured shape.
pub struct DashboardGenerationHandler {
    worker: Arc<dyn DashboardWorker>,
}

impl DashboardGenerationHandler {
    pub fn new(worker: Arc<dyn DashboardWorker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl MessageHandler for DashboardGenerationHandler {
    fn name(&self) -> &str {
        "dashboard-generation"
    }

    async fn handle(&self, message: &BrokerMessage) -> Result<(), PipelineError> {
        let request: DashboardGenerationRequest = decode_payload(message)?;
        self.worker.generate(&request, message_key(message)).await
    }
}
