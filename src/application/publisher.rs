use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    BillingRequest, ClickEvent, DashboardGenerationRequest, NotificationEvent,
    DASHBOARD_TYPE_HEADER,
};
use crate::infrastructure::broker::{
    publish_message, BrokerError, Headers, MessageBroker, MESSAGE_ID_HEADER,
};

/// Entry point for producers. Each call returns once the broker accepted
/// the message; processing happens later on whichever node consumes it.
#[derive(Clone)]
pub struct CampaignOpsPublisher {
    broker: Arc<dyn MessageBroker>,
}

impl CampaignOpsPublisher {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }

    pub async fn track_click(&self, event: &ClickEvent) -> Result<String, BrokerError> {
        publish_message(self.broker.as_ref(), event, Headers::new()).await
    }

    pub async fn request_billing(&self, request: &BillingRequest) -> Result<String, BrokerError> {
        publish_message(self.broker.as_ref(), request, Headers::new()).await
    }

    /// Publishes with a fresh `messageId` and a `dashboardType` header that
    /// matches the payload, so selector-filtered pools can route it.
    pub async fn request_dashboard(
        &self,
        request: &DashboardGenerationRequest,
    ) -> Result<String, BrokerError> {
        let mut headers = Headers::new();
        headers.insert(
            DASHBOARD_TYPE_HEADER.to_string(),
            request.dashboard_type.trim().to_string(),
        );
        headers.insert(MESSAGE_ID_HEADER.to_string(), Uuid::new_v4().to_string());
        let id = publish_message(self.broker.as_ref(), request, headers).await?;
        debug!("Dashboard request '{}' queued as {}", request.title, id);
        Ok(id)
    }

    pub async fn notify(&self, event: &NotificationEvent) -> Result<String, BrokerError> {
        publish_message(self.broker.as_ref(), event, Headers::new()).await
    }
}
