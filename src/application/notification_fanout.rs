use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::application::consumer::{decode_payload, MessageHandler};
use crate::application::side_effects::sink_call_best_effort;
use crate::domain::{NotificationEvent, NotificationTarget, PipelineError};
use crate::infrastructure::broker::BrokerMessage;
use crate::infrastructure::external_sink::ExternalSink;
use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::repository::NotificationRepository;
use crate::sink_params;

pub const NOTIFY_METHOD: &str = "im.notify";

/// Relays notifications to the CRM messenger and keeps a copy. Nothing here
/// fails the message.
pub struct NotificationFanout {
    sink: Arc<dyn ExternalSink>,
    notifications: Arc<dyn NotificationRepository>,
    metrics: Arc<PipelineMetrics>,
}

impl NotificationFanout {
    pub fn new(
        sink: Arc<dyn ExternalSink>,
        notifications: Arc<dyn NotificationRepository>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            sink,
            notifications,
            metrics,
        }
    }

    /// Returns whether the CRM accepted the notification.
    pub async fn relay(&self, event: &NotificationEvent) -> bool {
        let (target_kind, to) = match &event.target {
            NotificationTarget::Roles(roles) => ("roles", roles.join(",")),
            NotificationTarget::User(user) => ("user", user.clone()),
        };

        let delivered = sink_call_best_effort(
            self.sink.as_ref(),
            NOTIFY_METHOD,
            sink_params! {
                "to" => to,
                "targetKind" => target_kind,
                "type" => event.notification_type.to_string(),
                "message" => event.format_block(),
            },
            &self.metrics,
        )
        .await;

        if let Err(e) = self.notifications.save_notification(event).await {
            PipelineMetrics::incr(&self.metrics.notification_failures);
            warn!("Failed to store notification '{}': {}", event.title, e);
        }

        if delivered {
            info!(
                "Notification '{}' sent to {}",
                event.title,
                event.target.describe()
            );
        } else {
            PipelineMetrics::incr(&self.metrics.notification_failures);
        }
        delivered
    }
}

#[async_trait]
impl MessageHandler for NotificationFanout {
    fn name(&self) -> &str {
        "notification"
    }

    async fn handle(&self, message: &BrokerMessage) -> Result<(), PipelineError> {
        let event: NotificationEvent = decode_payload(message)?;
        self.relay(&event).await;
        Ok(())
    }
}
