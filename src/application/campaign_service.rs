use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info};

use crate::application::side_effects::notify_best_effort;
use crate::domain::{NewCampaign, NotificationEvent, NotificationTarget, NotificationType, PipelineError};
use crate::infrastructure::broker::MessageBroker;
use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::repository::{CampaignRepository, CampaignTransaction};

/// Transactional campaign lifecycle. Each operation commits or rolls back
/// as a whole; the notification follows the commit.
pub struct CampaignService {
    campaigns: Arc<dyn CampaignRepository>,
    broker: Arc<dyn MessageBroker>,
    metrics: Arc<PipelineMetrics>,
}

impl CampaignService {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        broker: Arc<dyn MessageBroker>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            campaigns,
            broker,
            metrics,
        }
    }

    pub async fn create(&self, campaign: NewCampaign) -> Result<i64, PipelineError> {
        if campaign.name.trim().is_empty() {
            return Err(PipelineError::Malformed("campaign name is empty".to_string()));
        }
        if campaign.budget.is_some_and(|b| b < Decimal::ZERO) {
            return Err(PipelineError::Malformed("campaign budget is negative".to_string()));
        }

        let mut tx = self.campaigns.begin().await?;
        let id = match tx.insert_campaign(&campaign).await {
            Ok(id) => id,
            Err(e) => {
                rollback(tx, "create").await;
                return Err(e.into());
            }
        };
        tx.commit().await?;
        info!("Campaign {} '{}' created", id, campaign.name);

        let mut event = NotificationEvent::new(
            NotificationType::Campaign,
            NotificationTarget::Roles(vec!["ADMIN".to_string()]),
            "Campaign created",
            format!("Campaign '{}' was created", campaign.name),
        )
        .related_to(id);
        if let Some(owner) = &campaign.owner {
            event = event.with_data(format!("owner={}", owner));
        }
        notify_best_effort(self.broker.as_ref(), &event, &self.metrics).await;
        Ok(id)
    }

    pub async fn delete(&self, id: i64) -> Result<(), PipelineError> {
        let mut tx = self.campaigns.begin().await?;
        let outcome = Self::delete_in(tx.as_mut(), id).await;
        if let Err(e) = outcome {
            rollback(tx, "delete").await;
            return Err(e);
        }
        tx.commit().await?;
        info!("Campaign {} deleted", id);

        let event = NotificationEvent::new(
            NotificationType::Campaign,
            NotificationTarget::Roles(vec!["ADMIN".to_string()]),
            "Campaign deleted",
            format!("Campaign {} was deleted", id),
        )
        .related_to(id);
        notify_best_effort(self.broker.as_ref(), &event, &self.metrics).await;
        Ok(())
    }

    async fn delete_in(tx: &mut dyn CampaignTransaction, id: i64) -> Result<(), PipelineError> {
        tx.load_for_update(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("campaign", id))?;
        if !tx.delete_campaign(id).await? {
            return Err(PipelineError::not_found("campaign", id));
        }
        Ok(())
    }
}

async fn rollback(tx: Box<dyn CampaignTransaction>, operation: &str) {
    if let Err(e) = tx.rollback().await {
        error!("Rollback of campaign {} failed: {}", operation, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broker::destinations;
    use crate::infrastructure::in_memory_broker::InMemoryBroker;
    use crate::infrastructure::memory_store::InMemoryStore;
    use rust_decimal_macros::dec;

    fn service() -> (CampaignService, Arc<InMemoryStore>, Arc<InMemoryBroker>) {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::default());
        let service = CampaignService::new(
            store.clone(),
            broker.clone(),
            Arc::new(PipelineMetrics::default()),
        );
        (service, store, broker)
    }

    #[tokio::test]
    async fn test_create_then_delete() {
        let (service, store, broker) = service();
        let id = service
            .create(NewCampaign {
                name: "Launch".to_string(),
                budget: Some(dec!(250)),
                owner: Some("ana".to_string()),
            })
            .await
            .unwrap();
        assert!(store.find_campaign(id).await.unwrap().is_some());

        service.delete(id).await.unwrap();
        assert!(store.find_campaign(id).await.unwrap().is_none());
        assert_eq!(broker.published(destinations::NOTIFICATION).len(), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_campaign_changes_nothing() {
        let (service, _, broker) = service();
        let result = service.delete(404).await;
        assert!(matches!(result, Err(PipelineError::NotFound { .. })));
        assert!(broker.published(destinations::NOTIFICATION).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_campaign_is_rejected() {
        let (service, store, _) = service();
        let result = service
            .create(NewCampaign {
                name: " ".to_string(),
                budget: None,
                owner: None,
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Malformed(_))));
        assert!(store.list_campaigns(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_is_reported() {
        let (service, store, broker) = service();
        store.set_fail_writes(true);
        let result = service
            .create(NewCampaign {
                name: "Doomed".to_string(),
                budget: None,
                owner: None,
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Storage(_))));
        store.set_fail_writes(false);
        assert!(store.list_campaigns(false).await.unwrap().is_empty());
        assert!(broker.published(destinations::NOTIFICATION).is_empty());
    }
}
