use std::sync::Arc;

use tracing::{error, info, warn};

use crate::application::side_effects::{notify_best_effort, sink_call_best_effort};
use crate::domain::{
    optimize_budget, BudgetDecision, NotificationEvent, NotificationTarget, NotificationType,
    PipelineError,
};
use crate::infrastructure::broker::MessageBroker;
use crate::infrastructure::external_sink::ExternalSink;
use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::repository::{CampaignRepository, CampaignTransaction};
use crate::sink_params;

pub const BUDGET_SYNC_METHOD: &str = "crm.campaign.budget.sync";

/// Recomputes campaign budgets inside one transaction per campaign.
pub struct BudgetOptimizer {
    campaigns: Arc<dyn CampaignRepository>,
    broker: Arc<dyn MessageBroker>,
    sink: Arc<dyn ExternalSink>,
    metrics: Arc<PipelineMetrics>,
}

impl BudgetOptimizer {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        broker: Arc<dyn MessageBroker>,
        sink: Arc<dyn ExternalSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            campaigns,
            broker,
            sink,
            metrics,
        }
    }

    /// Loads the campaign under a row lock, applies the new budget and
    /// commits. Any error before commit rolls the transaction back. The
    /// notification and CRM sync run only after a successful commit and
    /// cannot undo it.
    pub async fn optimize(&self, campaign_id: i64) -> Result<BudgetDecision, PipelineError> {
        let mut tx = self.campaigns.begin().await?;

        let decision = match Self::apply(tx.as_mut(), campaign_id).await {
            Ok(decision) => decision,
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    error!(
                        "Rollback for campaign {} failed: {}",
                        campaign_id, rollback_error
                    );
                }
                return Err(e);
            }
        };

        if !decision.changed() {
            tx.rollback().await?;
            info!(
                "Budget of campaign {} left unchanged ({:?})",
                campaign_id, decision.old_budget
            );
            return Ok(decision);
        }

        tx.commit().await?;
        info!(
            "Budget of campaign {} adjusted {:?} -> {:?} (factor {}, {:?})",
            campaign_id, decision.old_budget, decision.new_budget, decision.factor, decision.strategy
        );

        self.after_commit(&decision).await;
        Ok(decision)
    }

    async fn apply(
        tx: &mut dyn CampaignTransaction,
        campaign_id: i64,
    ) -> Result<BudgetDecision, PipelineError> {
        let campaign = tx
            .load_for_update(campaign_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("campaign", campaign_id))?;

        let decision = optimize_budget(&campaign);
        if let (true, Some(new_budget)) = (decision.changed(), decision.new_budget) {
            tx.update_budget(campaign_id, new_budget).await?;
        }
        Ok(decision)
    }

    async fn after_commit(&self, decision: &BudgetDecision) {
        let old = decision.old_budget.unwrap_or_default();
        let new = decision.new_budget.unwrap_or_default();

        let event = NotificationEvent::new(
            NotificationType::Budget,
            NotificationTarget::Roles(vec!["ADMIN".to_string(), "MARKETING".to_string()]),
            "Campaign budget optimized",
            format!("Budget changed from {} to {}", old, new),
        )
        .related_to(decision.campaign_id)
        .with_data(format!("factor={}", decision.factor));
        notify_best_effort(self.broker.as_ref(), &event, &self.metrics).await;

        sink_call_best_effort(
            self.sink.as_ref(),
            BUDGET_SYNC_METHOD,
            sink_params! {
                "campaignId" => decision.campaign_id.to_string(),
                "oldBudget" => old.to_string(),
                "newBudget" => new.to_string(),
            },
            &self.metrics,
        )
        .await;
    }

    /// Optimizes every active campaign, one transaction each. Returns how
    /// many budgets changed.
    pub async fn optimize_all(&self) -> Result<usize, PipelineError> {
        let campaigns = self.campaigns.list_campaigns(true).await?;
        let mut changed = 0;
        for campaign in campaigns {
            match self.optimize(campaign.id).await {
                Ok(decision) if decision.changed() => changed += 1,
                Ok(_) => {}
                Err(e) => warn!("Budget optimization for campaign {} failed: {}", campaign.id, e),
            }
        }
        Ok(changed)
    }
}
