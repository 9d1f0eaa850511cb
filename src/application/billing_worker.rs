use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::application::consumer::{decode_payload, MessageHandler};
use crate::application::side_effects::sink_call_best_effort;
use crate::domain::{calculate_invoice, BillingInvoice, BillingRequest, PipelineError};
use crate::infrastructure::broker::BrokerMessage;
use crate::infrastructure::external_sink::{ExternalSink, SinkParams};
use crate::infrastructure::metrics::PipelineMetrics;
use crate::infrastructure::repository::CampaignRepository;
use crate::sink_params;

pub const INVOICE_ADD_METHOD: &str = "crm.invoice.add";

pub struct BillingWorker {
    campaigns: Arc<dyn CampaignRepository>,
    sink: Arc<dyn ExternalSink>,
    metrics: Arc<PipelineMetrics>,
}

impl BillingWorker {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        sink: Arc<dyn ExternalSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            campaigns,
            sink,
            metrics,
        }
    }

    /// Computes the invoice and pushes it to the CRM. The push is best
    /// effort: its failure does not fail the request.
    pub async fn process(&self, request: &BillingRequest) -> Result<BillingInvoice, PipelineError> {
        let campaign = self
            .campaigns
            .find_campaign(request.campaign_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("campaign", request.campaign_id))?;

        let invoice = calculate_invoice(&campaign, request, Utc::now());
        info!(
            "Invoice for campaign {} ({} to {}): total {} [{:?}]",
            invoice.campaign_id,
            invoice.period_start,
            invoice.period_end,
            invoice.total,
            invoice.status
        );

        sink_call_best_effort(
            self.sink.as_ref(),
            INVOICE_ADD_METHOD,
            invoice_params(&invoice, request)?,
            &self.metrics,
        )
        .await;

        Ok(invoice)
    }
}

fn invoice_params(
    invoice: &BillingInvoice,
    request: &BillingRequest,
) -> Result<SinkParams, PipelineError> {
    Ok(sink_params! {
        "campaignId" => invoice.campaign_id.to_string(),
        "title" => format!(
            "Invoice {} {}..{}",
            invoice.campaign_name, invoice.period_start, invoice.period_end
        ),
        "total" => invoice.total.to_string(),
        "status" => serde_json::to_value(invoice.status)?.as_str().unwrap_or_default().to_string(),
        "requestedBy" => request.requested_by.as_str(),
        "lineItems" => serde_json::to_string(&invoice.line_items)?,
    })
}

#[async_trait]
impl MessageHandler for BillingWorker {
    fn name(&self) -> &str {
        "billing"
    }

    async fn handle(&self, message: &BrokerMessage) -> Result<(), PipelineError> {
        let request: BillingRequest = decode_payload(message)?;
        self.process(&request).await.map(|_| ())
    }
}
