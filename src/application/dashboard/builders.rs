use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::{
    calculate_invoice, optimize_budget, AssembledDashboard, BillingRequest, BillingType, Campaign,
    ChartData, ChartKind, DashboardGenerationRequest, DashboardType, PipelineError, Series,
};
use crate::infrastructure::repository::{AnalyticsRepository, CampaignRepository};

/// Read-side data a dashboard is assembled from.
#[derive(Clone)]
pub struct DashboardSources {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub analytics: Arc<dyn AnalyticsRepository>,
}

/// Chart and report body produced by one builder.
struct Built {
    chart: ChartData,
    report: String,
}

/// Resolves the request's type and runs the matching builder. An unknown
/// type is rejected before any data is read.
pub async fn assemble(
    request: &DashboardGenerationRequest,
    source_message_id: &str,
    sources: &DashboardSources,
) -> Result<AssembledDashboard, PipelineError> {
    let dashboard_type = request
        .parsed_type()
        .ok_or_else(|| PipelineError::UnsupportedDashboardType(request.dashboard_type.clone()))?;
    if request.date_from > request.date_to {
        return Err(PipelineError::Malformed(format!(
            "dashboard period {}..{} is reversed",
            request.date_from, request.date_to
        )));
    }

    let built = match dashboard_type {
        DashboardType::CampaignPerformance => campaign_performance(request, sources).await?,
        DashboardType::FinancialReport => financial_report(request, sources).await?,
        DashboardType::GeoDistribution => geo_distribution(request, sources).await?,
        DashboardType::ClickTrends => click_trends(request, sources).await?,
        DashboardType::BudgetOverview => budget_overview(request, sources).await?,
    };

    Ok(AssembledDashboard {
        dashboard_type,
        title: request.title.clone(),
        description: request.description.clone(),
        date_from: request.date_from,
        date_to: request.date_to,
        auto_publish: request.auto_publish,
        created_by: request.created_by.clone(),
        recipient_roles: request.recipient_roles.clone(),
        chart: built.chart,
        report: built.report,
        source_message_id: source_message_id.to_string(),
        assembled_at: Utc::now(),
    })
}

/// Chart bytes handed to the CRM.
pub fn render_chart(chart: &ChartData) -> Result<Vec<u8>, PipelineError> {
    Ok(serde_json::to_vec(chart)?)
}

fn as_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn period(request: &DashboardGenerationRequest) -> String {
    format!("{} to {}", request.date_from, request.date_to)
}

async fn active_campaigns(sources: &DashboardSources) -> Result<Vec<Campaign>, PipelineError> {
    Ok(sources.campaigns.list_campaigns(true).await?)
}

async fn campaign_performance(
    request: &DashboardGenerationRequest,
    sources: &DashboardSources,
) -> Result<Built, PipelineError> {
    let campaigns = active_campaigns(sources).await?;

    let mut report = format!("Campaign performance, {}\n", period(request));
    let mut clicks = Vec::with_capacity(campaigns.len());
    let mut ctr = Vec::with_capacity(campaigns.len());
    for campaign in &campaigns {
        let metrics = campaign.metrics.clone().unwrap_or_default();
        clicks.push(metrics.click_count as f64);
        ctr.push(campaign.ctr().map(as_f64).unwrap_or(0.0));
        report.push_str(&format!(
            "- {}: {} clicks, {} impressions, CTR {}, ROI {}\n",
            campaign.name,
            metrics.click_count,
            metrics.impressions,
            fmt_percent(campaign.ctr()),
            fmt_percent(campaign.roi()),
        ));
    }
    if campaigns.is_empty() {
        report.push_str("No active campaigns.\n");
    }

    Ok(Built {
        chart: ChartData {
            kind: ChartKind::Bar,
            title: request.title.clone(),
            labels: campaigns.iter().map(|c| c.name.clone()).collect(),
            series: vec![
                Series {
                    name: "Clicks".to_string(),
                    values: clicks,
                },
                Series {
                    name: "CTR %".to_string(),
                    values: ctr,
                },
            ],
        },
        report,
    })
}

async fn financial_report(
    request: &DashboardGenerationRequest,
    sources: &DashboardSources,
) -> Result<Built, PipelineError> {
    let campaigns = active_campaigns(sources).await?;
    let generated_at = Utc::now();

    let mut report = format!("Financial report, {}\n", period(request));
    let mut totals = Vec::with_capacity(campaigns.len());
    let mut grand_total = Decimal::ZERO;
    for campaign in &campaigns {
        let billing = BillingRequest {
            campaign_id: campaign.id,
            period_start: request.date_from,
            period_end: request.date_to,
            requested_by: request.created_by.clone(),
            billing_type: BillingType::OnDemand,
        };
        let invoice = calculate_invoice(campaign, &billing, generated_at);
        grand_total += invoice.total;
        totals.push(as_f64(invoice.total));
        report.push_str(&format!("- {}: {}\n", campaign.name, invoice.total));
    }
    report.push_str(&format!("Total billed: {}\n", grand_total));

    Ok(Built {
        chart: ChartData {
            kind: ChartKind::Bar,
            title: request.title.clone(),
            labels: campaigns.iter().map(|c| c.name.clone()).collect(),
            series: vec![Series {
                name: "Billed".to_string(),
                values: totals,
            }],
        },
        report,
    })
}

async fn geo_distribution(
    request: &DashboardGenerationRequest,
    sources: &DashboardSources,
) -> Result<Built, PipelineError> {
    let rows = sources
        .analytics
        .clicks_by_country(request.date_from, request.date_to)
        .await?;
    let total: u64 = rows.iter().map(|r| r.clicks).sum();

    let mut report = format!("Click origin by country, {}\n", period(request));
    for row in &rows {
        let share = if total > 0 {
            row.clicks as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        report.push_str(&format!("- {}: {} ({:.1}%)\n", row.country, row.clicks, share));
    }
    report.push_str(&format!("Total clicks: {}\n", total));

    Ok(Built {
        chart: ChartData {
            kind: ChartKind::Pie,
            title: request.title.clone(),
            labels: rows.iter().map(|r| r.country.clone()).collect(),
            series: vec![Series {
                name: "Clicks".to_string(),
                values: rows.iter().map(|r| r.clicks as f64).collect(),
            }],
        },
        report,
    })
}

async fn click_trends(
    request: &DashboardGenerationRequest,
    sources: &DashboardSources,
) -> Result<Built, PipelineError> {
    let rows = sources
        .analytics
        .clicks_by_day(request.date_from, request.date_to)
        .await?;
    let by_day: BTreeMap<NaiveDate, u64> = rows.into_iter().map(|r| (r.day, r.clicks)).collect();

    // Days without clicks still get a point.
    let days: Vec<NaiveDate> = request
        .date_from
        .iter_days()
        .take_while(|day| *day <= request.date_to)
        .collect();
    let values: Vec<f64> = days
        .iter()
        .map(|day| by_day.get(day).copied().unwrap_or(0) as f64)
        .collect();
    let total: u64 = by_day.values().sum();
    let peak = by_day.iter().max_by_key(|(_, clicks)| **clicks);

    let mut report = format!("Click trends, {}\n", period(request));
    report.push_str(&format!("Total clicks: {}\n", total));
    report.push_str(&format!(
        "Daily average: {:.1}\n",
        total as f64 / days.len().max(1) as f64
    ));
    if let Some((day, clicks)) = peak {
        report.push_str(&format!("Peak: {} ({} clicks)\n", day, clicks));
    }

    Ok(Built {
        chart: ChartData {
            kind: ChartKind::Line,
            title: request.title.clone(),
            labels: days.iter().map(|d| d.to_string()).collect(),
            series: vec![Series {
                name: "Clicks".to_string(),
                values,
            }],
        },
        report,
    })
}

async fn budget_overview(
    request: &DashboardGenerationRequest,
    sources: &DashboardSources,
) -> Result<Built, PipelineError> {
    let campaigns = active_campaigns(sources).await?;

    let mut report = format!("Budget overview, {}\n", period(request));
    let mut current = Vec::with_capacity(campaigns.len());
    let mut projected = Vec::with_capacity(campaigns.len());
    let mut allocated = Decimal::ZERO;
    for campaign in &campaigns {
        let decision = optimize_budget(campaign);
        let budget = campaign.budget.unwrap_or_default();
        let next = decision.new_budget.unwrap_or_default();
        allocated += budget;
        current.push(as_f64(budget));
        projected.push(as_f64(next));
        report.push_str(&format!(
            "- {}: {} (suggested {}, {:?})\n",
            campaign.name, budget, next, decision.strategy
        ));
    }
    report.push_str(&format!("Total allocated: {}\n", allocated));

    Ok(Built {
        chart: ChartData {
            kind: ChartKind::Bar,
            title: request.title.clone(),
            labels: campaigns.iter().map(|c| c.name.clone()).collect(),
            series: vec![
                Series {
                    name: "Budget".to_string(),
                    values: current,
                },
                Series {
                    name: "Suggested".to_string(),
                    values: projected,
                },
            ],
        },
        report,
    })
}

fn fmt_percent(value: Option<Decimal>) -> String {
    value
        .map(|v| format!("{}%", v))
        .unwrap_or_else(|| "n/a".to_string())
}
