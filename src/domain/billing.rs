use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::campaign::Campaign;

pub const COST_PER_CLICK: Decimal = dec!(0.50);
pub const COST_PER_CONVERSION: Decimal = dec!(5.00);
pub const PLATFORM_FEE_PERCENT: Decimal = dec!(10);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingType {
    OnDemand,
    Scheduled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BillingRequest {
    pub campaign_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub requested_by: String,
    pub billing_type: BillingType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineCategory {
    Click,
    Conversion,
    Fee,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub category: LineCategory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Generated,
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BillingInvoice {
    pub campaign_id: i64,
    pub campaign_name: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub line_items: Vec<LineItem>,
    pub total: Decimal,
    pub status: InvoiceStatus,
    pub generated_at: DateTime<Utc>,
}

/// Prices applied by [`calculate_invoice_with_rates`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingRates {
    pub cost_per_click: Decimal,
    pub cost_per_conversion: Decimal,
    pub fee_percent: Decimal,
}

impl Default for BillingRates {
    fn default() -> Self {
        Self {
            cost_per_click: COST_PER_CLICK,
            cost_per_conversion: COST_PER_CONVERSION,
            fee_percent: PLATFORM_FEE_PERCENT,
        }
    }
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Number of conversions implied by `clicks` at `conversion_rate` percent,
/// rounded half-up to a whole count.
pub fn conversions_for(clicks: u64, conversion_rate: Decimal) -> u64 {
    (Decimal::from(clicks) * conversion_rate / dec!(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .unwrap_or(0)
}

pub fn calculate_invoice(
    campaign: &Campaign,
    request: &BillingRequest,
    generated_at: DateTime<Utc>,
) -> BillingInvoice {
    calculate_invoice_with_rates(campaign, request, &BillingRates::default(), generated_at)
}

/// Deterministic invoice for the campaign's current metric snapshot. A
/// campaign without metrics yields an `Empty` invoice with no lines.
pub fn calculate_invoice_with_rates(
    campaign: &Campaign,
    request: &BillingRequest,
    rates: &BillingRates,
    generated_at: DateTime<Utc>,
) -> BillingInvoice {
    let mut invoice = BillingInvoice {
        campaign_id: campaign.id,
        campaign_name: campaign.name.clone(),
        period_start: request.period_start,
        period_end: request.period_end,
        line_items: Vec::new(),
        total: Decimal::ZERO,
        status: InvoiceStatus::Empty,
        generated_at,
    };

    let Some(metrics) = campaign.metrics.as_ref() else {
        return invoice;
    };

    let clicks = Decimal::from(metrics.click_count);
    let click_line = round_money(clicks * rates.cost_per_click);

    let conversions =
        conversions_for(metrics.click_count, metrics.conversion_rate.unwrap_or(Decimal::ZERO));
    let conversion_line = round_money(Decimal::from(conversions) * rates.cost_per_conversion);

    let fee = round_money((click_line + conversion_line) * rates.fee_percent / dec!(100));

    invoice.line_items = vec![
        LineItem {
            description: format!("Referral clicks ({})", metrics.click_count),
            quantity: clicks,
            unit_price: rates.cost_per_click,
            line_total: click_line,
            category: LineCategory::Click,
        },
        LineItem {
            description: format!("Conversions ({})", conversions),
            quantity: Decimal::from(conversions),
            unit_price: rates.cost_per_conversion,
            line_total: conversion_line,
            category: LineCategory::Conversion,
        },
        LineItem {
            description: format!("Platform fee ({}%)", rates.fee_percent),
            quantity: Decimal::ONE,
            unit_price: fee,
            line_total: fee,
            category: LineCategory::Fee,
        },
    ];
    invoice.total = invoice.line_items.iter().map(|l| l.line_total).sum();
    invoice.status = InvoiceStatus::Generated;
    invoice
}
