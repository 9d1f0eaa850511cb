use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Performance figures collected for a campaign. CTR, conversion rate and
/// ROI are percentages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PerformanceMetrics {
    pub click_count: u64,
    pub impressions: u64,
    pub conversion_rate: Option<Decimal>,
    pub ctr: Option<Decimal>,
    pub roi: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub budget: Option<Decimal>,
    pub active: bool,
    pub owner: Option<String>,
    pub metrics: Option<PerformanceMetrics>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCampaign {
    pub name: String,
    pub budget: Option<Decimal>,
    pub owner: Option<String>,
}

impl Campaign {
    pub fn roi(&self) -> Option<Decimal> {
        self.metrics.as_ref().and_then(|m| m.roi)
    }

    pub fn ctr(&self) -> Option<Decimal> {
        self.metrics.as_ref().and_then(|m| m.ctr)
    }

    pub fn conversion_rate(&self) -> Option<Decimal> {
        self.metrics.as_ref().and_then(|m| m.conversion_rate)
    }
}
