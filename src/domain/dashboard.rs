use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Header duplicating the request's type, used for selector routing.
pub const DASHBOARD_TYPE_HEADER: &str = "dashboardType";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DashboardType {
    CampaignPerformance,
    FinancialReport,
    GeoDistribution,
    ClickTrends,
    BudgetOverview,
}

/// Request to build a dashboard. `dashboard_type` stays a plain string on
/// the wire so producers on other nodes can send kinds this node does not
/// know; it is parsed at dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardGenerationRequest {
    pub dashboard_type: String,
    pub title: String,
    pub description: Option<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub auto_publish: bool,
    pub created_by: String,
    pub recipient_roles: String,
}

impl DashboardGenerationRequest {
    pub fn new(
        dashboard_type: DashboardType,
        title: impl Into<String>,
        date_from: NaiveDate,
        date_to: NaiveDate,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            dashboard_type: dashboard_type.to_string(),
            title: title.into(),
            description: None,
            date_from,
            date_to,
            auto_publish: false,
            created_by: created_by.into(),
            recipient_roles: String::new(),
        }
    }

    pub fn with_recipients<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.recipient_roles = roles
            .into_iter()
            .map(|r| r.as_ref().trim().to_string())
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        self
    }

    pub fn recipients(&self) -> Vec<String> {
        split_roles(&self.recipient_roles)
    }

    pub fn parsed_type(&self) -> Option<DashboardType> {
        self.dashboard_type.trim().parse().ok()
    }
}

/// Comma-separated role list, blanks dropped.
fn split_roles(roles: &str) -> Vec<String> {
    roles
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Renderer-agnostic chart description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub kind: ChartKind,
    pub title: String,
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

/// Chart + report produced from a request, before delivery. This is the
/// payload handed between nodes on the save queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssembledDashboard {
    pub dashboard_type: DashboardType,
    pub title: String,
    pub description: Option<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub auto_publish: bool,
    pub created_by: String,
    pub recipient_roles: String,
    pub chart: ChartData,
    pub report: String,
    pub source_message_id: String,
    pub assembled_at: DateTime<Utc>,
}

impl AssembledDashboard {
    pub fn recipients(&self) -> Vec<String> {
        split_roles(&self.recipient_roles)
    }
}

/// Persisted dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardRecord {
    pub id: i64,
    pub dashboard: AssembledDashboard,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_wire_names() {
        assert_eq!(DashboardType::FinancialReport.to_string(), "FINANCIAL_REPORT");
        assert_eq!(
            "GEO_DISTRIBUTION".parse::<DashboardType>().ok(),
            Some(DashboardType::GeoDistribution)
        );
        assert!("PIE_IN_THE_SKY".parse::<DashboardType>().is_err());
        assert_eq!(
            serde_json::to_string(&DashboardType::ClickTrends).unwrap(),
            "\"CLICK_TRENDS\""
        );
    }

    #[test]
    fn test_recipient_roles_round_trip() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let request = DashboardGenerationRequest::new(
            DashboardType::ClickTrends,
            "Weekly",
            day,
            day,
            "scheduler",
        )
        .with_recipients(["ADMIN", " MARKETING ", ""]);
        assert_eq!(request.recipient_roles, "ADMIN,MARKETING");
        assert_eq!(request.recipients(), vec!["ADMIN", "MARKETING"]);
    }

    #[test]
    fn test_split_roles_drops_blanks() {
        assert_eq!(split_roles(" ADMIN,, FINANCE ,"), vec!["ADMIN", "FINANCE"]);
        assert!(split_roles("").is_empty());
        assert!(split_roles(" , ").is_empty());
    }
}
