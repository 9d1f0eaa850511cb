use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{
    AssembledDashboard, Campaign, ClickAggregate, DashboardRecord, NewCampaign,
    NotificationEvent,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Transaction error: {0}")]
    Transaction(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        StorageError::Database(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountryClicks {
    pub country: String,
    pub clicks: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyClicks {
    pub day: NaiveDate,
    pub clicks: u64,
}

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn find_campaign(&self, id: i64) -> Result<Option<Campaign>, StorageError>;

    async fn list_campaigns(&self, active_only: bool) -> Result<Vec<Campaign>, StorageError>;

    /// Opens a unit of work. Dropping it without `commit` discards it.
    async fn begin(&self) -> Result<Box<dyn CampaignTransaction>, StorageError>;
}

#[async_trait]
pub trait CampaignTransaction: Send {
    /// Loads the campaign and locks it until the transaction ends.
    async fn load_for_update(&mut self, id: i64) -> Result<Option<Campaign>, StorageError>;

    async fn update_budget(&mut self, id: i64, budget: Decimal) -> Result<(), StorageError>;

    async fn insert_campaign(&mut self, campaign: &NewCampaign) -> Result<i64, StorageError>;

    async fn delete_campaign(&mut self, id: i64) -> Result<bool, StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn clicks_by_country(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CountryClicks>, StorageError>;

    async fn clicks_by_day(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyClicks>, StorageError>;
}

#[async_trait]
pub trait ClickRepository: Send + Sync {
    async fn save_aggregates(&self, aggregates: &[ClickAggregate]) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait DashboardRepository: Send + Sync {
    async fn save_dashboard(
        &self,
        dashboard: &AssembledDashboard,
        published: bool,
    ) -> Result<DashboardRecord, StorageError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn save_notification(&self, event: &NotificationEvent) -> Result<i64, StorageError>;
}
