use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::{
    AssembledDashboard, Campaign, ClickAggregate, DashboardRecord, NewCampaign,
    NotificationEvent,
};
use crate::infrastructure::repository::{
    AnalyticsRepository, CampaignRepository, CampaignTransaction, ClickRepository,
    CountryClicks, DailyClicks, DashboardRepository, NotificationRepository, StorageError,
};

type CampaignTable = BTreeMap<i64, Campaign>;

/// Process-local storage implementing every repository trait. Campaign
/// transactions serialize on one lock and stage their writes until commit.
#[derive(Default)]
pub struct InMemoryStore {
    campaigns: Arc<AsyncMutex<CampaignTable>>,
    next_id: Arc<AtomicI64>,
    clicks: Mutex<Vec<ClickAggregate>>,
    dashboards: Mutex<Vec<DashboardRecord>>,
    notifications: Mutex<Vec<NotificationEvent>>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_campaign(&self, campaign: Campaign) {
        self.next_id.fetch_max(campaign.id, Ordering::SeqCst);
        self.campaigns.lock().await.insert(campaign.id, campaign);
    }

    /// Makes every subsequent write fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn clicks(&self) -> Vec<ClickAggregate> {
        self.clicks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dashboards(&self) -> Vec<DashboardRecord> {
        self.dashboards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn notifications(&self) -> Vec<NotificationEvent> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Database("writes disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CampaignRepository for InMemoryStore {
    async fn find_campaign(&self, id: i64) -> Result<Option<Campaign>, StorageError> {
        Ok(self.campaigns.lock().await.get(&id).cloned())
    }

    async fn list_campaigns(&self, active_only: bool) -> Result<Vec<Campaign>, StorageError> {
        Ok(self
            .campaigns
            .lock()
            .await
            .values()
            .filter(|c| !active_only || c.active)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn CampaignTransaction>, StorageError> {
        let guard = self.campaigns.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            staged,
            next_id: self.next_id.clone(),
            fail_commit: self.fail_writes.load(Ordering::SeqCst),
        }))
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<CampaignTable>,
    staged: CampaignTable,
    next_id: Arc<AtomicI64>,
    fail_commit: bool,
}

#[async_trait]
impl CampaignTransaction for InMemoryTransaction {
    async fn load_for_update(&mut self, id: i64) -> Result<Option<Campaign>, StorageError> {
        Ok(self.staged.get(&id).cloned())
    }

    async fn update_budget(&mut self, id: i64, budget: Decimal) -> Result<(), StorageError> {
        let campaign = self
            .staged
            .get_mut(&id)
            .ok_or_else(|| StorageError::Database(format!("campaign {} does not exist", id)))?;
        campaign.budget = Some(budget);
        campaign.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_campaign(&mut self, campaign: &NewCampaign) -> Result<i64, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.staged.insert(
            id,
            Campaign {
                id,
                name: campaign.name.clone(),
                budget: campaign.budget,
                active: true,
                owner: campaign.owner.clone(),
                metrics: None,
                updated_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn delete_campaign(&mut self, id: i64) -> Result<bool, StorageError> {
        Ok(self.staged.remove(&id).is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if self.fail_commit {
            return Err(StorageError::Transaction("commit refused".to_string()));
        }
        let InMemoryTransaction {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

#[async_trait]
impl AnalyticsRepository for InMemoryStore {
    async fn clicks_by_country(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CountryClicks>, StorageError> {
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for aggregate in self.clicks() {
            let day = aggregate.last_seen_at.date_naive();
            if day >= from && day <= to {
                *totals.entry(aggregate.country.clone()).or_default() += aggregate.click_count;
            }
        }
        let mut rows: Vec<CountryClicks> = totals
            .into_iter()
            .map(|(country, clicks)| CountryClicks { country, clicks })
            .collect();
        rows.sort_by(|a, b| b.clicks.cmp(&a.clicks).then_with(|| a.country.cmp(&b.country)));
        Ok(rows)
    }

    async fn clicks_by_day(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyClicks>, StorageError> {
        let mut totals: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        for aggregate in self.clicks() {
            let day = aggregate.last_seen_at.date_naive();
            if day >= from && day <= to {
                *totals.entry(day).or_default() += aggregate.click_count;
            }
        }
        Ok(totals
            .into_iter()
            .map(|(day, clicks)| DailyClicks { day, clicks })
            .collect())
    }
}

#[async_trait]
impl ClickRepository for InMemoryStore {
    async fn save_aggregates(&self, aggregates: &[ClickAggregate]) -> Result<u64, StorageError> {
        self.check_writable()?;
        self.clicks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(aggregates);
        Ok(aggregates.len() as u64)
    }
}

#[async_trait]
impl DashboardRepository for InMemoryStore {
    async fn save_dashboard(
        &self,
        dashboard: &AssembledDashboard,
        published: bool,
    ) -> Result<DashboardRecord, StorageError> {
        self.check_writable()?;
        let mut dashboards = self
            .dashboards
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let record = DashboardRecord {
            id: dashboards.len() as i64 + 1,
            dashboard: dashboard.clone(),
            published,
            created_at: Utc::now(),
        };
        dashboards.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn save_notification(&self, event: &NotificationEvent) -> Result<i64, StorageError> {
        self.check_writable()?;
        let mut notifications = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        notifications.push(event.clone());
        Ok(notifications.len() as i64)
    }
}
