use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::info;

use crate::domain::{
    AssembledDashboard, Campaign, ClickAggregate, DashboardRecord, NewCampaign,
    NotificationEvent, PerformanceMetrics,
};
use crate::infrastructure::repository::{
    AnalyticsRepository, CampaignRepository, CampaignTransaction, ClickRepository,
    CountryClicks, DailyClicks, DashboardRepository, NotificationRepository, StorageError,
};

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65535;
const AGGREGATE_BINDS: usize = 11;
const MAX_AGGREGATES_PER_INSERT: usize = MAX_BIND_PARAMS / AGGREGATE_BINDS;

fn aggregate_batches(aggregates: &[ClickAggregate]) -> std::slice::Chunks<'_, ClickAggregate> {
    aggregates.chunks(MAX_AGGREGATES_PER_INSERT)
}

const CAMPAIGN_COLUMNS: &str = "id, name, budget, active, owner, click_count, impressions, \
                                conversion_rate, ctr, roi, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: i64,
    name: String,
    budget: Option<Decimal>,
    active: bool,
    owner: Option<String>,
    click_count: Option<i64>,
    impressions: Option<i64>,
    conversion_rate: Option<Decimal>,
    ctr: Option<Decimal>,
    roi: Option<Decimal>,
    updated_at: DateTime<Utc>,
}

impl From<CampaignRow> for Campaign {
    fn from(row: CampaignRow) -> Self {
        // A campaign that was never measured has no click count at all.
        let metrics = row.click_count.map(|clicks| PerformanceMetrics {
            click_count: clicks.max(0) as u64,
            impressions: row.impressions.unwrap_or(0).max(0) as u64,
            conversion_rate: row.conversion_rate,
            ctr: row.ctr,
            roi: row.roi,
        });
        Campaign {
            id: row.id,
            name: row.name,
            budget: row.budget,
            active: row.active,
            owner: row.owner,
            metrics,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("Connected to Postgres (pool size {})", max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}

#[async_trait]
impl CampaignRepository for PostgresStore {
    async fn find_campaign(&self, id: i64) -> Result<Option<Campaign>, StorageError> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {} FROM campaigns WHERE id = $1",
            CAMPAIGN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Campaign::from))
    }

    async fn list_campaigns(&self, active_only: bool) -> Result<Vec<Campaign>, StorageError> {
        let rows = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {} FROM campaigns WHERE ($1 = FALSE OR active) ORDER BY id",
            CAMPAIGN_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Campaign::from).collect())
    }

    async fn begin(&self) -> Result<Box<dyn CampaignTransaction>, StorageError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CampaignTransaction for PostgresTransaction {
    async fn load_for_update(&mut self, id: i64) -> Result<Option<Campaign>, StorageError> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {} FROM campaigns WHERE id = $1 FOR UPDATE",
            CAMPAIGN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Campaign::from))
    }

    async fn update_budget(&mut self, id: i64, budget: Decimal) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE campaigns SET budget = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(budget)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::Database(format!("campaign {} does not exist", id)));
        }
        Ok(())
    }

    async fn insert_campaign(&mut self, campaign: &NewCampaign) -> Result<i64, StorageError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO campaigns (name, budget, owner) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&campaign.name)
        .bind(campaign.budget)
        .bind(&campaign.owner)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn delete_campaign(&mut self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }
}

#[async_trait]
impl AnalyticsRepository for PostgresStore {
    async fn clicks_by_country(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CountryClicks>, StorageError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT country, SUM(click_count)::BIGINT AS clicks
            FROM click_aggregates
            WHERE last_seen_at::date BETWEEN $1 AND $2
            GROUP BY country
            ORDER BY clicks DESC, country
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(country, clicks)| CountryClicks {
                country,
                clicks: clicks.max(0) as u64,
            })
            .collect())
    }

    async fn clicks_by_day(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyClicks>, StorageError> {
        let rows: Vec<(NaiveDate, i64)> = sqlx::query_as(
            r#"
            SELECT last_seen_at::date AS day, SUM(click_count)::BIGINT AS clicks
            FROM click_aggregates
            WHERE last_seen_at::date BETWEEN $1 AND $2
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(day, clicks)| DailyClicks {
                day,
                clicks: clicks.max(0) as u64,
            })
            .collect())
    }
}

#[async_trait]
impl ClickRepository for PostgresStore {
    async fn save_aggregates(&self, aggregates: &[ClickAggregate]) -> Result<u64, StorageError> {
        if aggregates.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        let mut inserted = 0;
        for batch in aggregate_batches(aggregates) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO click_aggregates (ip, country, region, city, latitude, longitude, \
                 timezone, click_count, last_seen_at, campaign_id, referral_hash) ",
            );
            builder.push_values(batch, |mut row, aggregate| {
                row.push_bind(&aggregate.ip)
                    .push_bind(&aggregate.country)
                    .push_bind(&aggregate.region)
                    .push_bind(&aggregate.city)
                    .push_bind(aggregate.latitude)
                    .push_bind(aggregate.longitude)
                    .push_bind(&aggregate.timezone)
                    .push_bind(aggregate.click_count as i64)
                    .push_bind(aggregate.last_seen_at)
                    .push_bind(aggregate.campaign_id)
                    .push_bind(&aggregate.referral_hash);
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(inserted)
    }
}

#[async_trait]
impl DashboardRepository for PostgresStore {
    async fn save_dashboard(
        &self,
        dashboard: &AssembledDashboard,
        published: bool,
    ) -> Result<DashboardRecord, StorageError> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO dashboards (dashboard_type, title, payload, published, source_message_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, created_at
            "#,
        )
        .bind(dashboard.dashboard_type.to_string())
        .bind(&dashboard.title)
        .bind(Json(dashboard))
        .bind(published)
        .bind(&dashboard.source_message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(DashboardRecord {
            id,
            dashboard: dashboard.clone(),
            published,
            created_at,
        })
    }
}

#[async_trait]
impl NotificationRepository for PostgresStore {
    async fn save_notification(&self, event: &NotificationEvent) -> Result<i64, StorageError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO notifications
                (title, message, notification_type, target, related_entity_id, additional_data)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&event.title)
        .bind(&event.message)
        .bind(event.notification_type.to_string())
        .bind(event.target.describe())
        .bind(&event.related_entity_id)
        .bind(&event.additional_data)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClickEvent, GeoLocation};
    use chrono::Utc;

    fn aggregates(count: usize) -> Vec<ClickAggregate> {
        let event = ClickEvent {
            ip: "10.0.0.1".to_string(),
            referral_hash: None,
            campaign_id: None,
        };
        (0..count)
            .map(|i| {
                let ip = format!("10.{}.{}.{}", i / 65536, (i / 256) % 256, i % 256);
                ClickAggregate::from_event(&event, &ip, GeoLocation::unknown(), Utc::now())
            })
            .collect()
    }

    #[test]
    fn test_large_flush_stays_under_bind_limit() {
        let rows = aggregates(6000);
        let batches: Vec<_> = aggregate_batches(&rows).collect();
        assert_eq!(batches.len(), 2);
        assert!(batches
            .iter()
            .all(|batch| batch.len() * AGGREGATE_BINDS <= MAX_BIND_PARAMS));
        assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 6000);
    }

    #[test]
    fn test_small_flush_is_one_insert() {
        assert_eq!(aggregate_batches(&aggregates(3)).count(), 1);
        assert_eq!(aggregate_batches(&[]).count(), 0);
    }
}
