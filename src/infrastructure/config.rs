use std::str::FromStr;
use std::time::Duration;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::domain::DashboardType;
use crate::infrastructure::external_sink::HttpSinkConfig;
use crate::infrastructure::geo_lookup::GeoLookupConfig;
use crate::infrastructure::idempotency::DEFAULT_CAPACITY;
use crate::infrastructure::kafka_broker::KafkaConfig;
use crate::infrastructure::logging::LoggingConfig;
use crate::infrastructure::selector::Selector;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
    #[error("Missing required setting {0}")]
    Missing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BrokerKind {
    Kafka,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Postgres { url: String, pool_size: u32 },
    Memory,
}

/// Which dashboard generation shape this node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DashboardWorkerMode {
    /// Assemble, deliver, persist and notify in one place.
    Direct,
    /// Assemble here, hand the result to a save worker.
    Handoff,
    /// Only consume the save queue.
    SaveOnly,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRoles {
    pub enrichment: bool,
    pub billing: bool,
    pub notifications: bool,
    /// Runs a save worker next to a `Handoff` generator.
    pub dashboard_save: bool,
}

impl Default for WorkerRoles {
    fn default() -> Self {
        Self {
            enrichment: true,
            billing: true,
            notifications: true,
            dashboard_save: false,
        }
    }
}

/// Timer periods. `None` disables the timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub click_flush: Option<Duration>,
    pub billing_sweep: Option<Duration>,
    pub dashboard_trigger: Option<Duration>,
    pub budget_sweep: Option<Duration>,
    pub scheduled_dashboards: Vec<DashboardType>,
    pub scheduled_dashboard_recipients: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            click_flush: Some(Duration::from_secs(60)),
            billing_sweep: Some(Duration::from_secs(24 * 60 * 60)),
            dashboard_trigger: None,
            budget_sweep: Some(Duration::from_secs(6 * 60 * 60)),
            scheduled_dashboards: vec![DashboardType::CampaignPerformance],
            scheduled_dashboard_recipients: "ADMIN".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub node_name: String,
    pub broker: BrokerKind,
    pub kafka: KafkaConfig,
    pub storage: StorageConfig,
    pub sink: HttpSinkConfig,
    pub geo: GeoLookupConfig,
    pub roles: WorkerRoles,
    pub dashboard_mode: DashboardWorkerMode,
    pub dashboard_selector: Option<Selector>,
    pub dedup_capacity: usize,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_name: "campaign-ops".to_string(),
            broker: BrokerKind::Memory,
            kafka: KafkaConfig::default(),
            storage: StorageConfig::Memory,
            sink: HttpSinkConfig::default(),
            geo: GeoLookupConfig::default(),
            roles: WorkerRoles::default(),
            dashboard_mode: DashboardWorkerMode::Direct,
            dashboard_selector: None,
            dedup_capacity: DEFAULT_CAPACITY,
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key source, falling back
    /// to defaults for anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = AppConfig::default();

        let node_name = env.string("NODE_NAME").unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or(defaults.node_name)
        });

        let mut kafka = KafkaConfig::default();
        if let Some(servers) = env.string("KAFKA_BOOTSTRAP_SERVERS") {
            kafka.bootstrap_servers = servers;
        }
        if let Some(group) = env.string("KAFKA_GROUP_ID") {
            kafka.group_id = group;
        }
        kafka.client_id = env
            .string("KAFKA_CLIENT_ID")
            .unwrap_or_else(|| format!("campaign-ops-{}", node_name));
        if let Some(protocol) = env.string("KAFKA_SECURITY_PROTOCOL") {
            kafka.security_protocol = protocol;
        }
        kafka.message_timeout_ms = env.parse("KAFKA_MESSAGE_TIMEOUT_MS", kafka.message_timeout_ms)?;
        kafka.metadata_timeout_ms =
            env.parse("KAFKA_METADATA_TIMEOUT_MS", kafka.metadata_timeout_ms)?;

        let storage = match env.string("STORAGE").as_deref().unwrap_or("memory") {
            "postgres" => StorageConfig::Postgres {
                url: env
                    .string("DATABASE_URL")
                    .ok_or_else(|| ConfigError::Missing("DATABASE_URL".to_string()))?,
                pool_size: env.parse("DATABASE_POOL_SIZE", 10)?,
            },
            "memory" => StorageConfig::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE".to_string(),
                    reason: format!("unknown storage '{}'", other),
                })
            }
        };

        let mut sink = HttpSinkConfig::default();
        if let Some(url) = env.string("SINK_BASE_URL") {
            sink.base_url = url;
        }
        sink.timeout = Duration::from_secs(env.parse("SINK_TIMEOUT_SECS", sink.timeout.as_secs())?);

        let mut geo = GeoLookupConfig::default();
        if let Some(url) = env.string("GEO_BASE_URL") {
            geo.base_url = url;
        }
        geo.timeout = Duration::from_secs(env.parse("GEO_TIMEOUT_SECS", geo.timeout.as_secs())?);

        let role_defaults = WorkerRoles::default();
        let roles = WorkerRoles {
            enrichment: env.flag("WORKER_ENRICHMENT", role_defaults.enrichment)?,
            billing: env.flag("WORKER_BILLING", role_defaults.billing)?,
            notifications: env.flag("WORKER_NOTIFICATIONS", role_defaults.notifications)?,
            dashboard_save: env.flag("WORKER_DASHBOARD_SAVE", role_defaults.dashboard_save)?,
        };

        let dashboard_selector = match env.string("DASHBOARD_SELECTOR") {
            Some(expression) => Some(Selector::parse(&expression).map_err(|e| {
                ConfigError::Invalid {
                    key: "DASHBOARD_SELECTOR".to_string(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        let schedule_defaults = ScheduleConfig::default();
        let scheduled_dashboards = match env.string("DASHBOARD_SCHEDULED_TYPES") {
            Some(list) if list.eq_ignore_ascii_case("all") => DashboardType::iter().collect(),
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<DashboardType>().map_err(|_| ConfigError::Invalid {
                        key: "DASHBOARD_SCHEDULED_TYPES".to_string(),
                        reason: format!("unknown dashboard type '{}'", s),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => schedule_defaults.scheduled_dashboards,
        };
        let schedule = ScheduleConfig {
            click_flush: env.period("CLICK_FLUSH_INTERVAL_SECS", schedule_defaults.click_flush)?,
            billing_sweep: env
                .period("BILLING_SWEEP_INTERVAL_SECS", schedule_defaults.billing_sweep)?,
            dashboard_trigger: env.period(
                "DASHBOARD_TRIGGER_INTERVAL_SECS",
                schedule_defaults.dashboard_trigger,
            )?,
            budget_sweep: env.period("BUDGET_SWEEP_INTERVAL_SECS", schedule_defaults.budget_sweep)?,
            scheduled_dashboards,
            scheduled_dashboard_recipients: env
                .string("DASHBOARD_SCHEDULED_RECIPIENTS")
                .unwrap_or(schedule_defaults.scheduled_dashboard_recipients),
        };

        let mut logging = LoggingConfig::default();
        if let Some(level) = env.string("LOG_LEVEL") {
            logging.log_level = level.parse().map_err(|_| ConfigError::Invalid {
                key: "LOG_LEVEL".to_string(),
                reason: format!("unknown level '{}'", level),
            })?;
        }
        if let Some(dir) = env.string("LOG_DIR") {
            logging.log_dir = dir;
        }
        logging.enable_file = env.flag("LOG_TO_FILE", logging.enable_file)?;

        Ok(Self {
            node_name,
            broker: env.parse("BROKER", defaults.broker)?,
            kafka,
            storage,
            sink,
            geo,
            roles,
            dashboard_mode: env.parse("DASHBOARD_WORKER_MODE", defaults.dashboard_mode)?,
            dashboard_selector,
            dedup_capacity: env.parse("DEDUP_CAPACITY", defaults.dedup_capacity)?,
            schedule,
            logging,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("expected a boolean, got '{}'", other),
            }),
        }
    }

    /// Seconds; `0` turns the timer off.
    fn period(&self, key: &str, default: Option<Duration>) -> Result<Option<Duration>, ConfigError> {
        let secs: u64 = self.parse(key, default.map(|d| d.as_secs()).unwrap_or(0))?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }
}
